//! The HTTP/1.1 transport under `hserver`.
//!
//! This crate owns everything that touches the socket: parsing request heads
//! with `httparse`, framing bodies (`Content-Length` and chunked), writing
//! response heads with a cached `Date`, and the keep-alive connection loop.
//! It knows nothing about middleware; the layer above plugs in through
//! [`handler::Handler`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use hserver_http::connection::HttpConnection;
//! use hserver_http::handler::make_handler;
//! use hserver_http::protocol::{RawRequest, RawResponse, SocketInfo};
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let listener = TcpListener::bind("127.0.0.1:8080").await?;
//!     let handler = Arc::new(make_handler(hello_world));
//!
//!     loop {
//!         let (stream, peer) = listener.accept().await?;
//!         let handler = handler.clone();
//!         tokio::spawn(async move {
//!             let (reader, writer) = stream.into_split();
//!             let connection = HttpConnection::new(reader, writer, SocketInfo::new(Some(peer), false));
//!             let _ = connection.process(handler).await;
//!         });
//!     }
//! }
//!
//! async fn hello_world(_request: RawRequest, mut response: RawResponse) -> RawResponse {
//!     let _ = response.end("Hello World!\r\n").await;
//!     response
//! }
//! ```
//!
//! # Limits
//!
//! - HTTP/1.1 only, no TLS (terminate it in front and enable proxy trust above)
//! - request heads up to 8 KiB with at most 64 header fields
//! - request bodies are buffered, 1 MiB unless configured otherwise

pub mod codec;
pub mod connection;
pub mod handler;
pub mod protocol;

mod date;
mod utils;
pub(crate) use utils::ensure;
