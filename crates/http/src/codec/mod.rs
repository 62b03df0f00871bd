//! HTTP/1.1 wire codec.
//!
//! [`RequestDecoder`] turns socket bytes into a request head followed by
//! payload items; [`ResponseEncoder`] does the reverse for responses. Both are
//! plain `tokio_util` codecs and are driven through `FramedRead`/`FramedWrite`
//! by the connection.

mod body;
mod header;
mod request_decoder;
mod response_encoder;

pub use header::{MAX_HEADER_BYTES, MAX_HEADER_NUM};
pub use request_decoder::RequestDecoder;
pub use response_encoder::ResponseEncoder;
