//! A tiny async web toolkit: onion middleware over a per-request context.
//!
//! An [`Application`] holds an ordered stack of middleware. Every request gets
//! a fresh [`Context`] bundling a [`Request`] and a [`Response`]; the stack
//! runs against it, then whatever body was left is written out. Errors from
//! any middleware end up in [`Context::on_error`], which turns them into a
//! plain text response.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Instant;
//!
//! use hserver::{Application, Handler};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), hserver::ServerError> {
//!     Application::builder()
//!         .with(Handler::callback(|ctx, next| {
//!             Box::pin(async move {
//!                 let start = Instant::now();
//!                 next.run(ctx).await?;
//!                 let elapsed = format!("{}ms", start.elapsed().as_millis());
//!                 ctx.set("x-response-time", elapsed)
//!             })
//!         }))
//!         .with(Handler::sync(|ctx| {
//!             ctx.set_body("Hello World");
//!             Ok(())
//!         }))
//!         .build()
//!         .listen("127.0.0.1:3000")
//!         .await
//! }
//! ```

mod application;
mod body;
mod compose;
mod config;
mod context;
mod error;
mod media;
mod request;
mod response;

#[cfg(test)]
mod test_util;

pub use application::{Application, ApplicationBuilder, ErrorListener};
pub use body::{Body, BodyStream};
pub use compose::{Handler, Middleware, Next, Pipeline, compose};
pub use config::Settings;
pub use context::Context;
pub use error::{BoxError, Error, ErrorKind, ServerError};
pub use request::{IsType, Request};
pub use response::{Response, is_empty_status};

pub use futures::future::BoxFuture;
pub use hserver_http::protocol::{RawRequest, RawResponse, SocketInfo};
