//! The seam between a connection and the code answering its requests.
//!
//! A [`Handler`] receives the buffered request together with the response
//! handle it must write through, and gives the handle back when it is done so
//! the connection can serve the next request on the same socket.

use std::future::Future;

use async_trait::async_trait;

use crate::protocol::{RawRequest, RawResponse};

#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, request: RawRequest, response: RawResponse) -> RawResponse;
}

#[derive(Debug)]
pub struct HandlerFn<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(RawRequest, RawResponse) -> Fut + Send + Sync,
    Fut: Future<Output = RawResponse> + Send,
{
    async fn call(&self, request: RawRequest, response: RawResponse) -> RawResponse {
        (self.f)(request, response).await
    }
}

/// Wraps an async function as a [`Handler`].
pub fn make_handler<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(RawRequest, RawResponse) -> Fut,
    Fut: Future<Output = RawResponse>,
{
    HandlerFn { f }
}
