use bytes::Bytes;
use hserver_http::protocol::{RawRequest, RawResponse};
use tokio::io::{AsyncReadExt, DuplexStream};

use crate::{Application, Context};

pub(crate) fn context(uri: &str) -> Context {
    context_from(http::Request::builder().uri(uri).body(Bytes::new()).unwrap())
}

pub(crate) fn context_from(request: http::Request<Bytes>) -> Context {
    Application::builder().build().create_context(RawRequest::from(request), RawResponse::new(tokio::io::sink()))
}

/// A context whose response is written into the returned duplex end.
pub(crate) fn context_with_writer(uri: &str) -> (Context, DuplexStream) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let request = http::Request::builder().uri(uri).body(Bytes::new()).unwrap();
    let ctx = Application::builder().build().create_context(RawRequest::from(request), RawResponse::new(server));
    (ctx, client)
}

pub(crate) async fn read_all(mut client: DuplexStream) -> String {
    let mut buf = Vec::new();
    client.read_to_end(&mut buf).await.unwrap();
    String::from_utf8(buf).unwrap()
}
