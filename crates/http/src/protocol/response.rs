//! The writable side of an exchange.
//!
//! [`RawResponse`] is the transport response handle: a status line, a header
//! map and a sink that accepts either a complete payload ([`RawResponse::end`])
//! or a byte stream ([`RawResponse::pipe`]). It tracks whether the head already
//! went out and whether the socket is still usable, so callers can decide if a
//! late error can still be turned into a response.

use std::io;
use std::fmt;

use bytes::Bytes;
use futures::{SinkExt, Stream, StreamExt};
use http::{HeaderMap, HeaderValue, Response, StatusCode, Version, header};
use tokio::io::AsyncWrite;
use tokio_util::codec::FramedWrite;
use tracing::{debug, trace};

use crate::codec::ResponseEncoder;
use crate::date::DateService;
use crate::protocol::{Message, PayloadItem, PayloadSize, SendError};

/// The response head handed to the encoder.
pub type ResponseHead = Response<()>;

/// Custom status text, carried in the head's extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasonPhrase(pub String);

/// The boxed socket half a response writes into.
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub(crate) type FramedWriter = FramedWrite<BoxWriter, ResponseEncoder>;

type OutMessage = Message<(ResponseHead, PayloadSize)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Pending,
    HeadSent(PayloadSize),
    Finished,
}

pub struct RawResponse {
    status: StatusCode,
    reason: Option<String>,
    headers: HeaderMap,
    state: State,
    broken: bool,
    head_only: bool,
    keep_alive: bool,
    writer: FramedWriter,
}

impl fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawResponse")
            .field("status", &self.status)
            .field("reason", &self.reason)
            .field("headers", &self.headers)
            .field("state", &self.state)
            .field("broken", &self.broken)
            .finish_non_exhaustive()
    }
}

impl RawResponse {
    /// Creates a response writing into `writer`, with status `200 OK` and no headers.
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::from_framed(FramedWrite::new(Box::new(writer), ResponseEncoder::new()))
    }

    pub(crate) fn from_framed(writer: FramedWriter) -> Self {
        Self {
            status: StatusCode::OK,
            reason: None,
            headers: HeaderMap::new(),
            state: State::Pending,
            broken: false,
            head_only: false,
            keep_alive: true,
            writer,
        }
    }

    pub(crate) fn into_framed(self) -> FramedWriter {
        self.writer
    }

    /// Write the head but never the payload, as required for `HEAD` requests.
    pub fn set_head_only(&mut self, head_only: bool) {
        self.head_only = head_only;
    }

    pub fn head_only(&self) -> bool {
        self.head_only
    }

    /// Announce `Connection: close` when `false`.
    pub fn set_keep_alive(&mut self, keep_alive: bool) {
        self.keep_alive = keep_alive;
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive && !self.broken
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    /// The custom status text, if one was set.
    pub fn status_message(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn set_status_message(&mut self, message: Option<String>) {
        self.reason = message;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// `true` once the status line and headers were handed to the socket.
    pub fn headers_sent(&self) -> bool {
        self.state != State::Pending
    }

    pub fn finished(&self) -> bool {
        self.state == State::Finished
    }

    /// `false` after the response finished or the socket failed.
    pub fn writable(&self) -> bool {
        !self.finished() && !self.broken
    }

    /// Sends the head now, switching the payload to chunked framing.
    pub async fn flush_headers(&mut self) -> Result<(), SendError> {
        if self.state == State::Pending {
            self.write_head(PayloadSize::Chunked).await?;
            self.ensure_usable()?;
            let result = SinkExt::<OutMessage>::flush(&mut self.writer).await;
            self.track(result)?;
        }
        Ok(())
    }

    /// Finishes the response with `payload` as the (rest of the) body.
    pub async fn end(&mut self, payload: impl Into<Bytes>) -> Result<(), SendError> {
        let payload = payload.into();
        match self.state {
            State::Finished => return Err(SendError::Finished),
            State::Pending => {
                let size = if payload.is_empty() { PayloadSize::Empty } else { PayloadSize::Length(payload.len() as u64) };
                self.write_head(size).await?;
            }
            State::HeadSent(_) => {}
        }

        if self.sends_payload() && !payload.is_empty() {
            self.ensure_usable()?;
            let result = self.writer.feed(OutMessage::Payload(PayloadItem::Chunk(payload))).await;
            self.track(result)?;
        }
        self.finish().await
    }

    /// Streams `stream` as the body until it ends.
    ///
    /// Uses `Content-Length` framing when that header is present, chunked
    /// framing otherwise. A failing stream leaves the response unusable and
    /// its error is returned as [`SendError::Stream`].
    pub async fn pipe<S>(&mut self, mut stream: S) -> Result<(), SendError>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin,
    {
        match self.state {
            State::Finished => return Err(SendError::Finished),
            State::Pending => {
                let size = self
                    .headers
                    .get(header::CONTENT_LENGTH)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.trim().parse::<u64>().ok())
                    .map_or(PayloadSize::Chunked, PayloadSize::Length);
                self.write_head(size).await?;
            }
            State::HeadSent(_) => {}
        }

        if !self.sends_payload() {
            return self.finish().await;
        }

        while let Some(item) = stream.next().await {
            match item {
                Ok(bytes) if bytes.is_empty() => {}
                Ok(bytes) => {
                    trace!(len = bytes.len(), "pipe body chunk");
                    self.ensure_usable()?;
                    let result = self.writer.send(OutMessage::Payload(PayloadItem::Chunk(bytes))).await;
                    self.track(result)?;
                }
                Err(e) => {
                    debug!(cause = %e, "body stream failed, response aborted");
                    self.broken = true;
                    return Err(SendError::stream(e));
                }
            }
        }

        self.finish().await
    }

    async fn write_head(&mut self, size: PayloadSize) -> Result<(), SendError> {
        let mut head = Response::new(());
        *head.status_mut() = self.status;
        *head.version_mut() = Version::HTTP_11;
        *head.headers_mut() = self.headers.clone();

        if !head.headers().contains_key(header::DATE) {
            DateService::get_global_instance().with_http_date(|date| {
                head.headers_mut().insert(header::DATE, date);
            });
        }
        if !self.keep_alive {
            head.headers_mut().insert(header::CONNECTION, HeaderValue::from_static("close"));
        }
        if let Some(reason) = &self.reason {
            head.extensions_mut().insert(ReasonPhrase(reason.clone()));
        }

        let wire_size = if forbids_body(self.status) {
            PayloadSize::Empty
        } else if self.head_only {
            if let PayloadSize::Length(length) = size {
                head.headers_mut().insert(header::CONTENT_LENGTH, length.into());
            }
            PayloadSize::Empty
        } else {
            size
        };

        self.ensure_usable()?;
        let result = self.writer.feed(OutMessage::Header((head, wire_size))).await;
        self.track(result)?;
        self.state = State::HeadSent(wire_size);
        Ok(())
    }

    /// Whether the framing already on the wire carries payload bytes.
    fn sends_payload(&self) -> bool {
        matches!(self.state, State::HeadSent(size) if !size.is_empty())
    }

    async fn finish(&mut self) -> Result<(), SendError> {
        if let State::HeadSent(size) = self.state {
            if !size.is_empty() {
                self.ensure_usable()?;
                let result = self.writer.feed(OutMessage::Payload(PayloadItem::Eof)).await;
                self.track(result)?;
            }
        }
        self.ensure_usable()?;
        let result = SinkExt::<OutMessage>::flush(&mut self.writer).await;
        self.track(result)?;
        self.state = State::Finished;
        Ok(())
    }

    fn ensure_usable(&self) -> Result<(), SendError> {
        if self.broken {
            return Err(SendError::io(io::ErrorKind::BrokenPipe));
        }
        Ok(())
    }

    /// A failed write leaves the socket in an unknown state, never write to it again.
    fn track(&mut self, result: Result<(), SendError>) -> Result<(), SendError> {
        if result.is_err() {
            self.broken = true;
        }
        result
    }
}

/// Statuses whose responses end with the head.
pub(crate) fn forbids_body(status: StatusCode) -> bool {
    status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::RESET_CONTENT
        || status == StatusCode::NOT_MODIFIED
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tokio::io::AsyncReadExt;

    async fn read_all(mut reader: tokio::io::DuplexStream) -> String {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn end_writes_head_and_payload() {
        let (client, server) = tokio::io::duplex(4096);
        let mut response = RawResponse::new(server);
        response.headers_mut().insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));

        assert!(!response.headers_sent());
        response.end("hello").await.unwrap();
        assert!(response.headers_sent());
        assert!(response.finished());
        assert!(!response.writable());
        drop(response);

        let text = read_all(client).await;
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("content-length: 5\r\n"));
        assert!(text.contains("content-type: text/plain\r\n"));
        assert!(text.contains("date: "));
        assert!(text.ends_with("\r\n\r\nhello"));
    }

    #[tokio::test]
    async fn custom_reason_phrase() {
        let (client, server) = tokio::io::duplex(4096);
        let mut response = RawResponse::new(server);
        response.set_status(StatusCode::IM_A_TEAPOT);
        response.set_status_message(Some("Short And Stout".into()));
        response.end(Bytes::new()).await.unwrap();
        drop(response);

        let text = read_all(client).await;
        assert!(text.starts_with("HTTP/1.1 418 Short And Stout\r\n"));
    }

    #[tokio::test]
    async fn pipe_uses_chunked_framing() {
        let (client, server) = tokio::io::duplex(4096);
        let mut response = RawResponse::new(server);
        let body = stream::iter(vec![Ok(Bytes::from_static(b"ab")), Ok(Bytes::from_static(b"cde"))]);

        response.pipe(body).await.unwrap();
        assert!(response.finished());
        drop(response);

        let text = read_all(client).await;
        assert!(text.contains("transfer-encoding: chunked\r\n"));
        assert!(text.ends_with("\r\n\r\n2\r\nab\r\n3\r\ncde\r\n0\r\n\r\n"));
    }

    #[tokio::test]
    async fn pipe_failure_breaks_the_response() {
        let (_client, server) = tokio::io::duplex(4096);
        let mut response = RawResponse::new(server);
        let body = stream::iter(vec![Ok(Bytes::from_static(b"ab")), Err(io::Error::other("disk gone"))]);

        let error = response.pipe(body).await.unwrap_err();
        assert!(matches!(error, SendError::Stream { .. }));
        assert!(response.headers_sent());
        assert!(!response.writable());
        assert!(!response.keep_alive());
    }

    #[tokio::test]
    async fn peer_disconnect_breaks_the_response() {
        let (client, server) = tokio::io::duplex(64);
        drop(client);
        let mut response = RawResponse::new(server);
        let body = stream::iter(vec![Ok(Bytes::from_static(b"ab")), Ok(Bytes::from_static(b"cd"))]);

        let error = response.pipe(body).await.unwrap_err();
        assert!(matches!(error, SendError::Io { ref source } if source.kind() == io::ErrorKind::BrokenPipe));
        assert!(!response.writable());
        assert!(!response.keep_alive());
        assert!(matches!(response.end("late").await, Err(SendError::Io { .. })));
    }

    #[tokio::test]
    async fn head_only_suppresses_payload() {
        let (client, server) = tokio::io::duplex(4096);
        let mut response = RawResponse::new(server);
        response.set_head_only(true);
        response.end("hello").await.unwrap();
        drop(response);

        let text = read_all(client).await;
        assert!(text.contains("content-length: 5\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn bodiless_status_drops_payload() {
        let (client, server) = tokio::io::duplex(4096);
        let mut response = RawResponse::new(server);
        response.set_status(StatusCode::NOT_MODIFIED);
        response.headers_mut().insert(header::CONTENT_LENGTH, HeaderValue::from(12));
        response.end("Not Modified").await.unwrap();
        assert!(response.finished());
        drop(response);

        let text = read_all(client).await;
        assert!(text.starts_with("HTTP/1.1 304 Not Modified\r\n"));
        assert!(!text.contains("content-length"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn bodiless_status_skips_stream() {
        let (client, server) = tokio::io::duplex(4096);
        let mut response = RawResponse::new(server);
        response.set_status(StatusCode::NO_CONTENT);
        response.pipe(stream::iter(vec![Ok(Bytes::from_static(b"ignored"))])).await.unwrap();
        drop(response);

        let text = read_all(client).await;
        assert!(text.starts_with("HTTP/1.1 204 No Content\r\n"));
        assert!(!text.contains("transfer-encoding"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn end_twice_fails() {
        let (_client, server) = tokio::io::duplex(4096);
        let mut response = RawResponse::new(server);
        response.end("a").await.unwrap();
        assert!(matches!(response.end("b").await, Err(SendError::Finished)));
    }
}
