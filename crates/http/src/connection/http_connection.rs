use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use http::{Method, StatusCode};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, warn};

use crate::codec::{RequestDecoder, ResponseEncoder};
use crate::handler::Handler;
use crate::protocol::{
    FramedWriter, HttpError, Message, ParseError, PayloadItem, PayloadSize, RawRequest, RawResponse, RequestHeader,
    SendError, SocketInfo,
};

/// Largest request body buffered for a handler unless configured otherwise
pub const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;

/// One client connection.
///
/// Requests are read one after another; each body is buffered up to the
/// configured limit before the handler runs. Bodies over the limit are
/// answered with `413` and malformed requests with `400`, both closing the
/// connection.
pub struct HttpConnection<R> {
    framed_read: FramedRead<R, RequestDecoder>,
    framed_write: Option<FramedWriter>,
    socket: SocketInfo,
    max_body_size: usize,
}

impl<R> HttpConnection<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new<W>(reader: R, writer: W, socket: SocketInfo) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            framed_read: FramedRead::with_capacity(reader, RequestDecoder::new(), 8 * 1024),
            framed_write: Some(FramedWrite::new(Box::new(writer), ResponseEncoder::new())),
            socket,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }

    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }

    pub async fn process<H>(mut self, handler: Arc<H>) -> Result<(), HttpError>
    where
        H: Handler + ?Sized,
    {
        loop {
            match self.framed_read.next().await {
                Some(Ok(Message::Header((header, payload_size)))) => {
                    if !self.do_process(header, payload_size, handler.as_ref()).await? {
                        return self.shutdown().await;
                    }
                }

                Some(Ok(Message::Payload(_))) => {
                    error!("receive payload while expecting a request head");
                    self.send_error(StatusCode::BAD_REQUEST).await?;
                    return Err(ParseError::invalid_header("payload without request head").into());
                }

                Some(Err(e)) => {
                    error!(cause = %e, "can't receive next request");
                    self.send_error(StatusCode::BAD_REQUEST).await?;
                    return Err(e.into());
                }

                None => {
                    info!("cant read more request, break this connection down");
                    return Ok(());
                }
            }
        }
    }

    /// Serves one request, returns whether the connection may be reused.
    async fn do_process<H>(&mut self, header: RequestHeader, payload_size: PayloadSize, handler: &H) -> Result<bool, HttpError>
    where
        H: Handler + ?Sized,
    {
        let keep_alive = header.keep_alive();
        let head_only = header.method() == Method::HEAD;

        if let PayloadSize::Length(length) = payload_size {
            if length > self.max_body_size as u64 {
                warn!(length, max = self.max_body_size, "request body too large");
                self.send_error(StatusCode::PAYLOAD_TOO_LARGE).await?;
                return Ok(false);
            }
        }

        if header.expect_continue() && !payload_size.is_empty() {
            let writer = self.writer()?.get_mut();
            writer.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await.map_err(SendError::io)?;
            writer.flush().await.map_err(SendError::io)?;
            debug!("receive expect request header, sent continue response");
        }

        let body = match self.read_body(payload_size).await {
            Ok(body) => body,
            Err(e @ ParseError::TooLargeBody { .. }) => {
                warn!(cause = %e, "request body too large");
                self.send_error(StatusCode::PAYLOAD_TOO_LARGE).await?;
                return Ok(false);
            }
            Err(e) => {
                error!(cause = %e, "can't read request body");
                self.send_error(StatusCode::BAD_REQUEST).await?;
                return Err(e.into());
            }
        };

        let mut response = RawResponse::from_framed(self.take_writer()?);
        response.set_head_only(head_only);
        response.set_keep_alive(keep_alive);

        let request = RawRequest::new(header, body, self.socket);
        let mut response = handler.call(request, response).await;

        if response.writable() {
            warn!("handler left the response open, finishing it");
            if let Err(e) = response.end(Bytes::new()).await {
                debug!(cause = %e, "can't finish response");
            }
        }

        let reuse = response.finished() && response.keep_alive();
        self.framed_write = Some(response.into_framed());
        Ok(reuse)
    }

    async fn read_body(&mut self, payload_size: PayloadSize) -> Result<Bytes, ParseError> {
        if payload_size.is_empty() {
            return Ok(Bytes::new());
        }

        let mut body = match payload_size {
            PayloadSize::Length(length) => BytesMut::with_capacity(length as usize),
            _ => BytesMut::new(),
        };

        loop {
            match self.framed_read.next().await {
                Some(Ok(Message::Payload(PayloadItem::Chunk(bytes)))) => {
                    let size = body.len() + bytes.len();
                    if size > self.max_body_size {
                        return Err(ParseError::too_large_body(size as u64, self.max_body_size));
                    }
                    body.extend_from_slice(&bytes);
                }
                Some(Ok(Message::Payload(PayloadItem::Eof))) => return Ok(body.freeze()),
                Some(Ok(Message::Header(_))) => return Err(ParseError::invalid_header("request head inside a body")),
                Some(Err(e)) => return Err(e),
                None => return Err(ParseError::io(std::io::ErrorKind::UnexpectedEof)),
            }
        }
    }

    async fn send_error(&mut self, status: StatusCode) -> Result<(), HttpError> {
        let mut response = RawResponse::from_framed(self.take_writer()?);
        response.set_status(status);
        response.set_keep_alive(false);
        let result = response.end(Bytes::new()).await;
        self.framed_write = Some(response.into_framed());
        Ok(result?)
    }

    async fn shutdown(&mut self) -> Result<(), HttpError> {
        if let Some(writer) = &mut self.framed_write {
            writer.get_mut().shutdown().await.map_err(SendError::io)?;
        }
        Ok(())
    }

    fn writer(&mut self) -> Result<&mut FramedWriter, SendError> {
        self.framed_write.as_mut().ok_or_else(|| SendError::io(std::io::ErrorKind::NotConnected))
    }

    fn take_writer(&mut self) -> Result<FramedWriter, SendError> {
        self.framed_write.take().ok_or_else(|| SendError::io(std::io::ErrorKind::NotConnected))
    }
}
