//! Response head encoding.
//!
//! Writes the status line and header fields, and reconciles `Content-Length` /
//! `Transfer-Encoding` with the framing the payload will actually use.

use std::io::{self, Write};

use bytes::{BufMut, BytesMut};
use http::{HeaderValue, header};
use tokio_util::codec::Encoder;

use crate::protocol::{PayloadSize, ReasonPhrase, ResponseHead, SendError, forbids_body};

const INIT_HEADER_SIZE: usize = 4 * 1024;

#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderEncoder;

impl Encoder<(ResponseHead, PayloadSize)> for HeaderEncoder {
    type Error = SendError;

    fn encode(&mut self, item: (ResponseHead, PayloadSize), dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (mut head, payload_size) = item;
        dst.reserve(INIT_HEADER_SIZE);

        let status = head.status();
        let reason = head
            .extensions()
            .get::<ReasonPhrase>()
            .map(|reason| reason.0.as_str())
            .or_else(|| status.canonical_reason())
            .unwrap_or("Unknown");
        write!(BufWriter(dst), "HTTP/1.1 {} {}\r\n", status.as_str(), sanitize(reason))?;

        let headers = head.headers_mut();
        match payload_size {
            PayloadSize::Length(n) => {
                headers.remove(header::TRANSFER_ENCODING);
                headers.insert(header::CONTENT_LENGTH, n.into());
            }
            PayloadSize::Chunked => {
                headers.remove(header::CONTENT_LENGTH);
                headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
            }
            PayloadSize::Empty => {
                if forbids_body(status) {
                    headers.remove(header::CONTENT_LENGTH);
                    headers.remove(header::TRANSFER_ENCODING);
                } else if !headers.contains_key(header::CONTENT_LENGTH) {
                    headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
                }
            }
        }

        for (name, value) in headers.iter() {
            dst.put_slice(name.as_ref());
            dst.put_slice(b": ");
            dst.put_slice(value.as_ref());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

/// A reason phrase must not break the status line.
fn sanitize(reason: &str) -> std::borrow::Cow<'_, str> {
    if reason.bytes().any(|b| b == b'\r' || b == b'\n') {
        reason.replace(['\r', '\n'], " ").into()
    } else {
        reason.into()
    }
}

struct BufWriter<'a>(&'a mut BytesMut);

impl Write for BufWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
