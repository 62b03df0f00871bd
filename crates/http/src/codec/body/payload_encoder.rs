use std::io::Write;

use bytes::{BufMut, BytesMut};
use tokio_util::codec::Encoder;
use tracing::warn;

use crate::protocol::{PayloadItem, PayloadSize, SendError};

/// Frames response payload items according to the head that preceded them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadEncoder {
    kind: Kind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    /// bytes still allowed under `Content-Length`
    Length(u64),
    /// chunked, `true` once the last chunk went out
    Chunked(bool),
    NoBody,
}

impl PayloadEncoder {
    pub fn empty() -> Self {
        Self { kind: Kind::NoBody }
    }

    pub fn chunked() -> Self {
        Self { kind: Kind::Chunked(false) }
    }

    pub fn fix_length(size: u64) -> Self {
        Self { kind: Kind::Length(size) }
    }

    pub fn is_finish(&self) -> bool {
        match self.kind {
            Kind::Length(remaining) => remaining == 0,
            Kind::Chunked(eof) => eof,
            Kind::NoBody => true,
        }
    }
}

impl From<PayloadSize> for PayloadEncoder {
    fn from(size: PayloadSize) -> Self {
        match size {
            PayloadSize::Length(n) => Self::fix_length(n),
            PayloadSize::Chunked => Self::chunked(),
            PayloadSize::Empty => Self::empty(),
        }
    }
}

impl Encoder<PayloadItem> for PayloadEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match (&mut self.kind, item) {
            (Kind::Length(remaining), PayloadItem::Chunk(bytes)) => {
                if bytes.len() as u64 > *remaining {
                    return Err(SendError::invalid_body(format!(
                        "payload exceeds content-length by {} bytes",
                        bytes.len() as u64 - *remaining
                    )));
                }
                *remaining -= bytes.len() as u64;
                dst.extend_from_slice(&bytes);
                Ok(())
            }
            (Kind::Length(remaining), PayloadItem::Eof) => {
                if *remaining != 0 {
                    warn!(remaining = *remaining, "payload ended before content-length was reached");
                    *remaining = 0;
                }
                Ok(())
            }
            (Kind::Chunked(true), _) => Ok(()),
            (Kind::Chunked(_), PayloadItem::Chunk(bytes)) => {
                if bytes.is_empty() {
                    return Ok(());
                }
                write!((&mut *dst).writer(), "{:X}\r\n", bytes.len())?;
                dst.reserve(bytes.len() + 2);
                dst.extend_from_slice(&bytes);
                dst.extend_from_slice(b"\r\n");
                Ok(())
            }
            (Kind::Chunked(eof), PayloadItem::Eof) => {
                *eof = true;
                dst.extend_from_slice(b"0\r\n\r\n");
                Ok(())
            }
            (Kind::NoBody, _) => Ok(()),
        }
    }
}
