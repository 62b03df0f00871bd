//! Request head decoding.
//!
//! Parses the request line and header fields with `httparse` and decides how the
//! body that follows is framed (RFC 9112 section 6.3).

use bytes::BytesMut;
use http::{HeaderName, HeaderValue, Request, header};
use httparse::Status;
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::ensure;
use crate::protocol::{ParseError, PayloadSize, RequestHeader};

/// Maximum number of headers allowed in a request
pub const MAX_HEADER_NUM: usize = 64;

/// Maximum size in bytes allowed for the whole request head
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderDecoder;

impl Decoder for HeaderDecoder {
    type Item = (RequestHeader, PayloadSize);
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];
        let mut req = httparse::Request::new(&mut headers);

        let status = req.parse(src).map_err(|e| match e {
            httparse::Error::TooManyHeaders => ParseError::too_many_headers(MAX_HEADER_NUM),
            e => ParseError::invalid_header(e),
        })?;

        let head_size = match status {
            Status::Complete(head_size) => head_size,
            Status::Partial => {
                ensure!(src.len() <= MAX_HEADER_BYTES, ParseError::too_large_header(src.len(), MAX_HEADER_BYTES));
                return Ok(None);
            }
        };
        trace!(head_size, "parsed request head");
        ensure!(head_size <= MAX_HEADER_BYTES, ParseError::too_large_header(head_size, MAX_HEADER_BYTES));

        let version = match req.version {
            Some(0) => http::Version::HTTP_10,
            Some(1) => http::Version::HTTP_11,
            v => return Err(ParseError::InvalidVersion(v)),
        };

        let mut builder = Request::builder()
            .method(req.method.ok_or(ParseError::InvalidMethod)?)
            .uri(req.path.ok_or(ParseError::InvalidUri)?)
            .version(version);

        if let Some(map) = builder.headers_mut() {
            map.reserve(req.headers.len());
            for field in req.headers.iter() {
                let name = HeaderName::from_bytes(field.name.as_bytes()).map_err(ParseError::invalid_header)?;
                let value = HeaderValue::from_bytes(field.value).map_err(ParseError::invalid_header)?;
                map.append(name, value);
            }
        }

        let header: RequestHeader = builder
            .body(())
            .map_err(|e| match e {
                e if e.is::<http::uri::InvalidUri>() => ParseError::InvalidUri,
                e if e.is::<http::method::InvalidMethod>() => ParseError::InvalidMethod,
                e => ParseError::invalid_header(e),
            })?
            .into();

        let payload_size = parse_payload(&header)?;
        let _ = src.split_to(head_size);

        Ok(Some((header, payload_size)))
    }
}

fn parse_payload(header: &RequestHeader) -> Result<PayloadSize, ParseError> {
    let te = header.headers().get(header::TRANSFER_ENCODING);
    let cl = header.headers().get(header::CONTENT_LENGTH);

    match (te, cl) {
        (Some(_), Some(_)) => {
            Err(ParseError::invalid_content_length("transfer-encoding and content-length both present"))
        }
        (Some(te), None) if is_chunked(te) => Ok(PayloadSize::Chunked),
        // the body length is unknowable, reading on would desync the connection
        (Some(_), None) => Err(ParseError::invalid_header("unsupported transfer-encoding")),
        (None, Some(cl)) => {
            let text = cl.to_str().map_err(|_| ParseError::invalid_content_length("value is not visible ascii"))?;
            let length = text
                .trim()
                .parse::<u64>()
                .map_err(|_| ParseError::invalid_content_length(format!("value {text} is not u64")))?;
            Ok(if length == 0 { PayloadSize::Empty } else { PayloadSize::Length(length) })
        }
        // a request without framing headers has no body, whatever its method
        (None, None) => Ok(PayloadSize::Empty),
    }
}

/// `chunked` must be the final transfer coding.
fn is_chunked(value: &HeaderValue) -> bool {
    value
        .as_bytes()
        .rsplit(|b| *b == b',')
        .next()
        .is_some_and(|last| last.trim_ascii().eq_ignore_ascii_case(b"chunked"))
}
