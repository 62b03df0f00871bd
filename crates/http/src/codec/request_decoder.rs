//! Streaming request decoding.
//!
//! A request is decoded as one [`Message::Header`] followed, when the head
//! announced a body, by [`Message::Payload`] items ending with
//! [`PayloadItem::Eof`]. Requests without a body produce the header only.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::codec::body::PayloadDecoder;
use crate::codec::header::HeaderDecoder;
use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHeader};

#[derive(Debug, Default)]
pub struct RequestDecoder {
    header_decoder: HeaderDecoder,
    /// `Some` while the body of the current request is being read
    payload_decoder: Option<PayloadDecoder>,
}

impl RequestDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for RequestDecoder {
    type Item = Message<(RequestHeader, PayloadSize)>;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(payload_decoder) = &mut self.payload_decoder {
            return match payload_decoder.decode(src)? {
                Some(item @ PayloadItem::Chunk(_)) => Ok(Some(Message::Payload(item))),
                Some(PayloadItem::Eof) => {
                    self.payload_decoder = None;
                    Ok(Some(Message::Payload(PayloadItem::Eof)))
                }
                None => Ok(None),
            };
        }

        let Some((header, payload_size)) = self.header_decoder.decode(src)? else {
            return Ok(None);
        };

        if !payload_size.is_empty() {
            self.payload_decoder = Some(payload_size.into());
        }
        Ok(Some(Message::Header((header, payload_size))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use indoc::indoc;

    fn next(decoder: &mut RequestDecoder, src: &mut BytesMut) -> Message<(RequestHeader, PayloadSize)> {
        decoder.decode(src).unwrap().unwrap()
    }

    #[test]
    fn pipelined_requests() {
        let input = indoc! {"
        POST /submit HTTP/1.1\r
        Host: example.com\r
        Content-Length: 3\r
        \r
        abcGET / HTTP/1.1\r
        Host: example.com\r
        \r
        "};
        let mut src = BytesMut::from(input);
        let mut decoder = RequestDecoder::new();

        let Message::Header((header, size)) = next(&mut decoder, &mut src) else { panic!("expected a head") };
        assert_eq!(header.method(), Method::POST);
        assert_eq!(size, PayloadSize::Length(3));

        let Message::Payload(item) = next(&mut decoder, &mut src) else { panic!("expected payload") };
        assert_eq!(item.as_bytes().unwrap().as_ref(), b"abc");

        let Message::Payload(item) = next(&mut decoder, &mut src) else { panic!("expected payload") };
        assert!(item.is_eof());

        let Message::Header((header, size)) = next(&mut decoder, &mut src) else { panic!("expected a head") };
        assert_eq!(header.method(), Method::GET);
        assert_eq!(size, PayloadSize::Empty);
        assert!(decoder.decode(&mut src).unwrap().is_none());
    }
}
