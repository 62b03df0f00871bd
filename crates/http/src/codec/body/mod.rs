//! Payload framing: `Content-Length` and chunked bodies.
//!
//! Requests are decoded by [`PayloadDecoder`], responses are framed by
//! [`PayloadEncoder`]; both are picked from a [`PayloadSize`](crate::protocol::PayloadSize).

mod chunked_decoder;
mod length_decoder;
mod payload_decoder;
mod payload_encoder;

pub use payload_decoder::PayloadDecoder;
pub use payload_encoder::PayloadEncoder;
