//! Protocol types shared by the codec, the connection and handlers.
//!
//! - [`Message`], [`PayloadItem`], [`PayloadSize`]: what the codec produces and consumes
//! - [`RequestHeader`], [`RawRequest`], [`SocketInfo`]: the request side
//! - [`RawResponse`]: the response handle handlers write through
//! - [`HttpError`], [`ParseError`], [`SendError`]: transport errors

mod message;
pub use message::Message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod request;
pub use request::RawRequest;
pub use request::RequestHeader;
pub use request::SocketInfo;

mod response;
pub(crate) use response::FramedWriter;
pub(crate) use response::forbids_body;
pub use response::BoxWriter;
pub use response::RawResponse;
pub use response::ReasonPhrase;
pub use response::ResponseHead;

mod error;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;
