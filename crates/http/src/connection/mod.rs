//! Connection lifecycle: read a request, hand it to a handler, write the
//! response, and repeat while the connection may be kept alive.

mod http_connection;

pub use http_connection::{DEFAULT_MAX_BODY_SIZE, HttpConnection};
