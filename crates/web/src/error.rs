//! Errors raised while serving a request.
//!
//! Every failure inside the middleware stack is an [`Error`]: raised on
//! purpose through [`Context::raise`](crate::Context::raise), returned by a
//! failing I/O or serialization call, or produced by the pipeline itself
//! (double `next`, panics). The status it carries decides the response that
//! [`Context::on_error`](crate::Context::on_error) writes.

use std::any::Any;
use std::error::Error as StdError;
use std::io;

use hserver_http::protocol::SendError;
use http::StatusCode;
use thiserror::Error;

pub type BoxError = Box<dyn StdError + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// raised by a handler with a message and status
    Raised,
    /// a handler invoked its continuation twice
    NextCalledMultipleTimes,
    /// a handler panicked
    NonError,
    Io,
    Serialize,
    /// the response body stream failed
    Stream,
    Other,
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct Error {
    message: String,
    status: Option<u16>,
    expose: bool,
    header_sent: bool,
    kind: ErrorKind,
    #[source]
    source: Option<BoxError>,
}

impl Error {
    /// An error with a status; client errors (`4xx`) expose their message.
    pub fn new(message: impl Into<String>, status: impl Into<Option<u16>>) -> Self {
        let status = status.into();
        Self {
            message: message.into(),
            status,
            expose: status.is_some_and(|status| (400..500).contains(&status)),
            header_sent: false,
            kind: ErrorKind::Raised,
            source: None,
        }
    }

    /// Wraps any error; it resolves to `500` unless its message starts with a status.
    pub fn other(source: impl Into<BoxError>) -> Self {
        let source = source.into();
        Self::with_source(source.to_string(), ErrorKind::Other, source)
    }

    pub(crate) fn next_called_multiple_times() -> Self {
        Self { kind: ErrorKind::NextCalledMultipleTimes, ..Self::new("next() called multiple times", None) }
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panic".to_owned());
        Self { kind: ErrorKind::NonError, ..Self::new(format!("non-error thrown: {detail}"), None) }
    }

    fn with_source(message: String, kind: ErrorKind, source: BoxError) -> Self {
        Self { kind, source: Some(source), ..Self::new(message, None) }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The explicit status, otherwise a status the message starts with.
    pub fn status(&self) -> Option<u16> {
        self.status.or_else(|| leading_status(&self.message))
    }

    pub fn set_status(&mut self, status: u16) {
        self.status = Some(status);
    }

    /// Whether the message may be shown to the client.
    pub fn expose(&self) -> bool {
        self.expose
    }

    pub fn set_expose(&mut self, expose: bool) {
        self.expose = expose;
    }

    pub fn with_expose(mut self, expose: bool) -> Self {
        self.expose = expose;
        self
    }

    /// `true` when the error arrived after the response head was written.
    pub fn header_sent(&self) -> bool {
        self.header_sent
    }

    pub(crate) fn mark_header_sent(&mut self) {
        self.header_sent = true;
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// `true` when the root cause is a missing file.
    pub fn is_not_found(&self) -> bool {
        let mut source: Option<&(dyn StdError + 'static)> = self.source.as_deref().map(|e| e as _);
        while let Some(error) = source {
            if error.downcast_ref::<io::Error>().is_some_and(|e| e.kind() == io::ErrorKind::NotFound) {
                return true;
            }
            source = error.source();
        }
        false
    }
}

fn leading_status(message: &str) -> Option<u16> {
    let trimmed = message.trim_start();
    let end = trimmed.find(|c: char| !c.is_ascii_digit()).unwrap_or(trimmed.len());
    trimmed[..end].parse().ok()
}

/// `true` for statuses the status line can carry with a known reason phrase.
pub(crate) fn is_known_status(status: u16) -> bool {
    StatusCode::from_u16(status).ok().and_then(|status| status.canonical_reason()).is_some()
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::with_source(e.to_string(), ErrorKind::Io, Box::new(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::with_source(e.to_string(), ErrorKind::Serialize, Box::new(e))
    }
}

impl From<SendError> for Error {
    fn from(e: SendError) -> Self {
        let kind = if matches!(e, SendError::Stream { .. }) { ErrorKind::Stream } else { ErrorKind::Io };
        Self::with_source(e.to_string(), kind, Box::new(e))
    }
}

/// Failures starting the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("can't bind server address: {source}")]
    Bind {
        #[source]
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_are_exposed() {
        assert!(Error::new("missing", 404).expose());
        assert!(!Error::new("boom", 500).expose());
        assert!(!Error::new("boom", None).expose());
        assert!(Error::new("boom", 503).with_expose(true).expose());
    }

    #[test]
    fn status_from_message() {
        assert_eq!(Error::new("404 page missing", None).status(), Some(404));
        assert_eq!(Error::new("boom", None).status(), None);
        assert_eq!(Error::new("404", 418).status(), Some(418));
    }

    #[test]
    fn not_found_io_errors() {
        let error = Error::from(io::Error::new(io::ErrorKind::NotFound, "no such file"));
        assert!(error.is_not_found());
        assert_eq!(error.kind(), ErrorKind::Io);
        assert_eq!(error.message(), "no such file");

        let error = Error::from(io::Error::other("disk"));
        assert!(!error.is_not_found());
    }

    #[test]
    fn stream_send_errors() {
        let error = Error::from(SendError::stream(io::Error::other("gone")));
        assert_eq!(error.kind(), ErrorKind::Stream);
    }

    #[test]
    fn panic_payloads() {
        let error = Error::from_panic(Box::new("oops"));
        assert_eq!(error.kind(), ErrorKind::NonError);
        assert_eq!(error.message(), "non-error thrown: oops");

        let error = Error::from_panic(Box::new(String::from("owned")));
        assert_eq!(error.message(), "non-error thrown: owned");

        let error = Error::from_panic(Box::new(42));
        assert_eq!(error.message(), "non-error thrown: panic");
    }

    #[test]
    fn known_statuses() {
        assert!(is_known_status(404));
        assert!(is_known_status(418));
        assert!(!is_known_status(299));
        assert!(!is_known_status(42));
    }
}
