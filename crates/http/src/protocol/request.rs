//! Incoming request handles.
//!
//! [`RequestHeader`] is the decoded head of a request, [`RawRequest`] is what the
//! connection hands to a [`Handler`](crate::handler::Handler): the head, the buffered
//! body and a little information about the socket it arrived on.

use std::net::SocketAddr;

use bytes::Bytes;
use http::request::Parts;
use http::{HeaderMap, Method, Request, Uri, Version, header};

/// The head of an HTTP request.
#[derive(Debug)]
pub struct RequestHeader {
    inner: Request<()>,
}

impl AsRef<Request<()>> for RequestHeader {
    fn as_ref(&self) -> &Request<()> {
        &self.inner
    }
}

impl AsMut<Request<()>> for RequestHeader {
    fn as_mut(&mut self) -> &mut Request<()> {
        &mut self.inner
    }
}

impl RequestHeader {
    pub fn into_inner(self) -> Request<()> {
        self.inner
    }

    /// Attaches a body to this header, converting it into a full `Request<T>`.
    pub fn body<T>(self, body: T) -> Request<T> {
        self.inner.map(|_| body)
    }

    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    pub fn version(&self) -> Version {
        self.inner.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// Methods that carry no body unless the client frames one explicitly.
    pub fn need_body(&self) -> bool {
        !matches!(self.method(), &Method::GET | &Method::HEAD | &Method::DELETE | &Method::OPTIONS | &Method::CONNECT)
    }

    /// Whether the client allows the connection to be reused after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive, HTTP/1.0 only keeps the connection
    /// when it asks for it.
    pub fn keep_alive(&self) -> bool {
        let connection = self.headers().get(header::CONNECTION).and_then(|value| value.to_str().ok());
        let has_token = |token: &str| {
            connection.is_some_and(|value| value.split(',').any(|item| item.trim().eq_ignore_ascii_case(token)))
        };

        match self.version() {
            Version::HTTP_11 => !has_token("close"),
            Version::HTTP_10 => has_token("keep-alive"),
            _ => false,
        }
    }

    /// Whether the client sent `Expect: 100-continue`.
    pub fn expect_continue(&self) -> bool {
        self.headers()
            .get(header::EXPECT)
            .is_some_and(|value| value.as_bytes().len() >= 4 && value.as_bytes()[..4].eq_ignore_ascii_case(b"100-"))
    }
}

impl From<Parts> for RequestHeader {
    #[inline]
    fn from(parts: Parts) -> Self {
        Self { inner: Request::from_parts(parts, ()) }
    }
}

impl From<Request<()>> for RequestHeader {
    #[inline]
    fn from(inner: Request<()>) -> Self {
        Self { inner }
    }
}

/// What the transport knows about the socket a request came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SocketInfo {
    pub peer_addr: Option<SocketAddr>,
    /// `true` when the bytes arrived over TLS
    pub encrypted: bool,
}

impl SocketInfo {
    pub fn new(peer_addr: Option<SocketAddr>, encrypted: bool) -> Self {
        Self { peer_addr, encrypted }
    }
}

/// A fully received request: head, buffered body and socket details.
#[derive(Debug)]
pub struct RawRequest {
    header: RequestHeader,
    body: Bytes,
    socket: SocketInfo,
}

impl RawRequest {
    pub fn new(header: RequestHeader, body: Bytes, socket: SocketInfo) -> Self {
        Self { header, body, socket }
    }

    pub fn header(&self) -> &RequestHeader {
        &self.header
    }

    pub fn method(&self) -> &Method {
        self.header.method()
    }

    pub fn uri(&self) -> &Uri {
        self.header.uri()
    }

    pub fn version(&self) -> Version {
        self.header.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.header.headers()
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn socket(&self) -> &SocketInfo {
        &self.socket
    }

    pub fn into_parts(self) -> (RequestHeader, Bytes, SocketInfo) {
        (self.header, self.body, self.socket)
    }
}

/// Builds a request that did not come from a socket, mostly useful in tests.
impl From<Request<Bytes>> for RawRequest {
    fn from(request: Request<Bytes>) -> Self {
        let (parts, body) = request.into_parts();
        Self { header: parts.into(), body, socket: SocketInfo::default() }
    }
}
