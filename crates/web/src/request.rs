//! The request view.
//!
//! Everything here is derived from the raw request on each call; nothing is
//! cached. Proxy-aware accessors consult `X-Forwarded-*` headers only when the
//! application trusts its proxy.

use std::sync::Arc;

use bytes::Bytes;
use hserver_http::protocol::RawRequest;
use http::{HeaderMap, Method, Version, header};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};

use crate::config::Settings;
use crate::{Error, media};

const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
const X_FORWARDED_HOST: &str = "x-forwarded-host";
const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// How a request's declared content type compares to a list of candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IsType {
    /// the request carries no body
    NoBody,
    /// a body without a `Content-Type`
    Untyped,
    Mismatch,
    /// the matching candidate, or the actual type for wildcard candidates
    Match(String),
}

impl IsType {
    pub fn is_match(&self) -> bool {
        matches!(self, IsType::Match(_))
    }
}

#[derive(Debug)]
pub struct Request {
    raw: RawRequest,
    settings: Arc<Settings>,
}

impl Request {
    pub(crate) fn new(raw: RawRequest, settings: Arc<Settings>) -> Self {
        Self { raw, settings }
    }

    pub fn raw(&self) -> &RawRequest {
        &self.raw
    }

    pub fn method(&self) -> &Method {
        self.raw.method()
    }

    pub fn version(&self) -> Version {
        self.raw.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.raw.headers()
    }

    /// The buffered request body.
    pub fn body(&self) -> &Bytes {
        self.raw.body()
    }

    /// Path and query string as received.
    pub fn url(&self) -> &str {
        self.raw.uri().path_and_query().map_or("/", |pq| pq.as_str())
    }

    pub fn path(&self) -> &str {
        self.raw.uri().path()
    }

    pub fn pathname(&self) -> &str {
        self.path()
    }

    /// The query string without its `?`.
    pub fn querystring(&self) -> &str {
        self.raw.uri().query().unwrap_or_default()
    }

    /// The query string with its `?`, empty when there is none.
    pub fn search(&self) -> String {
        match self.querystring() {
            "" => String::new(),
            query => format!("?{query}"),
        }
    }

    /// Decoded query pairs in order; a malformed query string yields none.
    pub fn query(&self) -> Vec<(String, String)> {
        serde_urlencoded::from_str(self.querystring()).unwrap_or_default()
    }

    pub fn query_as<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_urlencoded::from_str(self.querystring()).map_err(|e| Error::new(format!("invalid query string: {e}"), 400))
    }

    /// A request header by name; `referer` and `referrer` are interchangeable.
    pub fn get(&self, field: &str) -> Option<&str> {
        let field = field.to_ascii_lowercase();
        match field.as_str() {
            "referer" | "referrer" => self.header_str("referer").or_else(|| self.header_str("referrer")),
            field => self.header_str(field),
        }
    }

    /// `https` for encrypted sockets, else the forwarded protocol when the proxy is trusted.
    pub fn protocol(&self) -> &str {
        if self.raw.socket().encrypted {
            return "https";
        }
        if !self.settings.proxy {
            return "http";
        }
        self.first_forwarded(X_FORWARDED_PROTO).unwrap_or("http")
    }

    pub fn secure(&self) -> bool {
        self.protocol() == "https"
    }

    /// `host:port` from `X-Forwarded-Host` (trusted proxy only) or `Host`.
    pub fn host(&self) -> Option<&str> {
        let forwarded = if self.settings.proxy { self.first_forwarded(X_FORWARDED_HOST) } else { None };
        forwarded
            .or_else(|| self.header_str(header::HOST.as_str()).map(str::trim).filter(|host| !host.is_empty()))
            .or_else(|| self.raw.uri().authority().map(|authority| authority.as_str()))
    }

    /// The host without its port; IPv6 literals keep their brackets.
    pub fn hostname(&self) -> Option<&str> {
        let host = self.host()?;
        if host.starts_with('[') {
            return host.find(']').map(|end| &host[..=end]);
        }
        host.split(':').next()
    }

    /// The explicit port of the host, else the default port of the protocol.
    pub fn port(&self) -> Option<u16> {
        let host = self.host()?;
        let hostname = self.hostname()?;
        match host[hostname.len()..].strip_prefix(':') {
            Some(port) => port.parse().ok(),
            None if self.secure() => Some(443),
            None => Some(80),
        }
    }

    pub fn origin(&self) -> String {
        format!("{}://{}", self.protocol(), self.host().unwrap_or_default())
    }

    pub fn href(&self) -> String {
        let uri = self.raw.uri();
        if uri.scheme().is_some() {
            return uri.to_string();
        }
        format!("{}{}", self.origin(), self.url())
    }

    /// Client addresses from `X-Forwarded-For`, nearest client first (trusted proxy only).
    pub fn ips(&self) -> Vec<&str> {
        if !self.settings.proxy {
            return Vec::new();
        }
        self.header_str(X_FORWARDED_FOR)
            .map(|value| value.split(',').map(str::trim).filter(|ip| !ip.is_empty()).collect())
            .unwrap_or_default()
    }

    pub fn ip(&self) -> Option<String> {
        match self.ips().first() {
            Some(ip) => Some((*ip).to_owned()),
            None => self.raw.socket().peer_addr.map(|addr| addr.ip().to_string()),
        }
    }

    pub fn accept(&self) -> Vec<&str> {
        self.tokens(header::ACCEPT)
    }

    pub fn accept_encoding(&self) -> Vec<&str> {
        self.tokens(header::ACCEPT_ENCODING)
    }

    pub fn accept_language(&self) -> Vec<&str> {
        self.tokens(header::ACCEPT_LANGUAGE)
    }

    /// Acceptable charsets, `["*"]` when the client states none.
    pub fn accept_charset(&self) -> Vec<&str> {
        let charsets = self.tokens(header::ACCEPT_CHARSET);
        if charsets.is_empty() { vec!["*"] } else { charsets }
    }

    /// The declared media type without parameters.
    pub fn content_type(&self) -> Option<&str> {
        let value = self.header_str(header::CONTENT_TYPE.as_str())?;
        let essence = value.split(';').next().unwrap_or_default().trim();
        (!essence.is_empty()).then_some(essence)
    }

    /// The `charset` parameter of the declared content type, lowercased.
    pub fn charset(&self) -> Option<String> {
        let value = self.header_str(header::CONTENT_TYPE.as_str())?;
        let mime: mime::Mime = value.parse().ok()?;
        mime.get_param(mime::CHARSET).map(|charset| charset.as_str().to_ascii_lowercase())
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header_str(header::CONTENT_LENGTH.as_str())?.trim().parse().ok()
    }

    /// Whether the request framed a body, even an empty one.
    pub fn has_body(&self) -> bool {
        let headers = self.headers();
        headers.contains_key(header::TRANSFER_ENCODING) || headers.contains_key(header::CONTENT_LENGTH)
    }

    /// Checks the declared content type against `types`.
    ///
    /// Candidates may be extensions (`json`), full types, wildcards (`text/*`),
    /// `+json` style suffixes, or `urlencoded`/`multipart`. With no candidates
    /// the declared type itself is returned.
    pub fn is(&self, types: &[&str]) -> IsType {
        if !self.has_body() {
            return IsType::NoBody;
        }
        let Some(declared) = self.content_type() else {
            return IsType::Untyped;
        };
        let Ok(actual) = declared.parse::<mime::Mime>() else {
            return IsType::Mismatch;
        };
        let actual = actual.essence_str().to_ascii_lowercase();

        if types.is_empty() {
            return IsType::Match(actual);
        }

        for candidate in types {
            let expected = match candidate.strip_prefix('+') {
                Some(_) => format!("*/*{candidate}"),
                None => match media::lookup(candidate) {
                    Some(expected) => expected.into_owned(),
                    None => continue,
                },
            };
            if media::matches(&expected, &actual) {
                let wildcard = candidate.starts_with('+') || expected.contains('*');
                return IsType::Match(if wildcard { actual } else { (*candidate).to_owned() });
            }
        }
        IsType::Mismatch
    }

    pub fn to_json(&self) -> Value {
        json!({
            "method": self.method().as_str(),
            "url": self.url(),
            "header": headers_to_json(self.headers()),
        })
    }

    fn header_str(&self, name: &str) -> Option<&str> {
        self.headers().get(name).and_then(|value| value.to_str().ok())
    }

    fn first_forwarded(&self, name: &str) -> Option<&str> {
        let value = self.header_str(name)?;
        let first = value.split(',').next().unwrap_or_default().trim();
        (!first.is_empty()).then_some(first)
    }

    fn tokens(&self, name: header::HeaderName) -> Vec<&str> {
        self.headers()
            .get_all(name)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(|token| token.split(';').next().unwrap_or_default().trim())
            .filter(|token| !token.is_empty())
            .collect()
    }
}

pub(crate) fn headers_to_json(headers: &HeaderMap) -> Value {
    let mut map = Map::new();
    for name in headers.keys() {
        let values: Vec<_> = headers.get_all(name).iter().map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned()).collect();
        map.insert(name.as_str().to_owned(), Value::String(values.join(", ")));
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hserver_http::protocol::{RequestHeader, SocketInfo};
    use serde::Deserialize;

    fn request(builder: http::request::Builder, proxy: bool) -> Request {
        request_with_socket(builder, proxy, SocketInfo::default())
    }

    fn request_with_socket(builder: http::request::Builder, proxy: bool, socket: SocketInfo) -> Request {
        let header = RequestHeader::from(builder.body(()).unwrap());
        let settings = Settings { proxy, ..Settings::default() };
        Request::new(RawRequest::new(header, Bytes::new(), socket), Arc::new(settings))
    }

    #[test]
    fn url_parts() {
        let req = request(http::Request::builder().uri("/users/list?page=2&sort=name&page=3"), false);
        assert_eq!(req.url(), "/users/list?page=2&sort=name&page=3");
        assert_eq!(req.path(), "/users/list");
        assert_eq!(req.querystring(), "page=2&sort=name&page=3");
        assert_eq!(req.search(), "?page=2&sort=name&page=3");
        assert_eq!(
            req.query(),
            vec![("page".into(), "2".into()), ("sort".into(), "name".into()), ("page".into(), "3".into())]
        );

        let req = request(http::Request::builder().uri("/"), false);
        assert_eq!(req.search(), "");
        assert!(req.query().is_empty());
    }

    #[test]
    fn typed_query() {
        #[derive(Deserialize)]
        struct Page {
            page: u32,
        }

        let req = request(http::Request::builder().uri("/?page=7"), false);
        assert_eq!(req.query_as::<Page>().unwrap().page, 7);

        let req = request(http::Request::builder().uri("/?page=x"), false);
        let error = req.query_as::<Page>().err().unwrap();
        assert_eq!(error.status(), Some(400));
    }

    #[test]
    fn referrer_alias() {
        let req = request(http::Request::builder().uri("/").header("Referrer", "http://a.com/"), false);
        assert_eq!(req.get("referer"), Some("http://a.com/"));
        assert_eq!(req.get("Referrer"), Some("http://a.com/"));
        assert_eq!(req.get("x-missing"), None);
    }

    #[test]
    fn forwarded_host_needs_trusted_proxy() {
        let builder = || http::Request::builder().uri("/").header("Host", "native.com:8080").header("X-Forwarded-Host", "a.com, b.com");

        let req = request(builder(), true);
        assert_eq!(req.host(), Some("a.com"));
        assert_eq!(req.port(), Some(80));

        let req = request(builder(), false);
        assert_eq!(req.host(), Some("native.com:8080"));
        assert_eq!(req.hostname(), Some("native.com"));
        assert_eq!(req.port(), Some(8080));
        assert_eq!(req.origin(), "http://native.com:8080");
        assert_eq!(req.href(), "http://native.com:8080/");
    }

    #[test]
    fn ipv6_hostname() {
        let req = request(http::Request::builder().uri("/").header("Host", "[::1]:3000"), false);
        assert_eq!(req.hostname(), Some("[::1]"));
        assert_eq!(req.port(), Some(3000));
    }

    #[test]
    fn protocol() {
        let builder = || http::Request::builder().uri("/").header("X-Forwarded-Proto", "https, http");
        assert_eq!(request(builder(), true).protocol(), "https");
        assert!(request(builder(), true).secure());
        assert_eq!(request(builder(), false).protocol(), "http");

        let encrypted = SocketInfo::new(None, true);
        assert_eq!(request_with_socket(http::Request::builder().uri("/"), false, encrypted).protocol(), "https");
    }

    #[test]
    fn client_addresses() {
        let peer = SocketInfo::new(Some("10.0.0.9:5555".parse().unwrap()), false);
        let builder = || http::Request::builder().uri("/").header("X-Forwarded-For", "1.1.1.1, 2.2.2.2");

        let req = request_with_socket(builder(), true, peer);
        assert_eq!(req.ips(), vec!["1.1.1.1", "2.2.2.2"]);
        assert_eq!(req.ip().as_deref(), Some("1.1.1.1"));

        let req = request_with_socket(builder(), false, peer);
        assert!(req.ips().is_empty());
        assert_eq!(req.ip().as_deref(), Some("10.0.0.9"));
    }

    #[test]
    fn negotiation_lists() {
        let req = request(
            http::Request::builder()
                .uri("/")
                .header("Accept", "text/html, application/json;q=0.9")
                .header("Accept-Encoding", "gzip, br;q=0.5")
                .header("Accept-Language", "en-US,fr;q=0.4"),
            false,
        );
        assert_eq!(req.accept(), vec!["text/html", "application/json"]);
        assert_eq!(req.accept_encoding(), vec!["gzip", "br"]);
        assert_eq!(req.accept_language(), vec!["en-US", "fr"]);
        assert_eq!(req.accept_charset(), vec!["*"]);

        let req = request(http::Request::builder().uri("/"), false);
        assert!(req.accept().is_empty());
        assert!(req.accept_encoding().is_empty());
    }

    #[test]
    fn content_type_and_charset() {
        let req = request(
            http::Request::builder().uri("/").header("Content-Type", "text/HTML; charset=UTF-8").header("Content-Length", "4"),
            false,
        );
        assert_eq!(req.content_type(), Some("text/HTML"));
        assert_eq!(req.charset().as_deref(), Some("utf-8"));
        assert_eq!(req.content_length(), Some(4));
    }

    #[test]
    fn is_classifies_bodies() {
        let req = request(http::Request::builder().uri("/"), false);
        assert_eq!(req.is(&["json"]), IsType::NoBody);

        let req = request(http::Request::builder().uri("/").header("Content-Length", "2"), false);
        assert_eq!(req.is(&["json"]), IsType::Untyped);

        let req = request(
            http::Request::builder().uri("/").header("Content-Type", "application/json; charset=utf-8").header("Content-Length", "2"),
            false,
        );
        assert_eq!(req.is(&[]), IsType::Match("application/json".into()));
        assert_eq!(req.is(&["html", "json"]), IsType::Match("json".into()));
        assert_eq!(req.is(&["application/*"]), IsType::Match("application/json".into()));
        assert_eq!(req.is(&["html"]), IsType::Mismatch);

        let req = request(
            http::Request::builder().uri("/").header("Content-Type", "application/ld+json").header("Transfer-Encoding", "chunked"),
            false,
        );
        assert_eq!(req.is(&["+json"]), IsType::Match("application/ld+json".into()));

        let req = request(
            http::Request::builder()
                .uri("/")
                .header("Content-Type", "application/x-www-form-urlencoded")
                .header("Content-Length", "3"),
            false,
        );
        assert_eq!(req.is(&["urlencoded"]), IsType::Match("urlencoded".into()));
        assert!(!req.is(&["multipart"]).is_match());
    }
}
