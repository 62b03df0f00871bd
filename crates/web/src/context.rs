//! The per-request context.
//!
//! [`Context`] owns the request view and the response view of one exchange
//! and exposes both through one flat set of accessors, generated by
//! `delegate!` so every call reads or writes the single underlying view.
//! It is also where failures end up: [`Context::on_error`] turns an error into
//! a response unless the head already went out.

use std::fmt;
use std::time::SystemTime;

use hserver_http::protocol::RawResponse;
use http::header::{self, HeaderName, HeaderValue};
use http::{Extensions, HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::is_known_status;
use crate::request::IsType;
use crate::response::is_empty_status;
use crate::{Application, Body, Error, Request, Response};

/// Generates `pub fn`s forwarding to the same-named method of a field.
macro_rules! delegate {
    ($field:ident => $( $(#[$meta:meta])* fn $name:ident(&self $(, $arg:ident: $ty:ty)*) -> $ret:ty; )+) => {
        $(
            $(#[$meta])*
            #[inline]
            pub fn $name(&self $(, $arg: $ty)*) -> $ret {
                self.$field.$name($($arg),*)
            }
        )+
    };
    ($field:ident => mut $( $(#[$meta:meta])* fn $name:ident(&mut self $(, $arg:ident: $ty:ty)*) $(-> $ret:ty)?; )+) => {
        $(
            $(#[$meta])*
            #[inline]
            pub fn $name(&mut self $(, $arg: $ty)*) $(-> $ret)? {
                self.$field.$name($($arg),*)
            }
        )+
    };
}

pub struct Context {
    app: Application,
    request: Request,
    response: Response,
    state: Extensions,
}

impl Context {
    pub(crate) fn new(app: Application, request: Request, response: Response) -> Self {
        Self { app, request, response, state: Extensions::new() }
    }

    pub fn app(&self) -> &Application {
        &self.app
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    /// Per-request values shared between middleware.
    pub fn state(&self) -> &Extensions {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut Extensions {
        &mut self.state
    }

    pub fn into_raw_response(self) -> RawResponse {
        self.response.into_raw()
    }

    delegate! { request =>
        fn url(&self) -> &str;
        fn method(&self) -> &Method;
        fn path(&self) -> &str;
        fn pathname(&self) -> &str;
        fn querystring(&self) -> &str;
        fn search(&self) -> String;
        fn query(&self) -> Vec<(String, String)>;
        fn protocol(&self) -> &str;
        fn secure(&self) -> bool;
        fn host(&self) -> Option<&str>;
        fn hostname(&self) -> Option<&str>;
        fn port(&self) -> Option<u16>;
        fn origin(&self) -> String;
        fn href(&self) -> String;
        /// Request headers; response headers are on [`Context::response`].
        fn headers(&self) -> &HeaderMap;
        fn ips(&self) -> Vec<&str>;
        fn ip(&self) -> Option<String>;
        fn accept(&self) -> Vec<&str>;
        fn accept_encoding(&self) -> Vec<&str>;
        fn accept_charset(&self) -> Vec<&str>;
        fn accept_language(&self) -> Vec<&str>;
        /// A request header, see [`Request::get`].
        fn get(&self, field: &str) -> Option<&str>;
        fn is(&self, types: &[&str]) -> IsType;
    }

    pub fn query_as<T: DeserializeOwned>(&self) -> Result<T, Error> {
        self.request.query_as()
    }

    delegate! { response =>
        fn status(&self) -> u16;
        fn message(&self) -> &str;
        fn body(&self) -> &Body;
        fn length(&self) -> Option<u64>;
        /// The response media type; the request's is on [`Context::request`].
        fn content_type(&self) -> Option<&str>;
        fn charset(&self) -> Option<String>;
        fn last_modified(&self) -> Option<SystemTime>;
        fn etag(&self) -> Option<&str>;
        fn headers_sent(&self) -> bool;
        fn writable(&self) -> bool;
    }

    delegate! { response => mut
        fn set_status(&mut self, status: u16);
        fn set_message(&mut self, message: impl Into<String>);
        fn set_body(&mut self, body: impl Into<Body>);
        fn set_length(&mut self, length: u64);
        fn set_content_type(&mut self, token: &str) -> Result<(), Error>;
        fn set_charset(&mut self, charset: Option<&str>) -> Result<(), Error>;
        fn set_last_modified(&mut self, time: SystemTime);
        fn set_etag(&mut self, etag: &str) -> Result<(), Error>;
        fn remove(&mut self, field: &str);
    }

    /// Sets a response header.
    pub fn set<K, V>(&mut self, field: K, value: V) -> Result<(), Error>
    where
        K: TryInto<HeaderName>,
        K::Error: Into<http::Error>,
        V: TryInto<HeaderValue>,
        V::Error: Into<http::Error>,
    {
        self.response.set(field, value)
    }

    /// Appends a response header value.
    pub fn append<K, V>(&mut self, field: K, value: V) -> Result<(), Error>
    where
        K: TryInto<HeaderName>,
        K::Error: Into<http::Error>,
        V: TryInto<HeaderValue>,
        V::Error: Into<http::Error>,
    {
        self.response.append(field, value)
    }

    /// Builds an error for a handler to return; nothing is written.
    ///
    /// ```
    /// # use hserver::{Context, Error};
    /// fn find(ctx: &Context, found: bool) -> Result<(), Error> {
    ///     if !found {
    ///         return Err(ctx.raise("no such user", 404));
    ///     }
    ///     Ok(())
    /// }
    /// ```
    pub fn raise(&self, message: impl Into<String>, status: impl Into<Option<u16>>) -> Error {
        Error::new(message, status)
    }

    /// Raises unless `condition` holds.
    pub fn assert(&self, condition: bool, status: u16, message: impl Into<String>) -> Result<(), Error> {
        if condition { Ok(()) } else { Err(self.raise(message, status)) }
    }

    /// Reports `error` to the application listeners and answers the request with it.
    ///
    /// When the head is already on the wire, or the response can't be written
    /// any more, the error is only marked as `header_sent`. Otherwise the
    /// response becomes a plain text message with the error's status: `404`
    /// for missing files, `500` for unknown statuses. The message is the
    /// error's own when it is exposed, the reason phrase otherwise.
    pub async fn on_error(&mut self, error: &mut Error) {
        self.app.emit_error(error, self);

        if self.headers_sent() || !self.writable() {
            error.mark_header_sent();
            return;
        }

        let status = if error.is_not_found() {
            404
        } else {
            error.status().filter(|status| is_known_status(*status)).unwrap_or(500)
        };
        error.set_status(status);

        let message = if error.expose() {
            error.message().to_owned()
        } else {
            StatusCode::from_u16(status).ok().and_then(|status| status.canonical_reason()).unwrap_or_default().to_owned()
        };

        let response = &mut self.response;
        drop(response.take_body());
        response.set_status(status);
        let headers = response.raw_mut().headers_mut();
        let message = if is_empty_status(status) {
            headers.remove(header::CONTENT_TYPE);
            headers.remove(header::CONTENT_LENGTH);
            String::new()
        } else {
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(message.len()));
            message
        };
        if let Err(e) = response.raw_mut().end(message).await {
            debug!(cause = %e, "can't write error response");
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "request": self.request.to_json(),
            "response": self.response.to_json(),
            "app": self.app.to_json(),
        })
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("method", self.method())
            .field("url", &self.url())
            .field("status", &self.status())
            .field("body", self.body())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{context, context_from, context_with_writer, read_all};
    use bytes::Bytes;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[test]
    fn delegation_shares_one_response() {
        let mut ctx = context("/a?b=c");
        assert_eq!(ctx.status(), 404);

        ctx.set_body("<h1>hi</h1>");
        assert_eq!(ctx.status(), 200);
        assert_eq!(ctx.response().status(), 200);
        assert_eq!(ctx.content_type(), Some("text/html"));

        ctx.response_mut().set_status(204);
        assert!(ctx.body().is_empty());
        assert_eq!(ctx.length(), None);

        assert_eq!(ctx.url(), "/a?b=c");
        assert_eq!(ctx.query(), vec![("b".into(), "c".into())]);
    }

    #[test]
    fn request_headers_through_context() {
        let ctx = context_from(
            http::Request::builder().uri("/").header("Referer", "http://x.com/").body(Bytes::new()).unwrap(),
        );
        assert_eq!(ctx.get("referrer"), Some("http://x.com/"));
        assert_eq!(ctx.headers().len(), 1);
    }

    #[test]
    fn state_is_per_context() {
        #[derive(Clone, Debug, PartialEq)]
        struct User(&'static str);

        let mut ctx = context("/");
        ctx.state_mut().insert(User("tj"));
        assert_eq!(ctx.state().get::<User>(), Some(&User("tj")));
        assert!(context("/").state().get::<User>().is_none());
    }

    #[test]
    fn raise_and_assert() {
        let ctx = context("/");
        let error = ctx.raise("missing", 404);
        assert_eq!(error.status(), Some(404));
        assert!(error.expose());

        assert!(ctx.assert(true, 401, "nope").is_ok());
        let error = ctx.assert(false, 401, "nope").unwrap_err();
        assert_eq!((error.status(), error.message()), (Some(401), "nope"));
    }

    #[tokio::test]
    async fn on_error_writes_reason_phrase() {
        let (mut ctx, client) = context_with_writer("/");
        ctx.set("X-Trace", "1").unwrap();
        ctx.set_body(Body::stream(futures::stream::empty()));

        let mut error = Error::new("secret detail", 503);
        ctx.on_error(&mut error).await;
        assert!(!error.header_sent());
        drop(ctx);

        let text = read_all(client).await;
        assert!(text.starts_with("HTTP/1.1 503 Service Unavailable\r\n"));
        assert!(text.contains("content-type: text/plain; charset=utf-8\r\n"));
        assert!(text.contains("content-length: 19\r\n"));
        assert!(text.contains("x-trace: 1\r\n"));
        assert!(text.ends_with("\r\n\r\nService Unavailable"));
    }

    #[tokio::test]
    async fn on_error_resets_content_type() {
        let (mut ctx, client) = context_with_writer("/");
        ctx.set_content_type("application/json; charset=latin1").unwrap();
        ctx.set_body(serde_json::json!({"partial": true}));

        ctx.on_error(&mut Error::new("boom", 500)).await;
        drop(ctx);

        let text = read_all(client).await;
        assert!(text.contains("content-type: text/plain; charset=utf-8\r\n"));
        assert!(!text.contains("latin1"));
        assert!(text.ends_with("\r\n\r\nInternal Server Error"));
    }

    #[tokio::test]
    async fn on_error_exposes_client_errors() {
        let (mut ctx, client) = context_with_writer("/");
        let mut error = ctx.raise("name is required", 422);
        ctx.on_error(&mut error).await;
        drop(ctx);

        let text = read_all(client).await;
        assert!(text.starts_with("HTTP/1.1 422 Unprocessable Entity\r\n"));
        assert!(text.ends_with("\r\n\r\nname is required"));
    }

    #[tokio::test]
    async fn on_error_maps_statuses() {
        let (mut ctx, client) = context_with_writer("/");
        let mut error = Error::from(io::Error::new(io::ErrorKind::NotFound, "gone"));
        ctx.on_error(&mut error).await;
        assert_eq!(error.status(), Some(404));
        drop(ctx);
        assert!(read_all(client).await.starts_with("HTTP/1.1 404 Not Found\r\n"));

        let (mut ctx, client) = context_with_writer("/");
        let mut error = Error::new("strange", 299);
        ctx.on_error(&mut error).await;
        assert_eq!(error.status(), Some(500));
        drop(ctx);
        assert!(read_all(client).await.ends_with("\r\n\r\nInternal Server Error"));
    }

    #[tokio::test]
    async fn on_error_after_headers_sent_does_not_write() {
        let (mut ctx, client) = context_with_writer("/");
        ctx.response_mut().raw_mut().flush_headers().await.unwrap();

        let mut error = Error::new("late", 500);
        ctx.on_error(&mut error).await;
        assert!(error.header_sent());
        assert!(ctx.writable());
        drop(ctx);

        let text = read_all(client).await;
        assert_eq!(text.matches("HTTP/1.1").count(), 1);
        assert!(!text.contains("late"));
    }

    #[tokio::test]
    async fn on_error_notifies_listeners_first() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let app = {
            let seen = Arc::clone(&seen);
            Application::builder()
                .on_error(move |error, ctx| seen.lock().unwrap().push(format!("{} {}", ctx.path(), error.message())))
                .build()
        };
        let mut ctx = app.create_context(
            http::Request::builder().uri("/x").body(Bytes::new()).unwrap().into(),
            RawResponse::new(tokio::io::sink()),
        );

        ctx.on_error(&mut Error::new("boom", None)).await;
        assert_eq!(*seen.lock().unwrap(), vec!["/x boom".to_owned()]);
    }

    #[test]
    fn inspect_as_json() {
        let mut ctx = context("/inspect");
        ctx.set_body("x");
        let json = ctx.to_json();
        assert_eq!(json["request"]["url"], "/inspect");
        assert_eq!(json["request"]["method"], "GET");
        assert_eq!(json["response"]["status"], 200);
        assert_eq!(json["response"]["header"]["content-length"], "1");
        assert_eq!(json["app"]["env"], "development");
    }
}
