//! The response view.
//!
//! [`Response`] owns the transport response handle and the body handlers
//! assign. Its setters keep status, body and the entity headers consistent:
//!
//! - statuses that forbid a body clear it, and an empty body turns the status into `204`
//! - assigning a body sets `200` unless a status was assigned explicitly
//! - `Content-Type` is inferred from the body when none is set, `Content-Length`
//!   is computed for text and byte bodies

use std::time::SystemTime;

use hserver_http::protocol::RawResponse;
use http::header::{self, HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use serde_json::{Value, json};
use tracing::debug;

use crate::request::headers_to_json;
use crate::{Body, Error, media};

/// Statuses whose responses never carry a payload.
pub fn is_empty_status(status: u16) -> bool {
    matches!(status, 204 | 205 | 304)
}

#[derive(Debug)]
pub struct Response {
    raw: RawResponse,
    body: Body,
    explicit_status: bool,
}

impl Response {
    pub(crate) fn new(raw: RawResponse) -> Self {
        Self { raw, body: Body::Empty, explicit_status: false }
    }

    pub fn raw(&self) -> &RawResponse {
        &self.raw
    }

    pub fn raw_mut(&mut self) -> &mut RawResponse {
        &mut self.raw
    }

    pub(crate) fn into_raw(self) -> RawResponse {
        self.raw
    }

    pub fn status(&self) -> u16 {
        self.raw.status().as_u16()
    }

    /// Sets the status and resets the message to its reason phrase.
    ///
    /// Codes outside `100..=999` become `500`. A status that forbids a body
    /// clears the current one.
    pub fn set_status(&mut self, status: u16) {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        self.explicit_status = true;
        self.raw.set_status(status);
        self.raw.set_status_message(None);

        if !self.body.is_empty() && is_empty_status(status.as_u16()) {
            self.set_body(Body::Empty);
        }
    }

    /// The status message, the reason phrase unless one was set.
    pub fn message(&self) -> &str {
        self.raw.status_message().or_else(|| self.raw.status().canonical_reason()).unwrap_or_default()
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.raw.set_status_message(Some(message.into()));
    }

    pub fn headers(&self) -> &HeaderMap {
        self.raw.headers()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.raw.headers().get(field).and_then(|value| value.to_str().ok())
    }

    /// Replaces every value of `field`.
    pub fn set<K, V>(&mut self, field: K, value: V) -> Result<(), Error>
    where
        K: TryInto<HeaderName>,
        K::Error: Into<http::Error>,
        V: TryInto<HeaderValue>,
        V::Error: Into<http::Error>,
    {
        let (name, value) = header_pair(field, value)?;
        self.raw.headers_mut().insert(name, value);
        Ok(())
    }

    /// Adds a value to `field`, keeping the ones already there.
    pub fn append<K, V>(&mut self, field: K, value: V) -> Result<(), Error>
    where
        K: TryInto<HeaderName>,
        K::Error: Into<http::Error>,
        V: TryInto<HeaderValue>,
        V::Error: Into<http::Error>,
    {
        let (name, value) = header_pair(field, value)?;
        self.raw.headers_mut().append(name, value);
        Ok(())
    }

    pub fn remove(&mut self, field: &str) {
        if let Ok(name) = HeaderName::from_bytes(field.as_bytes()) {
            self.raw.headers_mut().remove(name);
        }
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub(crate) fn take_body(&mut self) -> Body {
        std::mem::take(&mut self.body)
    }

    /// Assigns the body and brings status and entity headers in line with it.
    ///
    /// Once the head was written only the stored body changes.
    pub fn set_body(&mut self, body: impl Into<Body>) {
        let replaced = !self.body.is_empty();
        self.body = body.into();

        if self.raw.headers_sent() {
            return;
        }

        if self.body.is_empty() {
            if !is_empty_status(self.status()) {
                self.set_status(204);
            }
            let headers = self.raw.headers_mut();
            headers.remove(header::CONTENT_TYPE);
            headers.remove(header::CONTENT_LENGTH);
            headers.remove(header::TRANSFER_ENCODING);
            return;
        }

        if !self.explicit_status {
            self.set_status(200);
        }

        let typed = self.raw.headers().contains_key(header::CONTENT_TYPE);
        match &self.body {
            Body::Text(text) => {
                let length = text.len() as u64;
                if !typed {
                    let token = if text.trim_start().starts_with('<') { "html" } else { "text" };
                    self.infer_content_type(token);
                }
                self.set_length(length);
            }
            Body::Bytes(bytes) => {
                let length = bytes.len() as u64;
                if !typed {
                    self.infer_content_type("bin");
                }
                self.set_length(length);
            }
            Body::Stream(_) => {
                if replaced {
                    self.raw.headers_mut().remove(header::CONTENT_LENGTH);
                }
                if !typed {
                    self.infer_content_type("bin");
                }
            }
            Body::Json(_) => {
                self.raw.headers_mut().remove(header::CONTENT_LENGTH);
                if !typed {
                    self.infer_content_type("json");
                }
            }
            Body::Empty => {}
        }
    }

    /// `Content-Length`, or the length the current body would encode to.
    pub fn length(&self) -> Option<u64> {
        match self.get(header::CONTENT_LENGTH.as_str()) {
            Some(length) => length.trim().parse().ok(),
            None => self.body.size_hint(),
        }
    }

    pub fn set_length(&mut self, length: u64) {
        self.raw.headers_mut().insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }

    /// The media type without parameters.
    pub fn content_type(&self) -> Option<&str> {
        let value = self.get(header::CONTENT_TYPE.as_str())?;
        let essence = value.split(';').next().unwrap_or_default().trim();
        (!essence.is_empty()).then_some(essence)
    }

    /// Sets `Content-Type` from a full type, an extension or a shorthand
    /// (`text`, `html`, `json`, `bin`).
    ///
    /// The current charset is kept; textual types default to `utf-8`.
    /// Unrecognised tokens and values with parameters are stored as given.
    pub fn set_content_type(&mut self, token: &str) -> Result<(), Error> {
        let value = if token.contains(';') {
            token.trim().to_owned()
        } else {
            let essence = media::lookup(token).map_or_else(|| token.trim().to_owned(), |essence| essence.into_owned());
            let charset = self.charset().or_else(|| media::is_textual(&essence).then(|| "utf-8".to_owned()));
            match charset {
                Some(charset) => format!("{essence}; charset={charset}"),
                None => essence,
            }
        };

        let value = HeaderValue::try_from(value).map_err(|e| Error::new(format!("invalid content type: {e}"), None))?;
        self.raw.headers_mut().insert(header::CONTENT_TYPE, value);
        Ok(())
    }

    /// The `charset` parameter of `Content-Type`.
    pub fn charset(&self) -> Option<String> {
        let value = self.get(header::CONTENT_TYPE.as_str())?;
        value.split(';').skip(1).find_map(|param| {
            let (name, value) = param.split_once('=')?;
            name.trim().eq_ignore_ascii_case("charset").then(|| value.trim().trim_matches('"').to_owned())
        })
    }

    /// Re-derives `Content-Type` from the current type and `charset`
    /// (`utf-8` when `None`). Does nothing while no type is set.
    pub fn set_charset(&mut self, charset: Option<&str>) -> Result<(), Error> {
        let Some(essence) = self.content_type() else {
            return Ok(());
        };
        let value = format!("{essence}; charset={}", charset.unwrap_or("utf-8"));
        let value = HeaderValue::try_from(value).map_err(|e| Error::new(format!("invalid charset: {e}"), None))?;
        self.raw.headers_mut().insert(header::CONTENT_TYPE, value);
        Ok(())
    }

    pub fn last_modified(&self) -> Option<SystemTime> {
        httpdate::parse_http_date(self.get(header::LAST_MODIFIED.as_str())?).ok()
    }

    pub fn set_last_modified(&mut self, time: SystemTime) {
        let value = HeaderValue::try_from(httpdate::fmt_http_date(time));
        if let Ok(value) = value {
            self.raw.headers_mut().insert(header::LAST_MODIFIED, value);
        }
    }

    pub fn etag(&self) -> Option<&str> {
        self.get(header::ETAG.as_str())
    }

    /// Sets `ETag`, quoting the value unless it is already a quoted or weak tag.
    pub fn set_etag(&mut self, etag: &str) -> Result<(), Error> {
        let etag = if etag.starts_with('"') || etag.starts_with("W/\"") { etag.to_owned() } else { format!("\"{etag}\"") };
        self.set(header::ETAG, etag)
    }

    pub fn headers_sent(&self) -> bool {
        self.raw.headers_sent()
    }

    pub fn writable(&self) -> bool {
        self.raw.writable()
    }

    pub fn to_json(&self) -> Value {
        json!({
            "status": self.status(),
            "message": self.message(),
            "header": headers_to_json(self.headers()),
        })
    }

    pub(crate) fn infer_content_type(&mut self, token: &'static str) {
        if let Err(e) = self.set_content_type(token) {
            debug!(cause = %e, token, "can't infer content type");
        }
    }
}

fn header_pair<K, V>(field: K, value: V) -> Result<(HeaderName, HeaderValue), Error>
where
    K: TryInto<HeaderName>,
    K::Error: Into<http::Error>,
    V: TryInto<HeaderValue>,
    V::Error: Into<http::Error>,
{
    let invalid = |e: http::Error| Error::new(format!("invalid header: {e}"), None);
    let name = field.try_into().map_err(|e| invalid(e.into()))?;
    let value = value.try_into().map_err(|e| invalid(e.into()))?;
    Ok((name, value))
}
