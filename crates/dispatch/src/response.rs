//! The mutable response every step of a chain writes to.
//!
//! [`ResponseContext`] buffers status, headers and body until the dispatcher materializes
//! it. The sending methods (`json`, `text`, `send`, ...) mark it sent and return
//! [`Flow::Halt`] so a step can finish with `return res.json(&value)`. Once sent, every
//! later write is ignored and reported through `tracing`.

use crate::body::ResponseBody;
use crate::error::Error;
use crate::middleware::Flow;
use crate::request::content;
use bytes::Bytes;
use http::header::{self, HeaderName, HeaderValue};
use http::{HeaderMap, Response, StatusCode};
use serde::Serialize;
use tracing::warn;

const TEXT_PLAIN_UTF_8: &str = "text/plain; charset=utf-8";
const APPLICATION_JSON_UTF_8: &str = "application/json; charset=utf-8";

#[derive(Debug)]
pub struct ResponseContext {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    sent: bool,
}

impl Default for ResponseContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseContext {
    pub fn new() -> Self {
        Self { status: StatusCode::OK, headers: HeaderMap::new(), body: Bytes::new(), sent: false }
    }

    fn writable(&self, operation: &str) -> bool {
        if self.sent {
            warn!(operation, "response already sent, write ignored");
        }
        !self.sent
    }

    /// Sets the status code. Chainable.
    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        if self.writable("status") {
            self.status = status;
        }
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn is_sent(&self) -> bool {
        self.sent
    }

    pub fn get_header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers.get(name.as_ref()).and_then(|value| value.to_str().ok())
    }

    /// Replaces a header. Invalid names or values are logged and skipped.
    pub fn set_header(&mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> &mut Self {
        if self.writable("set_header")
            && let Some((name, value)) = header_pair(name.as_ref(), value.as_ref())
        {
            self.headers.insert(name, value);
        }
        self
    }

    /// Adds a header value, keeping the existing ones.
    pub fn append_header(&mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> &mut Self {
        if self.writable("append_header")
            && let Some((name, value)) = header_pair(name.as_ref(), value.as_ref())
        {
            self.headers.append(name, value);
        }
        self
    }

    pub fn remove_header(&mut self, name: impl AsRef<str>) -> &mut Self {
        if self.writable("remove_header") {
            self.headers.remove(name.as_ref());
        }
        self
    }

    /// Sets `Content-Type` from a shorthand (`"json"`, `"html"`) or a full media type.
    pub fn content_type(&mut self, ty: &str) -> &mut Self {
        let media_type = if ty.contains('/') { ty } else { content::lookup(ty).unwrap_or(ty) };
        self.set_header(header::CONTENT_TYPE, media_type)
    }

    fn content_type_or(&mut self, default: &str) {
        if !self.headers.contains_key(header::CONTENT_TYPE) {
            self.set_header(header::CONTENT_TYPE, default);
        }
    }

    fn finish(&mut self, body: Bytes) -> Flow {
        self.body = body;
        self.sent = true;
        Flow::Halt
    }

    /// Serializes `value` as the JSON body and sends.
    ///
    /// A value that fails to serialize sends nothing and yields [`Flow::Error`].
    pub fn json<T: Serialize + ?Sized>(&mut self, value: &T) -> Flow {
        if !self.writable("json") {
            return Flow::Halt;
        }
        match serde_json::to_vec(value) {
            Ok(body) => {
                self.content_type_or(APPLICATION_JSON_UTF_8);
                self.finish(Bytes::from(body))
            }
            Err(e) => Flow::Error(Error::opaque(e)),
        }
    }

    /// Sends a `text/plain` body.
    pub fn text(&mut self, body: impl Into<String>) -> Flow {
        if !self.writable("text") {
            return Flow::Halt;
        }
        self.content_type_or(TEXT_PLAIN_UTF_8);
        self.finish(Bytes::from(body.into()))
    }

    /// Sends raw bytes, defaulting the content type to `application/octet-stream`.
    pub fn send(&mut self, body: impl Into<Bytes>) -> Flow {
        if !self.writable("send") {
            return Flow::Halt;
        }
        self.content_type_or(mime::APPLICATION_OCTET_STREAM.as_ref());
        self.finish(body.into())
    }

    /// Sends whatever has been set so far, with the current body.
    pub fn end(&mut self) -> Flow {
        if !self.writable("end") {
            return Flow::Halt;
        }
        let body = self.body.clone();
        self.finish(body)
    }

    /// Sends `204 No Content` with an empty body.
    pub fn no_content(&mut self) -> Flow {
        if !self.writable("no_content") {
            return Flow::Halt;
        }
        self.status = StatusCode::NO_CONTENT;
        self.headers.remove(header::CONTENT_TYPE);
        self.finish(Bytes::new())
    }

    /// Sends `status` with its reason phrase as the text body.
    pub fn send_status(&mut self, status: StatusCode) -> Flow {
        self.status(status).text(status.canonical_reason().unwrap_or_else(|| status.as_str()))
    }

    /// Sends a `302 Found` redirect to `location`.
    pub fn redirect(&mut self, location: &str) -> Flow {
        self.redirect_with(StatusCode::FOUND, location)
    }

    pub fn redirect_with(&mut self, status: StatusCode, location: &str) -> Flow {
        self.status(status).set_header(header::LOCATION, location);
        let body = format!("Redirecting to {location}");
        self.text(body)
    }

    /// Converts the buffered state into a transport response.
    pub fn into_response(self) -> Response<ResponseBody> {
        let mut response = Response::new(ResponseBody::once(self.body.clone()));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;

        if self.status != StatusCode::NO_CONTENT && self.status != StatusCode::NOT_MODIFIED {
            response.headers_mut().insert(header::CONTENT_LENGTH, HeaderValue::from(self.body.len()));
        }
        response
    }
}

fn header_pair(name: &str, value: &str) -> Option<(HeaderName, HeaderValue)> {
    match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
        (Ok(name), Ok(value)) => Some((name, value)),
        (Err(e), _) => {
            warn!(name, cause = %e, "invalid header name");
            None
        }
        (_, Err(e)) => {
            warn!(name, cause = %e, "invalid header value");
            None
        }
    }
}
