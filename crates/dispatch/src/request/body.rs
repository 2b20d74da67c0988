//! One-shot request body buffering and the built-in body formats.

use crate::error::{BoxError, Error};
use bytes::{Bytes, BytesMut};
use http_body::Body as HttpBody;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty};
use serde_json::{Map, Value};
use std::fmt;

/// The body formats the context knows how to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Json,
    Urlencoded,
    Text,
}

impl BodyKind {
    /// The content type shorthand a request must carry for this parser to run.
    pub fn shorthand(self) -> &'static str {
        match self {
            BodyKind::Json => "json",
            BodyKind::Urlencoded => "urlencoded",
            BodyKind::Text => "text",
        }
    }

    /// Decodes raw bytes. An empty JSON or urlencoded body decodes to an empty object.
    pub fn parse(self, raw: &[u8]) -> Result<Value, Error> {
        match self {
            BodyKind::Json if raw.iter().all(u8::is_ascii_whitespace) => Ok(Value::Object(Map::new())),
            BodyKind::Json => Ok(serde_json::from_slice(raw)?),
            BodyKind::Urlencoded => {
                let pairs = serde_urlencoded::from_bytes::<Vec<(String, String)>>(raw)?;
                Ok(Value::Object(pairs_to_object(pairs)))
            }
            BodyKind::Text => match std::str::from_utf8(raw) {
                Ok(s) => Ok(Value::String(s.to_owned())),
                Err(_) => Err(Error::bad_request("request body is not utf8")),
            },
        }
    }
}

/// Folds decoded pairs into an object; a repeated key collects its values into an array.
pub(crate) fn pairs_to_object(pairs: Vec<(String, String)>) -> Map<String, Value> {
    let mut object = Map::new();
    for (key, value) in pairs {
        match object.get_mut(&key) {
            Some(Value::Array(values)) => values.push(Value::String(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value)]);
            }
            None => {
                object.insert(key, Value::String(value));
            }
        }
    }
    object
}

enum State {
    Unread(BoxBody<Bytes, BoxError>),
    Read(Bytes),
    TooLarge { length: usize },
    Failed(String),
}

/// The request body, read from the transport at most once.
///
/// The first successful read is buffered and every later read is served from that buffer.
/// A read that fails leaves the body in the failed state, later reads report the same
/// failure rather than touching the stream again.
pub struct RequestBody {
    state: State,
}

impl RequestBody {
    pub fn new<B>(body: B) -> Self
    where
        B: HttpBody<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        Self { state: State::Unread(body.map_err(Into::into).boxed()) }
    }

    pub fn empty() -> Self {
        Self::new(Empty::<Bytes>::new())
    }

    /// Whether the underlying stream has been consumed.
    pub fn is_consumed(&self) -> bool {
        !matches!(self.state, State::Unread(_))
    }

    /// Buffers the whole body, failing with [`Error::PayloadTooLarge`] past `limit` bytes.
    ///
    /// A declared `Content-Length` above the limit is rejected without reading the stream.
    pub async fn read(&mut self, limit: usize, declared_length: Option<usize>) -> Result<&Bytes, Error> {
        if let State::Unread(_) = self.state {
            let unread = std::mem::replace(&mut self.state, State::Failed(String::new()));
            self.state = match (unread, declared_length.filter(|length| *length > limit)) {
                (_, Some(length)) => State::TooLarge { length },
                (State::Unread(body), None) => collect(body, limit).await,
                (other, None) => other,
            };
        }

        match &self.state {
            State::Read(bytes) if bytes.len() > limit => Err(Error::payload_too_large(limit, bytes.len())),
            State::Read(bytes) => Ok(bytes),
            State::TooLarge { length } => Err(Error::payload_too_large(limit, *length)),
            State::Failed(reason) => Err(Error::bad_request(reason)),
            State::Unread(_) => Err(Error::bad_request("request body could not be read")),
        }
    }
}

async fn collect(mut body: BoxBody<Bytes, BoxError>, limit: usize) -> State {
    let mut buf = BytesMut::new();
    while let Some(frame) = body.frame().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => return State::Failed(e.to_string()),
        };
        if let Ok(data) = frame.into_data() {
            if buf.len() + data.len() > limit {
                return State::TooLarge { length: buf.len() + data.len() };
            }
            buf.extend_from_slice(&data);
        }
    }
    State::Read(buf.freeze())
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            State::Unread(_) => "Unread",
            State::Read(_) => "Read",
            State::TooLarge { .. } => "TooLarge",
            State::Failed(_) => "Failed",
        };
        f.debug_struct("RequestBody").field("state", &state).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use http_body::Frame;
    use http_body_util::StreamBody;
    use std::io;

    #[tokio::test]
    async fn test_read_is_cached() {
        let mut body = RequestBody::new(String::from("hello"));
        assert!(!body.is_consumed());

        assert_eq!(body.read(100, None).await.unwrap(), &Bytes::from("hello"));
        assert!(body.is_consumed());
        assert_eq!(body.read(100, None).await.unwrap(), &Bytes::from("hello"));
    }

    #[tokio::test]
    async fn test_declared_length_over_limit_is_rejected() {
        let mut body = RequestBody::new(String::from("hello"));
        let err = body.read(3, Some(5)).await.unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge { limit: 3, length: 5 }));
        assert!(matches!(body.read(10, None).await, Err(Error::PayloadTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_streamed_body_over_limit_is_rejected() {
        let chunks: Vec<Result<_, io::Error>> =
            vec![Ok(Frame::data(Bytes::from("abc"))), Ok(Frame::data(Bytes::from("def")))];
        let mut body = RequestBody::new(StreamBody::new(stream::iter(chunks)));

        let err = body.read(4, None).await.unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge { limit: 4, length: 6 }));
    }

    #[tokio::test]
    async fn test_cached_body_respects_smaller_limit() {
        let mut body = RequestBody::new(String::from("hello"));
        body.read(10, None).await.unwrap();
        assert!(matches!(body.read(2, None).await, Err(Error::PayloadTooLarge { limit: 2, length: 5 })));
    }

    #[tokio::test]
    async fn test_stream_error_is_bad_request() {
        let chunks: Vec<Result<Frame<Bytes>, io::Error>> = vec![Err(io::Error::other("connection reset"))];
        let mut body = RequestBody::new(StreamBody::new(stream::iter(chunks)));

        let err = body.read(10, None).await.unwrap_err();
        assert!(matches!(err, Error::BadRequest { ref reason } if reason == "connection reset"));
    }

    #[test]
    fn test_parse_formats() {
        let value = BodyKind::Json.parse(br#"{"name":"John"}"#).unwrap();
        assert_eq!(value, serde_json::json!({"name": "John"}));

        assert_eq!(BodyKind::Json.parse(b"  ").unwrap(), serde_json::json!({}));
        assert!(matches!(BodyKind::Json.parse(b"{oops"), Err(Error::BadRequest { .. })));

        let value = BodyKind::Urlencoded.parse(b"name=John&tag=a&tag=b&tag=c").unwrap();
        assert_eq!(value, serde_json::json!({"name": "John", "tag": ["a", "b", "c"]}));

        assert_eq!(BodyKind::Text.parse(b"plain").unwrap(), Value::String("plain".into()));
        assert!(matches!(BodyKind::Text.parse(&[0xff, 0xfe]), Err(Error::BadRequest { .. })));
    }
}
