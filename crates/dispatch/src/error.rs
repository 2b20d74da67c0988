//! Error types flowing through the dispatch pipeline.
//!
//! Every failure raised by a middleware step, a body parser or a route handler is
//! represented by the closed [`Error`] enum. Error-handling middleware branch on it with
//! plain pattern matching:
//!
//! - [`Error::Http`]: an application error carrying an explicit status and message
//! - [`Error::PayloadTooLarge`]: a body exceeded the configured parser limit
//! - [`Error::BadRequest`]: a body could not be decoded in the declared format
//! - [`Error::Opaque`]: anything else, surfaced as `500 Internal Server Error`

use http::StatusCode;
use std::any::Any;
use thiserror::Error;

/// A type-erased error, used for failures the framework does not classify.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// An application level HTTP error: a status code plus a client facing message.
///
/// # Example
/// ```
/// use micro_dispatch::HttpError;
/// use http::StatusCode;
///
/// let err = HttpError::new(StatusCode::FORBIDDEN, "Forbidden");
/// assert_eq!(err.status(), StatusCode::FORBIDDEN);
/// assert_eq!(err.message(), "Forbidden");
/// ```
#[derive(Debug, Clone, Error)]
#[error("{status}: {message}")]
pub struct HttpError {
    status: StatusCode,
    message: String,
}

impl HttpError {
    pub fn new<S: Into<String>>(status: StatusCode, message: S) -> Self {
        Self { status, message: message.into() }
    }

    /// Builds an error whose message is the canonical reason phrase of `status`.
    pub fn from_status(status: StatusCode) -> Self {
        Self::new(status, status.canonical_reason().unwrap_or("Unknown Status"))
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("request entity too large: {length} bytes exceed the limit {limit}")]
    PayloadTooLarge { limit: usize, length: usize },

    #[error("invalid body: {reason}")]
    BadRequest { reason: String },

    #[error("{0}")]
    Opaque(BoxError),
}

impl Error {
    pub fn http<S: Into<String>>(status: StatusCode, message: S) -> Self {
        Self::Http(HttpError::new(status, message))
    }

    pub fn payload_too_large(limit: usize, length: usize) -> Self {
        Self::PayloadTooLarge { limit, length }
    }

    pub fn bad_request<S: ToString>(reason: S) -> Self {
        Self::BadRequest { reason: reason.to_string() }
    }

    pub fn opaque<E: Into<BoxError>>(e: E) -> Self {
        Self::Opaque(e.into())
    }

    /// Converts the payload of a caught panic into an opaque error.
    pub(crate) fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "middleware panicked".to_owned());
        Self::Opaque(message.into())
    }

    /// The status an error responder should answer with.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Http(e) => e.status(),
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::Opaque(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this error was classified by the framework or the application.
    pub fn is_typed(&self) -> bool {
        !matches!(self, Error::Opaque(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::bad_request(e)
    }
}

impl From<serde_urlencoded::de::Error> for Error {
    fn from(e: serde_urlencoded::de::Error) -> Self {
        Error::bad_request(e)
    }
}
