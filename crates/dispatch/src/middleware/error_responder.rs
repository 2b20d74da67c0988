use crate::error::Error;
use crate::middleware::{ErrorMiddleware, Flow};
use crate::request::RequestContext;
use crate::response::ResponseContext;
use async_trait::async_trait;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Receives the errors [`ErrorResponder`] could not classify, before it responds.
#[cfg_attr(test, mockall::automock)]
pub trait ErrorReporter: Send + Sync {
    fn report(&self, err: &Error);
}

impl<F> ErrorReporter for F
where
    F: Fn(&Error) + Send + Sync,
{
    fn report(&self, err: &Error) {
        self(err);
    }
}

/// Turns a propagating error into a JSON response `{"error": message}`.
///
/// The status is the one the error carries, see [`Error::status`]. Opaque errors answer
/// `500` with their message and are handed to the reporter, if any, exactly once.
#[derive(Clone, Default)]
pub struct ErrorResponder {
    reporter: Option<Arc<dyn ErrorReporter>>,
}

impl fmt::Debug for ErrorResponder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorResponder").field("reporter", &self.reporter.is_some()).finish()
    }
}

impl ErrorResponder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reporter<R: ErrorReporter + 'static>(reporter: R) -> Self {
        Self { reporter: Some(Arc::new(reporter)) }
    }
}

#[async_trait]
impl ErrorMiddleware for ErrorResponder {
    async fn handle_error(&self, err: Error, _req: &mut RequestContext, res: &mut ResponseContext) -> Flow {
        if res.is_sent() {
            warn!(cause = %err, "error raised after the response was sent");
            return Flow::Error(err);
        }

        if !err.is_typed()
            && let Some(reporter) = &self.reporter
        {
            reporter.report(&err);
        }

        let message = match &err {
            Error::Http(e) => e.message().to_owned(),
            other => other.to_string(),
        };
        res.status(err.status()).json(&json!({ "error": message }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HttpError;
    use http::{Request, StatusCode};

    fn contexts() -> (RequestContext, ResponseContext) {
        let req = RequestContext::new(Request::builder().uri("/").body(String::new()).unwrap());
        (req, ResponseContext::new())
    }

    #[tokio::test]
    async fn test_http_error_keeps_status_and_message() {
        let mut reporter = MockErrorReporter::new();
        reporter.expect_report().never();
        let responder = ErrorResponder::with_reporter(reporter);

        let (mut req, mut res) = contexts();
        let err = HttpError::new(StatusCode::FORBIDDEN, "Forbidden").into();
        let flow = responder.handle_error(err, &mut req, &mut res).await;

        assert!(matches!(flow, Flow::Halt));
        assert_eq!(res.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(res.body().as_ref(), br#"{"error":"Forbidden"}"#);
    }

    #[tokio::test]
    async fn test_opaque_error_is_reported_once() {
        let mut reporter = MockErrorReporter::new();
        reporter.expect_report().withf(|err| err.to_string() == "database is down").times(1).return_const(());
        let responder = ErrorResponder::with_reporter(reporter);

        let (mut req, mut res) = contexts();
        let _ = responder.handle_error(Error::opaque("database is down"), &mut req, &mut res).await;

        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.body().as_ref(), br#"{"error":"database is down"}"#);
    }

    #[tokio::test]
    async fn test_payload_too_large() {
        let (mut req, mut res) = contexts();
        let _ = ErrorResponder::new().handle_error(Error::payload_too_large(4, 10), &mut req, &mut res).await;
        assert_eq!(res.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_sent_response_passes_error_on() {
        let (mut req, mut res) = contexts();
        let _ = res.text("already");

        let flow = ErrorResponder::new().handle_error(Error::opaque("late"), &mut req, &mut res).await;
        assert!(flow.is_error());
        assert_eq!(res.body().as_ref(), b"already");
    }

    #[test]
    fn test_closure_reporter() {
        let reporter = |err: &Error| assert!(!err.is_typed());
        reporter.report(&Error::opaque("x"));
    }
}
