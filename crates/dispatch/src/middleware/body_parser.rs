use crate::middleware::{Flow, Middleware, Next};
use crate::request::{BodyKind, RequestContext};
use crate::response::ResponseContext;
use async_trait::async_trait;
use tracing::debug;

/// Parses the request body into [`RequestContext::body`] when the content type matches.
///
/// Requests of another content type pass through untouched. Oversized or malformed bodies
/// fail the step with [`crate::Error::PayloadTooLarge`] or [`crate::Error::BadRequest`].
#[derive(Debug, Clone, Copy)]
pub struct BodyParser {
    kind: BodyKind,
    limit: Option<usize>,
}

impl BodyParser {
    pub fn new(kind: BodyKind) -> Self {
        Self { kind, limit: None }
    }

    /// Overrides the configured byte limit for this parser.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A parser for `application/json` bodies.
pub fn json() -> BodyParser {
    BodyParser::new(BodyKind::Json)
}

/// A parser for `application/x-www-form-urlencoded` bodies.
pub fn urlencoded() -> BodyParser {
    BodyParser::new(BodyKind::Urlencoded)
}

/// A parser for `text/plain` bodies.
pub fn text() -> BodyParser {
    BodyParser::new(BodyKind::Text)
}

#[async_trait]
impl Middleware for BodyParser {
    async fn call(&self, req: &mut RequestContext, _res: &mut ResponseContext, _next: Next<'_>) -> Flow {
        match req.parse_body(self.kind, self.limit).await {
            Ok(Some(_)) => {
                debug!(kind = ?self.kind, "request body parsed");
                Flow::Continue
            }
            Ok(None) => Flow::Continue,
            Err(e) => Flow::Error(e),
        }
    }
}
