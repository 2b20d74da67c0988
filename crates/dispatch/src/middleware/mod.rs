//! Middleware chain composition and onion-model execution.
//!
//! Every step of a request's chain returns a [`Flow`] telling the executor how to proceed:
//!
//! - [`Flow::Continue`]: run the next normal step
//! - [`Flow::Error`]: skip normal steps until the next error handler
//! - [`Flow::Halt`]: stop, the response is complete
//!
//! A [`Middleware`] can also run the rest of the chain itself through [`Next::run`] and act
//! on the way back out. When it does, the executor does not run the remainder again and the
//! step's own return value becomes the outcome of the chain.
//!
//! A panic inside a step is caught and travels the error path like any returned error.

mod body_parser;
mod cors;
mod error_responder;

pub use body_parser::{BodyParser, json, text, urlencoded};
pub use cors::Cors;
pub use error_responder::{ErrorReporter, ErrorResponder};

#[cfg(test)]
pub(crate) use error_responder::MockErrorReporter;

use crate::error::Error;
use crate::path::{has_prefix, normalize_prefix};
use crate::request::RequestContext;
use crate::response::ResponseContext;
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

/// The control value returned by each step.
#[derive(Debug)]
#[must_use]
pub enum Flow {
    Continue,
    Error(Error),
    Halt,
}

impl Flow {
    pub fn is_error(&self) -> bool {
        matches!(self, Flow::Error(_))
    }
}

impl<E: Into<Error>> From<Result<(), E>> for Flow {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Flow::Continue,
            Err(e) => Flow::Error(e.into()),
        }
    }
}

/// A step of the normal request path.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn call(&self, req: &mut RequestContext, res: &mut ResponseContext, next: Next<'_>) -> Flow;
}

/// A step that only runs while an error is propagating.
///
/// Returning [`Flow::Continue`] marks the error as handled and resumes the normal path,
/// [`Flow::Error`] hands an error on to the next error handler.
#[async_trait]
pub trait ErrorMiddleware: Send + Sync {
    async fn handle_error(&self, err: Error, req: &mut RequestContext, res: &mut ResponseContext) -> Flow;
}

#[derive(Clone)]
pub(crate) enum Step {
    Normal(Arc<dyn Middleware>),
    Error(Arc<dyn ErrorMiddleware>),
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Normal(_) => f.write_str("Step::Normal"),
            Step::Error(_) => f.write_str("Step::Error"),
        }
    }
}

/// The remainder of the chain after the current step.
pub struct Next<'a> {
    rest: &'a [&'a Step],
    entered: &'a AtomicBool,
}

impl Next<'_> {
    /// Runs the rest of the chain and returns its outcome.
    pub async fn run(self, req: &mut RequestContext, res: &mut ResponseContext) -> Flow {
        self.entered.store(true, Ordering::Release);
        run_chain(self.rest, req, res, None).await
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next").field("remaining", &self.rest.len()).finish()
    }
}

async fn guarded(step: impl Future<Output = Flow>) -> Flow {
    match AssertUnwindSafe(step).catch_unwind().await {
        Ok(flow) => flow,
        Err(payload) => {
            let err = Error::from_panic(&*payload);
            warn!(cause = %err, "middleware panicked");
            Flow::Error(err)
        }
    }
}

fn run_chain<'a>(
    steps: &'a [&'a Step],
    req: &'a mut RequestContext,
    res: &'a mut ResponseContext,
    mut pending: Option<Error>,
) -> BoxFuture<'a, Flow> {
    Box::pin(async move {
        for (index, step) in steps.iter().enumerate() {
            let entered = AtomicBool::new(false);

            let flow = match (*step, pending.take()) {
                (Step::Normal(middleware), None) => {
                    let next = Next { rest: &steps[index + 1..], entered: &entered };
                    guarded(middleware.call(req, res, next)).await
                }
                (Step::Error(handler), Some(err)) => guarded(handler.handle_error(err, req, res)).await,
                (_, err) => {
                    pending = err;
                    continue;
                }
            };

            if entered.load(Ordering::Acquire) {
                return flow;
            }

            match flow {
                Flow::Continue => {}
                Flow::Error(err) => pending = Some(err),
                Flow::Halt => return Flow::Halt,
            }
        }

        pending.map_or(Flow::Continue, Flow::Error)
    })
}

/// Runs a composed chain from the start.
pub(crate) async fn execute(chain: &[&Step], req: &mut RequestContext, res: &mut ResponseContext) -> Flow {
    run_chain(chain, req, res, None).await
}

#[derive(Debug, Clone)]
struct MiddlewareEntry {
    prefix: String,
    seq: usize,
    step: Step,
}

/// Path scoped middleware in registration order.
///
/// An entry applies to a request when the request path equals its prefix or continues it
/// past a `/`; the empty and `/` prefixes apply to every path.
///
/// Each entry carries a registration sequence number shared with the routes of the same
/// router, so a request's chain keeps the order in which middleware and its route were
/// registered.
#[derive(Debug, Clone, Default)]
pub struct MiddlewareStack {
    entries: Vec<MiddlewareEntry>,
}

impl MiddlewareStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<M: Middleware + 'static>(&mut self, prefix: &str, middleware: M) {
        let seq = self.next_seq();
        self.push_step(prefix, Step::Normal(Arc::new(middleware)), seq);
    }

    pub fn push_error<H: ErrorMiddleware + 'static>(&mut self, prefix: &str, handler: H) {
        let seq = self.next_seq();
        self.push_step(prefix, Step::Error(Arc::new(handler)), seq);
    }

    fn next_seq(&self) -> usize {
        self.entries.last().map_or(0, |entry| entry.seq + 1)
    }

    pub(crate) fn push_step(&mut self, prefix: &str, step: Step, seq: usize) {
        self.entries.push(MiddlewareEntry { prefix: normalize_prefix(prefix), seq, step });
    }

    /// Appends every entry of `other` with `mount` placed in front of its prefix and `offset`
    /// added to its sequence number.
    pub(crate) fn extend_mounted(&mut self, mount: &str, other: MiddlewareStack, offset: usize) {
        for entry in other.entries {
            let prefix = format!("{mount}{}", entry.prefix);
            self.entries.push(MiddlewareEntry { prefix, seq: entry.seq + offset, step: entry.step });
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Composes the chain of a request for `path` whose route was registered as `route_seq`.
    ///
    /// The applicable entries registered before the route come first, then the route's own
    /// steps, then the applicable entries registered after it. Error handlers registered
    /// before the route are consulted once more at the very end, so they also see errors
    /// raised by the route.
    pub(crate) fn chain<'a>(&'a self, path: &str, route_seq: usize, route_steps: &'a [Step]) -> Vec<&'a Step> {
        let (before, after): (Vec<&MiddlewareEntry>, Vec<&MiddlewareEntry>) = self
            .entries
            .iter()
            .filter(|entry| has_prefix(path, &entry.prefix))
            .partition(|entry| entry.seq < route_seq);
        let fallback = before.iter().copied().filter(|entry| matches!(entry.step, Step::Error(_)));

        before
            .iter()
            .copied()
            .map(|entry| &entry.step)
            .chain(route_steps)
            .chain(after.iter().copied().map(|entry| &entry.step))
            .chain(fallback.map(|entry| &entry.step))
            .collect()
    }
}

/// Wraps an async closure as a [`Middleware`].
///
/// ```
/// use micro_dispatch::middleware::middleware_fn;
///
/// let timing = middleware_fn(|req, res, next| {
///     Box::pin(async move {
///         let flow = next.run(req, res).await;
///         res.set_header("x-handled", "1");
///         flow
///     })
/// });
/// # let _ = timing;
/// ```
pub fn middleware_fn<F>(f: F) -> FnMiddleware<F>
where
    F: for<'a> Fn(&'a mut RequestContext, &'a mut ResponseContext, Next<'a>) -> BoxFuture<'a, Flow> + Send + Sync,
{
    FnMiddleware { f }
}

/// Wraps an async closure as an [`ErrorMiddleware`].
pub fn error_handler_fn<F>(f: F) -> FnErrorMiddleware<F>
where
    F: for<'a> Fn(Error, &'a mut RequestContext, &'a mut ResponseContext) -> BoxFuture<'a, Flow> + Send + Sync,
{
    FnErrorMiddleware { f }
}

pub struct FnMiddleware<F> {
    f: F,
}

pub struct FnErrorMiddleware<F> {
    f: F,
}

impl<F> fmt::Debug for FnMiddleware<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnMiddleware")
    }
}

impl<F> fmt::Debug for FnErrorMiddleware<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnErrorMiddleware")
    }
}

#[async_trait]
impl<F> Middleware for FnMiddleware<F>
where
    F: for<'a> Fn(&'a mut RequestContext, &'a mut ResponseContext, Next<'a>) -> BoxFuture<'a, Flow> + Send + Sync,
{
    async fn call(&self, req: &mut RequestContext, res: &mut ResponseContext, next: Next<'_>) -> Flow {
        (self.f)(req, res, next).await
    }
}

#[async_trait]
impl<F> ErrorMiddleware for FnErrorMiddleware<F>
where
    F: for<'a> Fn(Error, &'a mut RequestContext, &'a mut ResponseContext) -> BoxFuture<'a, Flow> + Send + Sync,
{
    async fn handle_error(&self, err: Error, req: &mut RequestContext, res: &mut ResponseContext) -> Flow {
        (self.f)(err, req, res).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{handler_fn, into_step};
    use http::{Request, StatusCode};
    use std::sync::Mutex;

    type Journal = Arc<Mutex<Vec<String>>>;

    fn request(path: &str) -> RequestContext {
        RequestContext::new(Request::builder().uri(path).body(String::new()).unwrap())
    }

    fn record(journal: &Journal, name: &'static str) -> impl Middleware + 'static {
        let journal = Arc::clone(journal);
        middleware_fn(move |_req, _res, _next| {
            journal.lock().unwrap().push(name.to_owned());
            Box::pin(async { Flow::Continue })
        })
    }

    fn entries(journal: &Journal) -> Vec<String> {
        journal.lock().unwrap().clone()
    }

    async fn run(stack: &MiddlewareStack, path: &str) -> (Flow, ResponseContext) {
        let mut req = request(path);
        let mut res = ResponseContext::new();
        let chain = stack.chain(path, usize::MAX, &[]);
        let flow = execute(&chain, &mut req, &mut res).await;
        (flow, res)
    }

    #[tokio::test]
    async fn test_error_skips_to_error_handler() {
        let journal = Journal::default();
        let mut stack = MiddlewareStack::new();
        stack.push("/", record(&journal, "a"));
        let b = Arc::clone(&journal);
        stack.push(
            "/",
            middleware_fn(move |_req, _res, _next| {
                b.lock().unwrap().push("b".to_owned());
                Box::pin(async { Flow::Error(Error::opaque("b failed")) })
            }),
        );
        stack.push("/", record(&journal, "c"));
        let handled = Arc::clone(&journal);
        stack.push_error(
            "/",
            error_handler_fn(move |err, _req, res| {
                handled.lock().unwrap().push(format!("handler: {err}"));
                Box::pin(async move { res.status(StatusCode::INTERNAL_SERVER_ERROR).text("handled") })
            }),
        );

        let (flow, res) = run(&stack, "/").await;
        assert!(matches!(flow, Flow::Halt));
        assert_eq!(entries(&journal), vec!["a", "b", "handler: b failed"]);
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_error_handlers_are_skipped_on_normal_path() {
        let journal = Journal::default();
        let mut stack = MiddlewareStack::new();
        let handled = Arc::clone(&journal);
        stack.push_error(
            "",
            error_handler_fn(move |_err, _req, _res| {
                handled.lock().unwrap().push("error".to_owned());
                Box::pin(async { Flow::Continue })
            }),
        );
        stack.push("", record(&journal, "a"));

        let (flow, _) = run(&stack, "/x").await;
        assert!(matches!(flow, Flow::Continue));
        assert_eq!(entries(&journal), vec!["a"]);
    }

    #[tokio::test]
    async fn test_handled_error_resumes_normal_path() {
        let journal = Journal::default();
        let mut stack = MiddlewareStack::new();
        stack.push("", middleware_fn(|_req, _res, _next| Box::pin(async { Flow::Error(Error::opaque("first")) })));
        stack.push_error("", error_handler_fn(|_err, _req, _res| Box::pin(async { Flow::Continue })));
        stack.push("", record(&journal, "after"));

        let (flow, _) = run(&stack, "/").await;
        assert!(matches!(flow, Flow::Continue));
        assert_eq!(entries(&journal), vec!["after"]);
    }

    #[tokio::test]
    async fn test_unhandled_error_escapes() {
        let mut stack = MiddlewareStack::new();
        stack.push("", middleware_fn(|_req, _res, _next| Box::pin(async { Flow::Error(Error::opaque("boom")) })));

        let (flow, res) = run(&stack, "/").await;
        assert!(matches!(flow, Flow::Error(Error::Opaque(_))));
        assert!(!res.is_sent());
    }

    #[tokio::test]
    async fn test_onion_order() {
        let journal = Journal::default();
        let mut stack = MiddlewareStack::new();
        let outer = Arc::clone(&journal);
        stack.push(
            "",
            middleware_fn(move |req, res, next| {
                let outer = Arc::clone(&outer);
                Box::pin(async move {
                    outer.lock().unwrap().push("outer before".to_owned());
                    let flow = next.run(req, res).await;
                    outer.lock().unwrap().push("outer after".to_owned());
                    flow
                })
            }),
        );
        stack.push("", record(&journal, "inner"));
        let handler = into_step(handler_fn(|_req, res| Box::pin(async move { res.text("done") })));

        let mut req = request("/");
        let mut res = ResponseContext::new();
        let route_steps = [handler];
        let chain = stack.chain("/", usize::MAX, &route_steps);
        let flow = execute(&chain, &mut req, &mut res).await;

        assert!(matches!(flow, Flow::Halt));
        assert_eq!(entries(&journal), vec!["outer before", "inner", "outer after"]);
        assert!(res.is_sent());
    }

    struct Exploding;

    #[async_trait]
    impl Middleware for Exploding {
        async fn call(&self, _req: &mut RequestContext, _res: &mut ResponseContext, _next: Next<'_>) -> Flow {
            panic!("step exploded")
        }
    }

    #[tokio::test]
    async fn test_panic_becomes_error() {
        let mut stack = MiddlewareStack::new();
        stack.push("", Exploding);
        stack.push_error(
            "",
            error_handler_fn(|err, _req, res| Box::pin(async move { res.text(err.to_string()) })),
        );

        let (flow, res) = run(&stack, "/").await;
        assert!(matches!(flow, Flow::Halt));
        assert_eq!(res.body().as_ref(), b"step exploded");
    }

    #[tokio::test]
    async fn test_prefix_scoping() {
        let journal = Journal::default();
        let mut stack = MiddlewareStack::new();
        stack.push("/api", record(&journal, "api"));
        stack.push("/", record(&journal, "all"));
        stack.push("/admin/", record(&journal, "admin"));

        let _ = run(&stack, "/api/users").await;
        let _ = run(&stack, "/apis").await;
        let _ = run(&stack, "/admin").await;
        assert_eq!(entries(&journal), vec!["api", "all", "all", "all", "admin"]);
    }

    #[test]
    fn test_chain_keeps_registration_order_around_route() {
        let pass = || Step::Normal(Arc::new(middleware_fn(|_req, _res, _next| Box::pin(async { Flow::Continue }))));
        let recover = || Step::Error(Arc::new(error_handler_fn(|_err, _req, _res| Box::pin(async { Flow::Continue }))));

        let mut stack = MiddlewareStack::new();
        stack.push_step("/", pass(), 0);
        stack.push_step("/", recover(), 1);
        stack.push_step("/other", pass(), 3);
        stack.push_step("/", pass(), 4);
        stack.push_step("/", recover(), 5);
        let route_steps = [into_step(handler_fn(|_req, res| Box::pin(async move { res.end() })))];

        let chain = stack.chain("/users", 2, &route_steps);
        assert_eq!(chain.len(), 6);
        assert!(std::ptr::eq(chain[0], &stack.entries[0].step));
        assert!(std::ptr::eq(chain[1], &stack.entries[1].step));
        assert!(std::ptr::eq(chain[2], &route_steps[0]));
        assert!(std::ptr::eq(chain[3], &stack.entries[3].step));
        assert!(std::ptr::eq(chain[4], &stack.entries[4].step));
        assert!(std::ptr::eq(chain[5], &stack.entries[1].step));
    }

    #[tokio::test]
    async fn test_mounted_prefixes() {
        let mut inner = MiddlewareStack::new();
        inner.push("/", middleware_fn(|_req, _res, _next| Box::pin(async { Flow::Continue })));
        inner.push("/users", middleware_fn(|_req, _res, _next| Box::pin(async { Flow::Continue })));

        let mut outer = MiddlewareStack::new();
        outer.extend_mounted("/api", inner, 0);
        assert_eq!(outer.len(), 2);
        assert_eq!(outer.chain("/api/users/1", usize::MAX, &[]).len(), 2);
        assert_eq!(outer.chain("/api/posts", usize::MAX, &[]).len(), 1);
        assert!(outer.chain("/users", usize::MAX, &[]).is_empty());
    }
}
