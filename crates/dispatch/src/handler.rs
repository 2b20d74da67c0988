//! Route handlers, the last step of a matched route's chain.

use crate::middleware::{Flow, Middleware, Next, Step};
use crate::request::RequestContext;
use crate::response::ResponseContext;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

/// The terminal step of a route. It sees the request after every middleware has run and
/// is expected to send a response or fail.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, req: &mut RequestContext, res: &mut ResponseContext) -> Flow;
}

/// a `Handler` built from an async closure
pub struct FnHandler<F> {
    f: F,
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnHandler")
    }
}

/// Wraps an async closure as a [`Handler`].
///
/// ```
/// use micro_dispatch::handler_fn;
///
/// let hello = handler_fn(|_req, res| Box::pin(async move { res.text("hello") }));
/// # let _ = hello;
/// ```
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: for<'a> Fn(&'a mut RequestContext, &'a mut ResponseContext) -> BoxFuture<'a, Flow> + Send + Sync,
{
    FnHandler { f }
}

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: for<'a> Fn(&'a mut RequestContext, &'a mut ResponseContext) -> BoxFuture<'a, Flow> + Send + Sync,
{
    async fn handle(&self, req: &mut RequestContext, res: &mut ResponseContext) -> Flow {
        (self.f)(req, res).await
    }
}

/// Adapts a handler to the middleware contract; the rest of the chain is never run.
struct Endpoint<H>(H);

#[async_trait]
impl<H: Handler> Middleware for Endpoint<H> {
    async fn call(&self, req: &mut RequestContext, res: &mut ResponseContext, _next: Next<'_>) -> Flow {
        self.0.handle(req, res).await
    }
}

pub(crate) fn into_step<H: Handler + 'static>(handler: H) -> Step {
    Step::Normal(Arc::new(Endpoint(handler)))
}
