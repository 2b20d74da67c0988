//! Application composition: routes, path scoped middleware and mounted sub-routers.
//!
//! ```
//! use micro_dispatch::router::{Router, get, post};
//! use micro_dispatch::{handler_fn, middleware};
//!
//! let users = Router::new()
//!     .route("/", get(handler_fn(|_req, res| Box::pin(async move { res.json(&["john"]) }))))
//!     .route("/", post(handler_fn(|req, res| Box::pin(async move { res.json(&req.body()) }))).with(middleware::json()));
//!
//! let app = Router::new().mount("/users", users);
//! assert_eq!(app.routes().len(), 2);
//! ```

mod table;

pub use table::{RouteInfo, RouteMatch, RouteTable};

use crate::handler::{Handler, into_step};
use crate::middleware::{ErrorMiddleware, Middleware, MiddlewareStack, Step};
use crate::path::normalize_prefix;
use http::Method;
use std::sync::Arc;

/// A composable set of routes and middleware.
///
/// Routes and middleware share one registration order: middleware registered before a
/// route runs before its handler, middleware registered after it runs after. Error
/// handlers see errors raised by any route under their prefix, wherever they were
/// registered. Mounting a router appends its routes and middleware, moved under the mount
/// prefix, at the current position.
#[derive(Debug, Clone, Default)]
pub struct Router {
    routes: RouteTable,
    middleware: MiddlewareStack,
    next_seq: usize,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&mut self) -> usize {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Registers a route on `pattern`; see [`get`], [`post`] and friends.
    pub fn route(mut self, pattern: &str, route: RouteBuilder) -> Self {
        let (method, steps) = route.build();
        let seq = self.bump();
        self.routes.register_steps(method, pattern, steps, seq);
        self
    }

    /// Adds middleware for every path under `prefix` (`"/"` for all paths).
    pub fn middleware<M: Middleware + 'static>(mut self, prefix: &str, middleware: M) -> Self {
        let seq = self.bump();
        self.middleware.push_step(prefix, Step::Normal(Arc::new(middleware)), seq);
        self
    }

    /// Adds an error handler for every path under `prefix`.
    pub fn error_handler<H: ErrorMiddleware + 'static>(mut self, prefix: &str, handler: H) -> Self {
        let seq = self.bump();
        self.middleware.push_step(prefix, Step::Error(Arc::new(handler)), seq);
        self
    }

    /// Attaches `router` under `prefix`. Its requests see `prefix` as their base url.
    pub fn mount(mut self, prefix: &str, router: Router) -> Self {
        let prefix = normalize_prefix(prefix);
        let offset = self.next_seq;
        self.routes.extend_mounted(&prefix, router.routes, offset);
        self.middleware.extend_mounted(&prefix, router.middleware, offset);
        self.next_seq += router.next_seq;
        self
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn middleware_stack(&self) -> &MiddlewareStack {
        &self.middleware
    }

    pub(crate) fn into_parts(self) -> (RouteTable, MiddlewareStack) {
        (self.routes, self.middleware)
    }
}

/// A route under construction: its method, its own middleware, its handler and its own
/// error handlers.
#[derive(Debug)]
pub struct RouteBuilder {
    method: Option<Method>,
    layers: Vec<Step>,
    handler: Step,
    error_handlers: Vec<Step>,
}

impl RouteBuilder {
    /// Adds middleware that only runs for this route, after the path scoped middleware.
    pub fn with<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.layers.push(Step::Normal(Arc::new(middleware)));
        self
    }

    /// Adds an error handler that only runs for this route, after its handler.
    pub fn with_error_handler<H: ErrorMiddleware + 'static>(mut self, handler: H) -> Self {
        self.error_handlers.push(Step::Error(Arc::new(handler)));
        self
    }

    fn build(self) -> (Option<Method>, Vec<Step>) {
        let mut steps = self.layers;
        steps.push(self.handler);
        steps.extend(self.error_handlers);
        (self.method, steps)
    }
}

/// A route for an arbitrary, possibly non standard, method.
pub fn on<H: Handler + 'static>(method: Method, handler: H) -> RouteBuilder {
    RouteBuilder { method: Some(method), layers: Vec::new(), handler: into_step(handler), error_handlers: Vec::new() }
}

/// A route accepting every method.
pub fn all<H: Handler + 'static>(handler: H) -> RouteBuilder {
    RouteBuilder { method: None, layers: Vec::new(), handler: into_step(handler), error_handlers: Vec::new() }
}

macro_rules! method_route {
    ($method:ident, $method_const:ident) => {
        pub fn $method<H: Handler + 'static>(handler: H) -> RouteBuilder {
            on(Method::$method_const, handler)
        }
    };
}

method_route!(get, GET);
method_route!(post, POST);
method_route!(put, PUT);
method_route!(delete, DELETE);
method_route!(head, HEAD);
method_route!(options, OPTIONS);
method_route!(connect, CONNECT);
method_route!(patch, PATCH);
method_route!(trace, TRACE);
