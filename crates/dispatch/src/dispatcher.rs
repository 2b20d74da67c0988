//! The entry point turning one transport request into one transport response.
//!
//! Per request the [`Dispatcher`] moves through `matching → executing → responded`:
//!
//! 1. the request is wrapped in a [`RequestContext`] and the client address is resolved
//!    according to the trust proxy setting
//! 2. the route table is consulted; an unmatched request is answered `404` without running
//!    any middleware
//! 3. the middleware scoped to the path, the route's own middleware and its handler run as
//!    one chain
//! 4. the [`ResponseContext`] is materialized. An error nothing handled becomes a generic
//!    `500`, a chain that finished without sending becomes a `404`
//!
//! Routes, middleware and configuration are fixed when the dispatcher is built and only
//! read afterwards, so one dispatcher can serve any number of concurrent requests.

use crate::body::ResponseBody;
use crate::config::{AppConfig, BodyLimits};
use crate::error::BoxError;
use crate::middleware::{self, ErrorMiddleware, Flow, Middleware, MiddlewareStack};
use crate::request::RequestContext;
use crate::response::ResponseContext;
use crate::router::{RouteBuilder, RouteTable, Router};
use crate::trust_proxy::{self, TrustProxy};
use bytes::Bytes;
use http::{Method, Request, Response, StatusCode};
use http_body::Body as HttpBody;
use std::net::SocketAddr;
use tracing::{debug, error, warn};

pub struct DispatcherBuilder {
    config: AppConfig,
    router: Router,
}

impl DispatcherBuilder {
    fn new() -> Self {
        Self { config: AppConfig::default(), router: Router::new() }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    pub fn trust_proxy(mut self, trust_proxy: impl Into<TrustProxy>) -> Self {
        self.config.trust_proxy = trust_proxy.into();
        self
    }

    pub fn body_limits(mut self, body_limits: BodyLimits) -> Self {
        self.config.body_limits = body_limits;
        self
    }

    pub fn route(mut self, pattern: &str, route: RouteBuilder) -> Self {
        self.router = self.router.route(pattern, route);
        self
    }

    pub fn middleware<M: Middleware + 'static>(mut self, prefix: &str, middleware: M) -> Self {
        self.router = self.router.middleware(prefix, middleware);
        self
    }

    pub fn error_handler<H: ErrorMiddleware + 'static>(mut self, prefix: &str, handler: H) -> Self {
        self.router = self.router.error_handler(prefix, handler);
        self
    }

    pub fn mount(mut self, prefix: &str, router: Router) -> Self {
        self.router = self.router.mount(prefix, router);
        self
    }

    /// Appends the routes and middleware of `router` at the top level.
    pub fn router(self, router: Router) -> Self {
        self.mount("/", router)
    }

    pub fn build(self) -> Dispatcher {
        let (routes, middleware) = self.router.into_parts();
        debug!(routes = routes.len(), middleware = middleware.len(), trust_proxy = ?self.config.trust_proxy, "dispatcher built");
        Dispatcher { config: self.config, routes, middleware }
    }
}

impl std::fmt::Debug for DispatcherBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherBuilder").field("config", &self.config).finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct Dispatcher {
    config: AppConfig,
    routes: RouteTable,
    middleware: MiddlewareStack,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Handles one request. Every request gets a response, failures included.
    ///
    /// `peer` is the address of the connection the request arrived on; without it the
    /// client address is only known from trusted forwarding headers.
    pub async fn dispatch<B>(&self, request: Request<B>, peer: Option<SocketAddr>) -> Response<ResponseBody>
    where
        B: HttpBody<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        let mut req = RequestContext::new(request);
        let peer = peer.map(|address| address.ip().to_string()).unwrap_or_default();
        let forwarded_for = trust_proxy::forwarded_for(req.headers());
        let client = trust_proxy::resolve(&peer, forwarded_for.as_deref(), &self.config.trust_proxy);
        req.configure(self.config.body_limits, self.config.trust_proxy.is_enabled(), client);

        let is_head = req.method() == Method::HEAD;
        let path = req.path().to_owned();

        let Some(matched) = self.routes.resolve(req.method(), &path) else {
            debug!(method = %req.method(), %path, "no route matched");
            return not_found();
        };
        let chain = self.middleware.chain(&path, matched.seq(), matched.steps());
        let (info, base_url) = (matched.info().clone(), matched.base_url());
        req.set_route(info, matched.into_params(), base_url);

        let mut res = ResponseContext::new();
        let flow = middleware::execute(&chain, &mut req, &mut res).await;

        let response = match flow {
            Flow::Error(e) if res.is_sent() => {
                error!(cause = %e, %path, "error escaped after the response was sent");
                res.into_response()
            }
            Flow::Error(e) => {
                error!(cause = %e, %path, "unhandled error");
                internal_server_error()
            }
            _ if res.is_sent() => res.into_response(),
            Flow::Halt => {
                warn!(%path, "chain halted without sending a response");
                res.into_response()
            }
            Flow::Continue => {
                debug!(%path, "chain finished without sending a response");
                not_found()
            }
        };

        if is_head { response.map(|_| ResponseBody::empty()) } else { response }
    }
}

fn plain(status: StatusCode) -> Response<ResponseBody> {
    let mut res = ResponseContext::new();
    let _ = res.send_status(status);
    res.into_response()
}

fn not_found() -> Response<ResponseBody> {
    plain(StatusCode::NOT_FOUND)
}

fn internal_server_error() -> Response<ResponseBody> {
    plain(StatusCode::INTERNAL_SERVER_ERROR)
}
