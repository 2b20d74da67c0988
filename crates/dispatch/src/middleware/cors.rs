//! Cross-origin resource sharing headers.
//!
//! [`Cors`] decorates every response passing through it. An `OPTIONS` request that reaches
//! it is answered as a preflight with `204 No Content`; it does not register `OPTIONS`
//! routes itself, so a preflight for a path without any `OPTIONS` route still ends in 404
//! unless a catch-all route is registered.

use crate::middleware::{Flow, Middleware, Next};
use crate::request::RequestContext;
use crate::response::ResponseContext;
use async_trait::async_trait;
use http::{Method, header};
use std::time::Duration;

const DEFAULT_METHODS: [Method; 6] = [Method::GET, Method::HEAD, Method::PUT, Method::PATCH, Method::POST, Method::DELETE];

#[derive(Debug, Clone)]
enum AllowedOrigins {
    Any,
    List(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct Cors {
    origins: AllowedOrigins,
    methods: Vec<Method>,
    allowed_headers: Option<Vec<String>>,
    expose_headers: Vec<String>,
    credentials: bool,
    max_age: Option<Duration>,
}

impl Default for Cors {
    fn default() -> Self {
        Self {
            origins: AllowedOrigins::Any,
            methods: DEFAULT_METHODS.to_vec(),
            allowed_headers: None,
            expose_headers: Vec::new(),
            credentials: false,
            max_age: None,
        }
    }
}

impl Cors {
    /// Any origin, the usual methods, request headers reflected on preflight.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the allowed origins. The first call replaces the "any origin" default.
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        if let AllowedOrigins::List(origins) = &mut self.origins {
            origins.push(origin.into());
        } else {
            self.origins = AllowedOrigins::List(vec![origin.into()]);
        }
        self
    }

    pub fn allow_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }

    pub fn allow_headers<S: Into<String>>(mut self, headers: impl IntoIterator<Item = S>) -> Self {
        self.allowed_headers = Some(headers.into_iter().map(Into::into).collect());
        self
    }

    pub fn expose_headers<S: Into<String>>(mut self, headers: impl IntoIterator<Item = S>) -> Self {
        self.expose_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    pub fn allow_credentials(mut self, credentials: bool) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    fn allow_origin_value<'r>(&self, origin: Option<&'r str>) -> Option<&'r str> {
        match &self.origins {
            AllowedOrigins::Any => Some("*"),
            AllowedOrigins::List(origins) => origin.filter(|origin| origins.iter().any(|allowed| allowed.as_str() == *origin)),
        }
    }

    fn join(values: impl IntoIterator<Item = impl AsRef<str>>) -> String {
        values.into_iter().map(|value| value.as_ref().to_owned()).collect::<Vec<_>>().join(",")
    }
}

#[async_trait]
impl Middleware for Cors {
    async fn call(&self, req: &mut RequestContext, res: &mut ResponseContext, _next: Next<'_>) -> Flow {
        if let AllowedOrigins::List(_) = self.origins {
            res.append_header(header::VARY, "Origin");
        }
        if let Some(origin) = self.allow_origin_value(req.get(header::ORIGIN.as_str())) {
            res.set_header(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        }
        if self.credentials {
            res.set_header(header::ACCESS_CONTROL_ALLOW_CREDENTIALS, "true");
        }

        if req.method() != Method::OPTIONS {
            if !self.expose_headers.is_empty() {
                res.set_header(header::ACCESS_CONTROL_EXPOSE_HEADERS, Self::join(&self.expose_headers));
            }
            return Flow::Continue;
        }

        res.set_header(header::ACCESS_CONTROL_ALLOW_METHODS, Self::join(self.methods.iter().map(Method::as_str)));
        let allowed_headers = match &self.allowed_headers {
            Some(headers) => Some(Self::join(headers)),
            None => req.get(header::ACCESS_CONTROL_REQUEST_HEADERS.as_str()).map(str::to_owned),
        };
        if let Some(allowed_headers) = allowed_headers {
            res.set_header(header::ACCESS_CONTROL_ALLOW_HEADERS, allowed_headers);
        }
        if let Some(max_age) = self.max_age {
            res.set_header(header::ACCESS_CONTROL_MAX_AGE, max_age.as_secs().to_string());
        }
        res.no_content()
    }
}
