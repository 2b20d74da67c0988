use crate::handler::{Handler, into_step};
use crate::middleware::Step;
use crate::path::{ParamSet, PathMatcher, join};
use http::Method;
use tracing::trace;

/// Describes the route a request was matched against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    method: Option<Method>,
    path: String,
}

impl RouteInfo {
    /// The method of the route, `None` for routes that accept every method.
    pub fn method(&self) -> Option<&Method> {
        self.method.as_ref()
    }

    /// The pattern as registered, relative to its mount prefix.
    pub fn path(&self) -> &str {
        &self.path
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Route {
    info: RouteInfo,
    matcher: PathMatcher,
    base_url: String,
    seq: usize,
    steps: Vec<Step>,
}

impl Route {
    fn accepts(&self, method: &Method) -> bool {
        self.info.method.as_ref().is_none_or(|own| own.as_str().eq_ignore_ascii_case(method.as_str()))
    }
}

/// The outcome of a successful [`RouteTable::resolve`].
#[derive(Debug)]
pub struct RouteMatch<'t> {
    route: &'t Route,
    params: ParamSet,
}

impl<'t> RouteMatch<'t> {
    pub fn params(&self) -> &ParamSet {
        &self.params
    }

    pub fn info(&self) -> &'t RouteInfo {
        &self.route.info
    }

    /// The mount prefix the route was registered under.
    pub fn base_url(&self) -> &'t str {
        &self.route.base_url
    }

    pub(crate) fn steps(&self) -> &'t [Step] {
        &self.route.steps
    }

    /// The registration sequence number of the route within its router.
    pub(crate) fn seq(&self) -> usize {
        self.route.seq
    }

    pub(crate) fn into_params(self) -> ParamSet {
        self.params
    }
}

/// Routes in registration order.
///
/// Resolution scans the routes front to back and the first route accepting the method
/// and matching the path wins; later routes are never consulted, however specific.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `method` (every method when `None`) on `pattern`.
    pub fn register<H: Handler + 'static>(&mut self, method: Option<Method>, pattern: &str, handler: H) {
        let seq = self.routes.last().map_or(0, |route| route.seq + 1);
        self.register_steps(method, pattern, vec![into_step(handler)], seq);
    }

    pub(crate) fn register_steps(&mut self, method: Option<Method>, pattern: &str, steps: Vec<Step>, seq: usize) {
        let full = join("", pattern);
        self.routes.push(Route {
            info: RouteInfo { method, path: pattern.to_owned() },
            matcher: PathMatcher::compile(full),
            base_url: String::new(),
            seq,
            steps,
        });
    }

    /// Appends the routes of `other`, moved under the normalized prefix `mount` and with
    /// `offset` added to their sequence numbers.
    pub(crate) fn extend_mounted(&mut self, mount: &str, other: RouteTable, offset: usize) {
        for route in other.routes {
            self.routes.push(Route {
                matcher: PathMatcher::compile(join(mount, route.matcher.pattern())),
                base_url: format!("{mount}{}", route.base_url),
                seq: route.seq + offset,
                ..route
            });
        }
    }

    /// Finds the first route accepting `method` whose pattern matches `path`.
    pub fn resolve(&self, method: &Method, path: &str) -> Option<RouteMatch<'_>> {
        self.routes.iter().filter(|route| route.accepts(method)).find_map(|route| {
            let params = route.matcher.matches(path)?;
            trace!(pattern = route.matcher.pattern(), path, "route matched");
            Some(RouteMatch { route, params })
        })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
