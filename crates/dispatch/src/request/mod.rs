//! Request handling module that provides access to HTTP request information.
//!
//! [`RequestContext`] wraps one immutable request head together with the fields the
//! framework assigns while dispatching:
//! - route parameters, mount prefix (`base_url`) and the matched route descriptor
//! - the client address resolved through the trust proxy policy
//! - [`Locals`], a per request key/value store
//! - a lazily parsed query map and a one-shot, size limited body cache

mod body;
pub mod content;
mod locals;

pub use body::{BodyKind, RequestBody};
pub use locals::Locals;

use crate::config::BodyLimits;
use crate::error::{BoxError, Error};
use crate::path::ParamSet;
use crate::router::RouteInfo;
use crate::trust_proxy::ClientAddress;
use bytes::Bytes;
use http::request::Parts;
use http::{HeaderMap, Method, Request, Uri, Version, header};
use http_body::Body as HttpBody;
use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::net::IpAddr;

/// Represents the context of one HTTP request as seen by middleware and handlers.
#[derive(Debug)]
pub struct RequestContext {
    head: Parts,
    params: ParamSet,
    base_url: String,
    route: Option<RouteInfo>,
    locals: Locals,
    client: ClientAddress,
    trust_proxy: bool,
    limits: BodyLimits,
    query: OnceCell<Vec<(String, String)>>,
    body: RequestBody,
    parsed: Option<(BodyKind, Value)>,
    body_parsed: bool,
}

impl RequestContext {
    /// Creates a context with default settings from a transport level request.
    pub fn new<B>(request: Request<B>) -> Self
    where
        B: HttpBody<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        let (head, body) = request.into_parts();
        Self::from_parts(head, RequestBody::new(body))
    }

    pub fn from_parts(head: Parts, body: RequestBody) -> Self {
        Self {
            head,
            params: ParamSet::empty(),
            base_url: String::new(),
            route: None,
            locals: Locals::default(),
            client: ClientAddress::default(),
            trust_proxy: false,
            limits: BodyLimits::default(),
            query: OnceCell::new(),
            body,
            parsed: None,
            body_parsed: false,
        }
    }

    pub(crate) fn configure(&mut self, limits: BodyLimits, trust_proxy: bool, client: ClientAddress) {
        self.limits = limits;
        self.trust_proxy = trust_proxy;
        self.client = client;
    }

    pub(crate) fn set_route(&mut self, route: RouteInfo, params: ParamSet, base_url: &str) {
        self.route = Some(route);
        self.params = params;
        base_url.clone_into(&mut self.base_url);
    }

    /// Returns the HTTP method of the request
    pub fn method(&self) -> &Method {
        &self.head.method
    }

    /// Returns the URI of the request
    pub fn uri(&self) -> &Uri {
        &self.head.uri
    }

    /// Returns the HTTP version of the request
    pub fn version(&self) -> Version {
        self.head.version
    }

    /// Returns the HTTP headers of the request
    pub fn headers(&self) -> &HeaderMap {
        &self.head.headers
    }

    /// The request path, without the query string.
    pub fn path(&self) -> &str {
        self.head.uri.path()
    }

    /// The path and query exactly as requested.
    pub fn original_url(&self) -> &str {
        self.head.uri.path_and_query().map_or_else(|| self.head.uri.path(), |pq| pq.as_str())
    }

    /// Case-insensitive header lookup. `Referer` and `Referrer` are interchangeable.
    ///
    /// Returns `None` when the header is absent or not visible ASCII.
    pub fn get(&self, name: &str) -> Option<&str> {
        let name = if name.eq_ignore_ascii_case("referrer") { "referer" } else { name };
        self.head.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Alias of [`RequestContext::get`].
    pub fn header(&self, name: &str) -> Option<&str> {
        self.get(name)
    }

    /// The raw query string, if any.
    pub fn query_string(&self) -> Option<&str> {
        self.head.uri.query()
    }

    /// The decoded query pairs, parsed on first access.
    pub fn query(&self) -> &[(String, String)] {
        self.query.get_or_init(|| {
            self.head
                .uri
                .query()
                .and_then(|query| serde_urlencoded::from_str::<Vec<(String, String)>>(query).ok())
                .unwrap_or_default()
        })
    }

    /// The first query value for `name`.
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query().iter().find(|(key, _)| key == name).map(|(_, value)| value.as_str())
    }

    /// Deserializes the query string into `T`, supporting nested `a[b]=c` keys.
    pub fn query_as<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_qs::from_str(self.query_string().unwrap_or_default()).map_err(Error::bad_request)
    }

    /// Route parameters bound by the matched pattern.
    pub fn params(&self) -> &ParamSet {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut ParamSet {
        &mut self.params
    }

    /// The route parameter `name`, falling back to the query value of the same name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).or_else(|| self.query_value(name))
    }

    /// The mount prefix of the matched route, empty at the top level.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The matched route, available once routing has happened.
    pub fn route(&self) -> Option<&RouteInfo> {
        self.route.as_ref()
    }

    pub fn locals(&self) -> &Locals {
        &self.locals
    }

    pub fn locals_mut(&mut self) -> &mut Locals {
        &mut self.locals
    }

    /// The effective client address.
    pub fn ip(&self) -> &str {
        &self.client.ip
    }

    /// The trusted forwarded chain, client first. Empty unless a proxy is trusted.
    pub fn ips(&self) -> &[String] {
        &self.client.ips
    }

    /// The host name without port, honouring `X-Forwarded-Host` when a proxy is trusted.
    pub fn hostname(&self) -> Option<&str> {
        let forwarded = self.trust_proxy.then(|| self.get("x-forwarded-host")).flatten();
        let host = forwarded
            .map(|value| value.split(',').next().unwrap_or(value).trim())
            .or_else(|| self.get(header::HOST.as_str()))
            .or_else(|| self.head.uri.host())?;

        if host.starts_with('[') {
            return host.find(']').map(|end| &host[..=end]);
        }
        Some(host.split_once(':').map_or(host, |(name, _)| name))
    }

    /// Subdomain labels, most specific first.
    ///
    /// Hosts that are IP literals or have fewer than three labels have no subdomains.
    pub fn subdomains(&self) -> Vec<&str> {
        self.hostname().map(subdomains_of).unwrap_or_default()
    }

    /// `"https"` or `"http"`, honouring `X-Forwarded-Proto` when a proxy is trusted.
    pub fn protocol(&self) -> String {
        let forwarded = self.trust_proxy.then(|| self.get("x-forwarded-proto")).flatten();
        forwarded
            .and_then(|value| value.split(',').next())
            .map(|proto| proto.trim().to_ascii_lowercase())
            .or_else(|| self.head.uri.scheme_str().map(str::to_ascii_lowercase))
            .unwrap_or_else(|| "http".to_owned())
    }

    pub fn secure(&self) -> bool {
        self.protocol() == "https"
    }

    /// Whether the request was issued by a script (`X-Requested-With: XMLHttpRequest`).
    pub fn xhr(&self) -> bool {
        self.get("x-requested-with").is_some_and(|value| value.eq_ignore_ascii_case("xmlhttprequest"))
    }

    /// Checks the `Content-Type` against a type, returning it on a match.
    pub fn is<'t>(&self, ty: &'t str) -> Option<&'t str> {
        content::type_is(self.get(header::CONTENT_TYPE.as_str()), &[ty])
    }

    /// Checks the `Content-Type` against several types, returning the first match.
    pub fn is_any<'t>(&self, types: &[&'t str]) -> Option<&'t str> {
        content::type_is(self.get(header::CONTENT_TYPE.as_str()), types)
    }

    /// The best of `types` according to the `Accept` header.
    pub fn accepts<'t>(&self, types: &[&'t str]) -> Option<&'t str> {
        content::negotiate(self.get(header::ACCEPT.as_str()), types)
    }

    /// Parses a JSON body, see [`RequestContext::parse_body`].
    pub async fn parse_json(&mut self, limit: Option<usize>) -> Result<Option<&Value>, Error> {
        self.parse_body(BodyKind::Json, limit).await
    }

    /// Parses an `application/x-www-form-urlencoded` body into an object of strings.
    pub async fn parse_urlencoded(&mut self, limit: Option<usize>) -> Result<Option<&Value>, Error> {
        self.parse_body(BodyKind::Urlencoded, limit).await
    }

    /// Parses a `text/plain` body into a string value.
    pub async fn parse_text(&mut self, limit: Option<usize>) -> Result<Option<&Value>, Error> {
        self.parse_body(BodyKind::Text, limit).await
    }

    /// Parses the body as `kind` when the content type matches it.
    ///
    /// Returns `Ok(None)` without touching the body when the content type does not match.
    /// The stream is read at most once; the parsed value is cached per kind. `limit`
    /// overrides the configured default for this call.
    pub async fn parse_body(&mut self, kind: BodyKind, limit: Option<usize>) -> Result<Option<&Value>, Error> {
        if self.is(kind.shorthand()).is_none() {
            return Ok(None);
        }
        self.body_parsed = true;

        if !matches!(&self.parsed, Some((parsed_kind, _)) if *parsed_kind == kind) {
            let limit = limit.unwrap_or(match kind {
                BodyKind::Json => self.limits.json,
                BodyKind::Urlencoded => self.limits.urlencoded,
                BodyKind::Text => self.limits.text,
            });
            let declared = self.content_length();
            let raw = self.body.read(limit, declared).await?;
            let value = kind.parse(raw)?;
            self.parsed = Some((kind, value));
        }

        Ok(self.parsed.as_ref().map(|(_, value)| value))
    }

    /// Whether a body parser matched this request's content type and ran.
    pub fn is_body_parsed(&self) -> bool {
        self.body_parsed
    }

    /// The most recently parsed body.
    pub fn body(&self) -> Option<&Value> {
        self.parsed.as_ref().map(|(_, value)| value)
    }

    /// Deserializes the parsed body into `T`.
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T, Error> {
        let value = self.body().ok_or_else(|| Error::bad_request("request body has not been parsed"))?;
        Ok(T::deserialize(value)?)
    }

    /// Reads the raw body bytes, bounded by `limit`.
    pub async fn raw_body(&mut self, limit: usize) -> Result<&Bytes, Error> {
        let declared = self.content_length();
        self.body.read(limit, declared).await
    }

    fn content_length(&self) -> Option<usize> {
        self.get(header::CONTENT_LENGTH.as_str()).and_then(|value| value.trim().parse().ok())
    }
}

fn subdomains_of(hostname: &str) -> Vec<&str> {
    let bare = hostname.trim_start_matches('[').trim_end_matches(']');
    if bare.parse::<IpAddr>().is_ok() || bare.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
        return Vec::new();
    }

    let labels = hostname.split('.').collect::<Vec<_>>();
    if labels.len() < 3 {
        return Vec::new();
    }
    labels[..labels.len() - 2].iter().rev().copied().collect()
}
