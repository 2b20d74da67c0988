//! The request dispatch core of an HTTP application framework.
//!
//! A [`Dispatcher`] takes one `http::Request`, matches it against an ordered route table,
//! runs the middleware scoped to its path plus the route's own steps as a single onion
//! chain, and returns one `http::Response`. Transport concerns (sockets, TLS, reading the
//! wire) stay outside: any `http_body::Body` can feed it.
//!
//! ```
//! use micro_dispatch::{Dispatcher, handler_fn, middleware};
//! use micro_dispatch::router::post;
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let dispatcher = Dispatcher::builder()
//!     .middleware("/", middleware::json())
//!     .route("/users", post(handler_fn(|req, res| {
//!         Box::pin(async move { res.json(&json!({ "received": req.body() })) })
//!     })))
//!     .error_handler("/", middleware::ErrorResponder::new())
//!     .build();
//!
//! let request = http::Request::post("/users")
//!     .header("content-type", "application/json")
//!     .body(String::from(r#"{"name":"John"}"#))
//!     .unwrap();
//! let response = dispatcher.dispatch(request, None).await;
//! assert_eq!(response.body().as_bytes(), br#"{"received":{"name":"John"}}"#);
//! # }
//! ```

mod body;
mod dispatcher;
mod error;
mod handler;
mod path;
mod request;
mod response;

pub mod config;
pub mod middleware;
pub mod router;
pub mod trust_proxy;

pub use body::ResponseBody;
pub use config::{AppConfig, BodyLimits};
pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use error::{BoxError, Error, HttpError};
pub use handler::{FnHandler, Handler, handler_fn};
pub use middleware::{ErrorMiddleware, Flow, Middleware, Next};
pub use path::{ParamSet, PathMatcher, WILDCARD_PARAM};
pub use request::{BodyKind, Locals, RequestBody, RequestContext, content};
pub use response::ResponseContext;
pub use router::{RouteInfo, Router};
