//! Dispatches a handful of in-memory requests and prints the responses.
//!
//! ```text
//! cargo run -p micro-dispatch --example dispatch_demo
//! ```

use http::{Request, StatusCode};
use micro_dispatch::middleware::{self, Cors, ErrorResponder, middleware_fn};
use micro_dispatch::router::{Router, delete, get, post};
use micro_dispatch::{Dispatcher, Error, Flow, HttpError, handler_fn};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Deserialize, Debug)]
struct User {
    name: String,
}

fn users() -> Router {
    Router::new()
        .route(
            "/",
            post(handler_fn(|req, res| {
                Box::pin(async move {
                    match req.body_as::<User>() {
                        Ok(user) => res.status(StatusCode::CREATED).json(&json!({ "created": user.name })),
                        Err(e) => Flow::Error(e),
                    }
                })
            }))
            .with(middleware::json()),
        )
        .route(
            "/:id",
            get(handler_fn(|req, res| {
                Box::pin(async move {
                    let id = req.param("id").unwrap_or_default().to_owned();
                    res.json(&json!({ "id": id, "base_url": req.base_url(), "client": req.ip() }))
                })
            })),
        )
        .route(
            "/:id",
            delete(handler_fn(|_req, _res| {
                Box::pin(async { Flow::Error(HttpError::new(StatusCode::FORBIDDEN, "Forbidden").into()) })
            })),
        )
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::DEBUG).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let dispatcher = Dispatcher::builder()
        .trust_proxy("loopback")
        .middleware("/", Cors::new())
        .middleware(
            "/",
            middleware_fn(|req, res, next| {
                Box::pin(async move {
                    let method = req.method().clone();
                    let path = req.original_url().to_owned();
                    let flow = next.run(req, res).await;
                    info!(%method, %path, status = res.status_code().as_u16(), "handled");
                    flow
                })
            }),
        )
        .mount("/users", users())
        .route(
            "/boom",
            get(handler_fn(|_req, _res| Box::pin(async { Flow::Error(Error::opaque("database is down")) }))),
        )
        .error_handler("/", ErrorResponder::with_reporter(|err: &Error| eprintln!("reported: {err}")))
        .build();

    let peer: SocketAddr = "127.0.0.1:50000".parse().expect("valid address");
    let requests = vec![
        Request::post("/users").header("content-type", "application/json").body(String::from(r#"{"name":"John"}"#)),
        Request::get("/users/42").header("x-forwarded-for", "203.0.113.50, 127.0.0.1").body(String::new()),
        Request::delete("/users/42").body(String::new()),
        Request::get("/boom").body(String::new()),
        Request::get("/missing").body(String::new()),
    ];

    for request in requests {
        let request = request.expect("valid request");
        let line = format!("{} {}", request.method(), request.uri());
        let response = dispatcher.dispatch(request, Some(peer)).await;
        println!("{line} -> {} {}", response.status(), String::from_utf8_lossy(response.body().as_bytes()));
    }
}
