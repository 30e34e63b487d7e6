#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use scripter_api::config::ServerConfig;
use scripter_api::router::build_app_router;
use scripter_api::state::AppState;
use scripter_core::{Scripter, ScripterOptions};

/// Build a test `ServerConfig` rooted at `home`, with only the `expr`
/// language enabled.
pub fn test_config(home: &Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        scripter_home: home.to_path_buf(),
        host_path: Vec::new(),
        bundle_dir: None,
        languages: vec!["expr".to_string()],
        exec_timeout_secs: 5,
        python_bin: "python3".to_string(),
    }
}

/// Build the full application router over a scripter rooted at `home`.
///
/// Uses the same router builder as `main.rs`, so tests exercise the
/// production middleware stack.
pub async fn build_test_app(home: &Path) -> Router {
    let config = test_config(home);
    let scripter = Scripter::open(ScripterOptions::new(home))
        .await
        .expect("scripter should open");

    let state = AppState {
        scripter: Arc::new(scripter),
        config: Arc::new(config.clone()),
    };
    build_app_router(state, &config)
}

pub async fn send(app: Router, method: Method, uri: &str, body: &str) -> Response<Body> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::from(body.to_string()))
        .expect("request");
    app.oneshot(request).await.expect("response")
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri, "").await
}

pub async fn post(app: Router, uri: &str, body: &str) -> Response<Body> {
    send(app, Method::POST, uri, body).await
}

pub async fn delete(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::DELETE, uri, "").await
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

pub fn content_type(response: &Response<Body>) -> Option<&str> {
    response
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
}
