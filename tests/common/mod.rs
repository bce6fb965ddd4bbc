#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    extract::ConnectInfo,
    http::{Request, Response, header},
};
use serde_json::Value;
use sessiongate::{ServerConfig, create_app, db::Database};
use std::net::SocketAddr;
use tower::ServiceExt;

pub const TOKEN_SECRET: &str = "integration-test-secret-0123456789abcdef";

/// Server config over a fresh in-memory database, dev mode on.
pub async fn test_config() -> ServerConfig {
    let db = Database::open(":memory:")
        .await
        .expect("Failed to open test database");
    let mut config = ServerConfig::new(db, TOKEN_SECRET);
    config.dev_mode = true;
    config
}

pub fn app(config: &ServerConfig) -> Router {
    create_app(config).expect("Failed to create app")
}

fn client_addr() -> ConnectInfo<SocketAddr> {
    ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 50000)))
}

/// JSON POST with a client address attached, as `into_make_service_with_connect_info` would.
pub fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .extension(client_addr())
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method("GET")
        .uri(uri)
        .extension(client_addr())
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    serde_json::from_slice(&bytes).expect("Body is not JSON")
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.expect("Request failed")
}

/// Log in through the dev code path and return the token pair JSON.
pub async fn dev_login(app: &Router, email: &str, device_id: &str) -> Value {
    let response = send(
        app,
        post_json(
            "/api/auth/oidc/callback",
            serde_json::json!({ "code": format!("dev:{}|Test User", email), "deviceId": device_id }),
        ),
    )
    .await;
    assert_eq!(response.status(), 200, "dev login failed");
    body_json(response).await
}

pub async fn refresh(app: &Router, refresh_token: &str, device_id: &str) -> Response<Body> {
    send(
        app,
        post_json(
            "/api/auth/refresh",
            serde_json::json!({ "refreshToken": refresh_token, "deviceId": device_id }),
        ),
    )
    .await
}
