//! Origin checks on the API.

mod common;

use axum::{
    body::Body,
    http::{Method, Request, Response, StatusCode, header},
};
use common::*;

const ALLOWED: &str = "https://chat.example.com";

async fn cors_app() -> axum::Router {
    let mut config = test_config().await;
    config.allowed_origins = vec![ALLOWED.to_string()];
    app(&config)
}

fn preflight(origin: &str) -> Request<Body> {
    Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/auth/refresh")
        .header(header::ORIGIN, origin)
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap()
}

fn header_str<'a>(response: &'a Response<Body>, name: header::HeaderName) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

fn assert_common_headers(response: &Response<Body>) {
    assert_eq!(header_str(response, header::VARY), Some("Origin"));
    assert_eq!(
        header_str(response, header::ACCESS_CONTROL_ALLOW_METHODS),
        Some("GET,POST,PATCH,DELETE,OPTIONS")
    );
    assert_eq!(
        header_str(response, header::ACCESS_CONTROL_ALLOW_HEADERS),
        Some("Authorization, Content-Type")
    );
    assert_eq!(
        header_str(response, header::ACCESS_CONTROL_ALLOW_CREDENTIALS),
        Some("false")
    );
}

#[tokio::test]
async fn test_preflight_from_allowed_origin() {
    let app = cors_app().await;
    let response = send(&app, preflight(ALLOWED)).await;

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_common_headers(&response);
    assert_eq!(
        header_str(&response, header::ACCESS_CONTROL_ALLOW_ORIGIN),
        Some(ALLOWED)
    );
}

#[tokio::test]
async fn test_preflight_from_unknown_origin() {
    let app = cors_app().await;
    let response = send(&app, preflight("https://evil.example")).await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_common_headers(&response);
    assert!(header_str(&response, header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    assert_eq!(body_json(response).await["code"], "origin_not_allowed");
}

#[tokio::test]
async fn test_request_from_unknown_origin_never_reaches_handler() {
    let app = cors_app().await;
    let mut request = post_json(
        "/api/auth/oidc/callback",
        serde_json::json!({"code": "dev:alice@example.com", "deviceId": "d"}),
    );
    request
        .headers_mut()
        .insert(header::ORIGIN, "https://evil.example".parse().unwrap());
    request
        .headers_mut()
        .insert(header::HOST, "api.example.com".parse().unwrap());

    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_common_headers(&response);
    let body = body_json(response).await;
    assert_eq!(body["code"], "origin_not_allowed");
    assert!(body.get("accessToken").is_none());
}

#[tokio::test]
async fn test_no_origin_passes_without_allow_origin() {
    let app = cors_app().await;
    let response = send(&app, get("/api/session").body(Body::empty()).unwrap()).await;

    // Reaches the gate, which rejects the anonymous request
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_common_headers(&response);
    assert!(header_str(&response, header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
}

#[tokio::test]
async fn test_same_origin_is_allowed_without_listing() {
    let app = cors_app().await;
    let response = send(
        &app,
        get("/api/session")
            .header(header::ORIGIN, "https://api.example.com")
            .header(header::HOST, "api.example.com")
            .header("x-forwarded-proto", "https")
            .header(header::AUTHORIZATION, bearer("dev:alice"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        header_str(&response, header::ACCESS_CONTROL_ALLOW_ORIGIN),
        Some("https://api.example.com")
    );
}

#[tokio::test]
async fn test_error_responses_carry_cors_headers() {
    let app = cors_app().await;
    let response = send(
        &app,
        get("/api/session/chat")
            .header(header::ORIGIN, ALLOWED)
            .header(header::AUTHORIZATION, bearer("garbage"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_common_headers(&response);
    assert_eq!(
        header_str(&response, header::ACCESS_CONTROL_ALLOW_ORIGIN),
        Some(ALLOWED)
    );
    assert_eq!(body_json(response).await["code"], "invalid_token");
}
