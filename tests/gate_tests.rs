//! Request authorization through the HTTP API: bearer tokens, scopes and
//! the cookie session fallback.

mod common;

use axum::{
    body::Body,
    http::{StatusCode, header},
};
use common::*;
use sessiongate::jwt::{TokenCodec, TokenRequest, TokenType};
use sessiongate::oidc::ExternalIdentity;
use sessiongate::ServerConfig;

fn sign(subject: &str, scopes: &[&str], token_type: TokenType, secret: &[u8]) -> String {
    let scopes: Vec<String> = scopes.iter().map(|s| s.to_string()).collect();
    TokenCodec::new(secret)
        .sign(
            &TokenRequest {
                subject,
                scopes: &scopes,
                device_id: None,
                token_type,
            },
            60,
        )
        .unwrap()
}

fn access(subject: &str, scopes: &[&str]) -> String {
    sign(subject, scopes, TokenType::Access, TOKEN_SECRET.as_bytes())
}

/// Create a user with a browser session and return (user id, cookie value).
async fn web_session(config: &ServerConfig, email: &str, scopes: &[&str]) -> (String, String) {
    let user = config
        .db
        .users()
        .resolve(&ExternalIdentity {
            subject_id: format!("web-{}", email),
            email: email.to_string(),
            name: None,
        })
        .await
        .unwrap();
    let scopes: Vec<String> = scopes.iter().map(|s| s.to_string()).collect();
    let cookie = config
        .db
        .web_sessions()
        .create(&user.id, &scopes, 3600)
        .await
        .unwrap();
    (user.id, cookie)
}

async fn session_request(
    app: &axum::Router,
    path: &str,
    token: Option<&str>,
    cookie: Option<&str>,
) -> axum::http::Response<Body> {
    let mut builder = get(path);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, bearer(token));
    }
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, format!("session={}", cookie));
    }
    send(app, builder.body(Body::empty()).unwrap()).await
}

#[tokio::test]
async fn test_no_credentials_is_missing_token() {
    let config = test_config().await;
    let app = app(&config);

    let response = session_request(&app, "/api/session", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "missing_token");
}

#[tokio::test]
async fn test_invalid_bearer_tokens() {
    let config = test_config().await;
    let app = app(&config);

    let forged = sign("u1", &["chat:rw"], TokenType::Access, b"some-other-secret");
    let refresh_typed = sign("u1", &["chat:rw"], TokenType::Refresh, TOKEN_SECRET.as_bytes());

    for token in ["garbage", "a.b.c", forged.as_str(), refresh_typed.as_str()] {
        let response = session_request(&app, "/api/session", Some(token), None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "token {}", token);
        assert_eq!(body_json(response).await["code"], "invalid_token");
    }
}

#[tokio::test]
async fn test_scope_enforcement() {
    let config = test_config().await;
    let app = app(&config);
    let token = access("u1", &["a", "b"]);

    let response = session_request(&app, "/api/session", Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["userId"], "u1");
    assert_eq!(body["tokenType"], "access");

    let response = session_request(&app, "/api/session/chat", Some(&token), None).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["code"], "insufficient_scope");

    let chat = access("u1", &["chat:rw"]);
    let response = session_request(&app, "/api/session/chat", Some(&chat), None).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_cookie_fallback() {
    let mut config = test_config().await;
    config.cookie_fallback = true;
    let (user_id, cookie) = web_session(&config, "web@example.com", &["chat:rw"]).await;
    let app = app(&config);

    let response = session_request(&app, "/api/session/chat", None, Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["userId"], user_id.as_str());
    assert_eq!(body["source"], "cookie");

    let response = session_request(&app, "/api/session", None, Some("not-a-session")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "missing_session");

    let response = session_request(&app, "/api/session", None, None).await;
    assert_eq!(body_json(response).await["code"], "missing_session");
}

#[tokio::test]
async fn test_cookie_scopes_are_enforced() {
    let mut config = test_config().await;
    config.cookie_fallback = true;
    let (_, cookie) = web_session(&config, "reader@example.com", &["profile:read"]).await;
    let app = app(&config);

    let response = session_request(&app, "/api/session/chat", None, Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["code"], "insufficient_scope");
}

#[tokio::test]
async fn test_bearer_wins_over_cookie() {
    let mut config = test_config().await;
    config.cookie_fallback = true;
    let (cookie_user, cookie) = web_session(&config, "y@example.com", &["chat:rw"]).await;
    let app = app(&config);

    let token = access("x", &["chat:rw"]);
    let response = session_request(&app, "/api/session", Some(&token), Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["userId"], "x");
    assert_ne!(body["userId"], cookie_user.as_str());

    // A bad bearer token is not rescued by a good cookie
    let response = session_request(&app, "/api/session", Some("garbage"), Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "invalid_token");
}

#[tokio::test]
async fn test_cookie_ignored_when_fallback_disabled() {
    let config = test_config().await;
    let (_, cookie) = web_session(&config, "web@example.com", &["chat:rw"]).await;
    let app = app(&config);

    let response = session_request(&app, "/api/session", None, Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "missing_token");
}

#[tokio::test]
async fn test_dev_tokens_follow_dev_mode() {
    let config = test_config().await;
    let app = app(&config);
    let response = session_request(&app, "/api/session/chat", Some("dev:alice"), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["userId"], "alice");

    let mut config = test_config().await;
    config.dev_mode = false;
    let app = common::app(&config);
    let response = session_request(&app, "/api/session", Some("dev:alice"), None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
