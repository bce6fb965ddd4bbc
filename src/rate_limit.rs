//! Rate limiting for token endpoints.
//!
//! Uses a token bucket algorithm with per-IP tracking to slow down refresh
//! token guessing and authorization code replay.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::{num::NonZeroU32, sync::Arc};
use tracing::warn;

use crate::api::{ApiError, ErrorCode};
use crate::auth::extract_client_ip;

/// Per-IP rate limiter.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

#[cfg(feature = "test-mode")]
const REFRESH_PER_MIN: u32 = 10_000;
#[cfg(not(feature = "test-mode"))]
const REFRESH_PER_MIN: u32 = 30;

#[cfg(feature = "test-mode")]
const REFRESH_BURST: u32 = 10_000;
#[cfg(not(feature = "test-mode"))]
const REFRESH_BURST: u32 = 10;

#[cfg(feature = "test-mode")]
const OIDC_CALLBACK_PER_MIN: u32 = 10_000;
#[cfg(not(feature = "test-mode"))]
const OIDC_CALLBACK_PER_MIN: u32 = 10;

#[cfg(feature = "test-mode")]
const OIDC_CALLBACK_BURST: u32 = 10_000;
#[cfg(not(feature = "test-mode"))]
const OIDC_CALLBACK_BURST: u32 = 5;

/// Rate limiting configuration for token endpoints.
#[derive(Clone)]
pub struct RateLimitConfig {
    /// Per-IP limiter for refresh token rotation
    pub refresh: Arc<IpLimiter>,
    /// Per-IP limiter for the OIDC callback
    pub oidc_callback: Arc<IpLimiter>,
    /// Key on `X-Forwarded-For` instead of the socket address
    pub trust_forwarded_for: bool,
}

fn per_minute(rate: u32, burst: u32) -> Quota {
    let rate = NonZeroU32::new(rate).unwrap_or(NonZeroU32::MIN);
    let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
    Quota::per_minute(rate).allow_burst(burst)
}

impl RateLimitConfig {
    /// Create rate limiters with default configuration.
    /// In test mode, limits are much higher to allow rapid test execution.
    pub fn new(trust_forwarded_for: bool) -> Self {
        Self::with_quotas(
            per_minute(REFRESH_PER_MIN, REFRESH_BURST),
            per_minute(OIDC_CALLBACK_PER_MIN, OIDC_CALLBACK_BURST),
            trust_forwarded_for,
        )
    }

    pub fn with_quotas(refresh: Quota, oidc_callback: Quota, trust_forwarded_for: bool) -> Self {
        Self {
            refresh: Arc::new(RateLimiter::keyed(refresh)),
            oidc_callback: Arc::new(RateLimiter::keyed(oidc_callback)),
            trust_forwarded_for,
        }
    }

    /// Drop per-IP state that has fully replenished.
    pub fn retain_recent(&self) {
        self.refresh.retain_recent();
        self.oidc_callback.retain_recent();
        self.refresh.shrink_to_fit();
        self.oidc_callback.shrink_to_fit();
    }

    /// Number of client IPs currently tracked across both limiters.
    pub fn tracked_clients(&self) -> usize {
        self.refresh.len() + self.oidc_callback.len()
    }
}

async fn check(
    limiter: &IpLimiter,
    trust_forwarded_for: bool,
    request: Request,
    next: Next,
) -> Response {
    let ip = match extract_client_ip(request.headers(), request.extensions(), trust_forwarded_for)
    {
        Ok(ip) => ip,
        Err(reason) => {
            warn!(reason, "Unable to determine client IP");
            return ApiError::bad_request("Unable to determine client IP.").into_response();
        }
    };

    match limiter.check_key(&ip) {
        Ok(_) => next.run(request).await,
        Err(_) => {
            warn!(ip = %ip, path = %request.uri().path(), "Rate limit exceeded");
            ApiError::from(ErrorCode::RateLimited).into_response()
        }
    }
}

/// Middleware for rate limiting refresh token rotation.
pub async fn rate_limit_refresh(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    check(&config.refresh, config.trust_forwarded_for, request, next).await
}

/// Middleware for rate limiting the OIDC callback.
pub async fn rate_limit_oidc_callback(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    check(
        &config.oidc_callback,
        config.trust_forwarded_for,
        request,
        next,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, http::StatusCode, middleware, routing::post};
    use tower::ServiceExt;

    fn app(config: RateLimitConfig) -> Router {
        Router::new()
            .route("/refresh", post(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(
                Arc::new(config),
                rate_limit_refresh,
            ))
    }

    fn request(ip: &'static str) -> Request {
        Request::builder()
            .method("POST")
            .uri("/refresh")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_limit_is_per_ip() {
        let quota = per_minute(1, 2);
        let app = app(RateLimitConfig::with_quotas(quota, quota, true));

        for _ in 0..2 {
            let response = app.clone().oneshot(request("203.0.113.1")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let response = app.clone().oneshot(request("203.0.113.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let response = app.oneshot(request("203.0.113.2")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_retain_recent_forgets_idle_clients() {
        let quota = Quota::with_period(std::time::Duration::from_millis(10)).unwrap();
        let config = RateLimitConfig::with_quotas(quota, quota, true);

        assert!(config.refresh.check_key(&"203.0.113.1".to_string()).is_ok());
        assert!(config.oidc_callback.check_key(&"203.0.113.2".to_string()).is_ok());
        config.retain_recent();
        assert_eq!(config.tracked_clients(), 2);

        std::thread::sleep(std::time::Duration::from_millis(50));
        config.retain_recent();
        assert_eq!(config.tracked_clients(), 0);

        // A forgotten client starts over with a full bucket
        assert!(config.refresh.check_key(&"203.0.113.1".to_string()).is_ok());
        assert_eq!(config.tracked_clients(), 1);
    }

    #[tokio::test]
    async fn test_unknown_ip_is_rejected() {
        let app = app(RateLimitConfig::new(false));
        let response = app.oneshot(request("203.0.113.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
