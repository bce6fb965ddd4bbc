//! Token endpoints.
//!
//! - POST `/oidc/callback` - Exchange an authorization code for a token pair
//! - POST `/refresh` - Rotate a refresh token into a new pair
//! - POST `/logout` - Revoke the refresh tokens of a device

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, header},
    middleware,
    routing::post,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use super::error::{ApiError, ResultExt};
use crate::auth::{AnyScope, Auth, AuthGate};
use crate::db::UserStore;
use crate::impl_has_auth_gate;
use crate::issuer::{TokenIssuer, TokenPair, hash_refresh_token};
use crate::jwt::unix_now;
use crate::oidc::OidcBridge;
use crate::rate_limit::{RateLimitConfig, rate_limit_oidc_callback, rate_limit_refresh};
use crate::refresh::{self, NewRefreshToken, RefreshStore, scope_metadata};

/// Header mobile clients use to send the PKCE verifier.
pub const CODE_VERIFIER_HEADER: &str = "x-code-verifier";

const MAX_DEVICE_ID_LEN: usize = 128;
const MAX_USER_AGENT_LEN: usize = 256;

#[derive(Clone)]
pub struct AuthState {
    pub gate: AuthGate,
    pub issuer: Arc<TokenIssuer>,
    pub refresh_store: Arc<dyn RefreshStore>,
    pub users: UserStore,
    pub oidc: Arc<OidcBridge>,
    /// Scopes granted at login
    pub login_scopes: Vec<String>,
}

impl_has_auth_gate!(AuthState);

pub fn router(state: AuthState, rate_limits: Arc<RateLimitConfig>) -> Router {
    let callback = Router::new()
        .route("/oidc/callback", post(oidc_callback))
        .layer(middleware::from_fn_with_state(
            rate_limits.clone(),
            rate_limit_oidc_callback,
        ));

    let refresh = Router::new()
        .route("/refresh", post(refresh_token))
        .layer(middleware::from_fn_with_state(rate_limits, rate_limit_refresh));

    Router::new()
        .route("/logout", post(logout))
        .merge(callback)
        .merge(refresh)
        .with_state(state)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OidcCallbackRequest {
    code: String,
    device_id: String,
    /// Echoed by clients; CSRF state is checked client-side.
    #[serde(default)]
    #[allow(dead_code)]
    state: Option<String>,
    #[serde(default, rename = "code_verifier", alias = "codeVerifier")]
    code_verifier: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest {
    refresh_token: String,
    device_id: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct LogoutRequest {
    #[serde(default)]
    device_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPairResponse {
    pub access_token: String,
    /// Seconds until the access token expires
    pub access_token_expires_in: u64,
    pub refresh_token: String,
    /// Unix seconds
    pub refresh_token_expires_at: u64,
    pub device_id: String,
}

impl TokenPairResponse {
    fn new(pair: TokenPair, device_id: String, now: u64) -> Self {
        Self {
            access_token_expires_in: pair.access_token_expires_in(now),
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            refresh_token_expires_at: pair.refresh_token_expires_at,
            device_id,
        }
    }
}

#[derive(Serialize)]
struct LogoutResponse {
    revoked: u64,
}

fn parse_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(v)| v)
        .map_err(|e| ApiError::bad_request(e.body_text()))
}

fn validate_device_id(device_id: &str) -> Result<&str, ApiError> {
    let device_id = device_id.trim();
    if device_id.is_empty() {
        return Err(ApiError::bad_request("deviceId is required"));
    }
    if device_id.len() > MAX_DEVICE_ID_LEN {
        return Err(ApiError::bad_request("deviceId is too long"));
    }
    Ok(device_id)
}

fn now() -> Result<u64, ApiError> {
    unix_now().ok_or_else(|| ApiError::internal("Clock error", "system time before epoch"))
}

/// Complete an OIDC login: resolve the user, end any earlier session of the
/// device and issue a fresh pair.
async fn oidc_callback(
    State(state): State<AuthState>,
    headers: HeaderMap,
    body: Result<Json<OidcCallbackRequest>, JsonRejection>,
) -> Result<Json<TokenPairResponse>, ApiError> {
    let request = parse_body(body)?;
    let device_id = validate_device_id(&request.device_id)?.to_string();

    // Body wins over the header
    let code_verifier = request.code_verifier.clone().or_else(|| {
        headers
            .get(CODE_VERIFIER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    });

    let identity = state
        .oidc
        .exchange(&request.code, code_verifier.as_deref())
        .await
        .map_err(|e| {
            warn!(error = %e, device_id = %device_id, "OIDC code exchange failed");
            ApiError::auth_failed()
        })?;

    let user = state
        .users
        .resolve(&identity)
        .await
        .db_err("Failed to resolve user")?;

    let revoked = state
        .refresh_store
        .revoke_by_device(&user.id, &device_id)
        .await
        .db_err("Failed to revoke previous device tokens")?;

    let now = now()?;
    let pair = state
        .issuer
        .issue_at(&user.id, &device_id, &state.login_scopes, now)
        .map_err(|e| ApiError::internal("Failed to issue tokens", e))?;

    let mut metadata = scope_metadata(&pair.scopes);
    metadata.insert("source".to_string(), Value::from("oidc"));
    if let Some(agent) = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
    {
        let agent: String = agent.chars().take(MAX_USER_AGENT_LEN).collect();
        metadata.insert("user_agent".to_string(), Value::from(agent));
    }

    state
        .refresh_store
        .persist(
            NewRefreshToken {
                user_id: user.id.clone(),
                device_id: device_id.clone(),
                token_hash: hash_refresh_token(&pair.refresh_token),
                scopes: pair.scopes.clone(),
                expires_at: pair.refresh_token_expires_at,
                metadata,
            },
            None,
        )
        .await
        .db_err("Failed to store refresh token")?;

    info!(user_id = %user.id, device_id = %device_id, revoked, "User logged in");
    Ok(Json(TokenPairResponse::new(pair, device_id, now)))
}

/// Rotate a refresh token. Every unusable token gets the same answer.
async fn refresh_token(
    State(state): State<AuthState>,
    body: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<TokenPairResponse>, ApiError> {
    let request = parse_body(body)?;
    let device_id = validate_device_id(&request.device_id)?;
    if request.refresh_token.is_empty() {
        return Err(ApiError::bad_request("refreshToken is required"));
    }

    let (pair, record) = refresh::rotate(
        state.refresh_store.as_ref(),
        &state.issuer,
        &request.refresh_token,
        device_id,
    )
    .await?;

    let now = now()?;
    Ok(Json(TokenPairResponse::new(pair, record.device_id, now)))
}

/// Revoke every refresh token of a device, by default the caller's own.
async fn logout(
    State(state): State<AuthState>,
    auth: Auth<AnyScope>,
    body: Option<Json<LogoutRequest>>,
) -> Result<Json<LogoutResponse>, ApiError> {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let device_id = match request.device_id.as_deref().or(auth.device_id.as_deref()) {
        Some(id) => validate_device_id(id)?.to_string(),
        None => return Err(ApiError::bad_request("deviceId is required")),
    };

    let revoked = state
        .refresh_store
        .revoke_by_device(&auth.user_id, &device_id)
        .await
        .db_err("Failed to revoke device tokens")?;

    info!(user_id = %auth.user_id, device_id = %device_id, revoked, "Device logged out");
    Ok(Json(LogoutResponse { revoked }))
}
