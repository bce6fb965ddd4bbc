mod auth;
mod error;
mod session;

use axum::Router;
use std::sync::Arc;

use crate::auth::AuthGate;
use crate::db::UserStore;
use crate::issuer::TokenIssuer;
use crate::oidc::OidcBridge;
use crate::rate_limit::RateLimitConfig;
use crate::refresh::RefreshStore;

pub use auth::{AuthState, CODE_VERIFIER_HEADER, TokenPairResponse};
pub use error::{ApiError, ErrorCode, ResultExt};
pub use session::{SessionResponse, SessionState};

/// Everything the API handlers share.
#[derive(Clone)]
pub struct ApiContext {
    pub gate: AuthGate,
    pub issuer: Arc<TokenIssuer>,
    pub refresh_store: Arc<dyn RefreshStore>,
    pub users: UserStore,
    pub oidc: Arc<OidcBridge>,
    pub login_scopes: Vec<String>,
    pub rate_limits: Arc<RateLimitConfig>,
}

/// Create the API router.
pub fn create_api_router(ctx: ApiContext) -> Router {
    let session_state = SessionState {
        gate: ctx.gate.clone(),
    };

    let auth_state = AuthState {
        gate: ctx.gate,
        issuer: ctx.issuer,
        refresh_store: ctx.refresh_store,
        users: ctx.users,
        oidc: ctx.oidc,
        login_scopes: ctx.login_scopes,
    };

    Router::new()
        .nest("/auth", auth::router(auth_state, ctx.rate_limits))
        .nest("/session", session::router(session_state))
}
