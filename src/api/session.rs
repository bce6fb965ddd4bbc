//! Session introspection endpoints.
//!
//! - GET `/` - Describe the caller (any scope)
//! - GET `/chat` - Same, but requires the chat scope

use axum::{Json, Router, routing::get};
use serde::Serialize;

use crate::auth::{AnyScope, Auth, AuthGate, AuthSource, AuthenticatedPrincipal, ChatScope};
use crate::impl_has_auth_gate;
use crate::jwt::TokenType;

#[derive(Clone)]
pub struct SessionState {
    pub gate: AuthGate,
}

impl_has_auth_gate!(SessionState);

pub fn router(state: SessionState) -> Router {
    Router::new()
        .route("/", get(current_session))
        .route("/chat", get(chat_session))
        .with_state(state)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub user_id: String,
    pub scopes: Vec<String>,
    pub source: AuthSource,
    pub token_type: TokenType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Unix seconds, bearer tokens only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

impl From<AuthenticatedPrincipal> for SessionResponse {
    fn from(principal: AuthenticatedPrincipal) -> Self {
        Self {
            expires_at: principal.claims.as_ref().map(|c| c.expires_at),
            user_id: principal.user_id,
            scopes: principal.scopes,
            source: principal.source,
            token_type: principal.token_type,
            device_id: principal.device_id,
        }
    }
}

async fn current_session(auth: Auth<AnyScope>) -> Json<SessionResponse> {
    Json(auth.principal.into())
}

async fn chat_session(auth: Auth<ChatScope>) -> Json<SessionResponse> {
    Json(auth.principal.into())
}
