//! Authenticated principal types.

use serde::Serialize;

use crate::jwt::{AccessClaims, TokenType};

/// Channel a request authenticated through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthSource {
    Bearer,
    Cookie,
}

/// The caller of a request, built per request and never persisted.
#[derive(Debug, Clone)]
pub struct AuthenticatedPrincipal {
    pub user_id: String,
    pub scopes: Vec<String>,
    pub source: AuthSource,
    pub token_type: TokenType,
    pub device_id: Option<String>,
    /// Verified token claims (bearer only)
    pub claims: Option<AccessClaims>,
}
