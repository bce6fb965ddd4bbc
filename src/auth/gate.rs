//! Per-request authorization: bearer token first, then the cookie session.

use std::sync::Arc;

use axum::http::{HeaderMap, header};
use tracing::{debug, error};

use super::errors::AuthRejection;
use super::session::SessionResolver;
use super::types::{AuthSource, AuthenticatedPrincipal};
use crate::jwt::{TokenCodec, TokenType, unix_now};
use crate::refresh::StoreError;

/// Decides who a request is and whether it may use a scope.
#[derive(Clone)]
pub struct AuthGate {
    codec: Arc<TokenCodec>,
    session_resolver: Option<Arc<dyn SessionResolver>>,
    cookie_fallback: bool,
}

/// Bearer credential found in the Authorization header.
enum Bearer<'a> {
    Absent,
    Present(&'a str),
}

fn bearer_token(headers: &HeaderMap) -> Bearer<'_> {
    let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return Bearer::Absent;
    };
    match value.trim().split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") => {
            Bearer::Present(token.trim())
        }
        _ if value.trim().eq_ignore_ascii_case("bearer") => Bearer::Present(""),
        _ => Bearer::Absent,
    }
}

impl AuthGate {
    pub fn new(codec: Arc<TokenCodec>) -> Self {
        Self {
            codec,
            session_resolver: None,
            cookie_fallback: false,
        }
    }

    /// Enable the cookie fallback channel backed by `resolver`.
    pub fn with_session_resolver(mut self, resolver: Arc<dyn SessionResolver>) -> Self {
        self.session_resolver = Some(resolver);
        self.cookie_fallback = true;
        self
    }

    pub fn with_cookie_fallback(mut self, enabled: bool) -> Self {
        self.cookie_fallback = enabled;
        self
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Authorize an access-token request.
    pub async fn authorize(
        &self,
        headers: &HeaderMap,
        required_scope: Option<&str>,
    ) -> Result<AuthenticatedPrincipal, AuthRejection> {
        self.authorize_with_type(headers, required_scope, TokenType::Access)
            .await
    }

    /// Authorize with an explicit expected token type for the bearer channel.
    pub async fn authorize_with_type(
        &self,
        headers: &HeaderMap,
        required_scope: Option<&str>,
        expected_type: TokenType,
    ) -> Result<AuthenticatedPrincipal, AuthRejection> {
        let now = unix_now().ok_or(AuthRejection::Internal)?;

        if let Bearer::Present(token) = bearer_token(headers) {
            return self.authorize_bearer(token, required_scope, expected_type, now);
        }

        if let (true, Some(resolver)) = (self.cookie_fallback, &self.session_resolver) {
            return authorize_session(resolver.as_ref(), headers, required_scope).await;
        }

        Err(AuthRejection::MissingToken)
    }

    fn authorize_bearer(
        &self,
        token: &str,
        required_scope: Option<&str>,
        expected_type: TokenType,
        now: u64,
    ) -> Result<AuthenticatedPrincipal, AuthRejection> {
        if token.is_empty() {
            return Err(AuthRejection::InvalidToken);
        }
        let claims = self
            .codec
            .verify_at(token, Some(expected_type), now)
            .ok_or(AuthRejection::InvalidToken)?;
        if claims.subject.is_empty() {
            return Err(AuthRejection::InvalidToken);
        }
        if let Some(scope) = required_scope.filter(|s| !claims.has_scope(s)) {
            debug!(user_id = %claims.subject, scope = %scope, "Bearer token lacks scope");
            return Err(AuthRejection::InsufficientScope);
        }

        Ok(AuthenticatedPrincipal {
            user_id: claims.subject.clone(),
            scopes: claims.scopes.clone(),
            source: AuthSource::Bearer,
            token_type: claims.token_type,
            device_id: claims.device_id.clone(),
            claims: Some(claims),
        })
    }
}

async fn authorize_session(
    resolver: &dyn SessionResolver,
    headers: &HeaderMap,
    required_scope: Option<&str>,
) -> Result<AuthenticatedPrincipal, AuthRejection> {
    let session = resolver
        .resolve(headers)
        .await
        .map_err(|e| {
            error!("Failed to resolve web session: {}", e);
            match e {
                StoreError::Unavailable(_) => AuthRejection::ServiceUnavailable,
                _ => AuthRejection::Internal,
            }
        })?
        .filter(|s| !s.user_id.is_empty())
        .ok_or(AuthRejection::MissingSession)?;

    if let Some(scope) = required_scope.filter(|s| !session.scopes.iter().any(|have| have.as_str() == *s)) {
        debug!(user_id = %session.user_id, scope = %scope, "Session lacks scope");
        return Err(AuthRejection::InsufficientScope);
    }

    Ok(AuthenticatedPrincipal {
        user_id: session.user_id,
        scopes: session.scopes,
        source: AuthSource::Cookie,
        token_type: TokenType::Access,
        device_id: None,
        claims: None,
    })
}
