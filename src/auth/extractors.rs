//! Axum extractors for authentication.

use std::marker::PhantomData;
use std::ops::Deref;

use axum::{extract::FromRequestParts, http::request::Parts};

use super::errors::AuthRejection;
use super::state::HasAuthGate;
use super::types::AuthenticatedPrincipal;

/// Scope a route requires, checked by [`Auth`].
pub trait ScopeConstraint: Send + Sync + 'static {
    const REQUIRED_SCOPE: Option<&'static str>;
}

/// Any authenticated caller.
pub struct AnyScope;

impl ScopeConstraint for AnyScope {
    const REQUIRED_SCOPE: Option<&'static str> = None;
}

/// Callers allowed to read and write chat.
pub struct ChatScope;

impl ScopeConstraint for ChatScope {
    const REQUIRED_SCOPE: Option<&'static str> = Some("chat:rw");
}

/// Extractor for API endpoints that require authentication.
/// Rejects with the gate's JSON error when the caller is unknown or lacks
/// the scope `C` requires.
pub struct Auth<C: ScopeConstraint = AnyScope> {
    pub principal: AuthenticatedPrincipal,
    _scope: PhantomData<C>,
}

impl<C: ScopeConstraint> Deref for Auth<C> {
    type Target = AuthenticatedPrincipal;

    fn deref(&self) -> &Self::Target {
        &self.principal
    }
}

impl<S, C> FromRequestParts<S> for Auth<C>
where
    S: HasAuthGate + Send + Sync,
    C: ScopeConstraint,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let principal = state
            .auth_gate()
            .authorize(&parts.headers, C::REQUIRED_SCOPE)
            .await?;
        Ok(Auth {
            principal,
            _scope: PhantomData,
        })
    }
}
