//! Cookie fallback: resolving a browser session into a user and scopes.

use async_trait::async_trait;
use axum::http::{HeaderMap, header};

use crate::db::WebSessionStore;
use crate::refresh::StoreError;

/// Default name of the browser session cookie.
pub const SESSION_COOKIE_NAME: &str = "session";

/// A resolved browser session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSession {
    pub user_id: String,
    pub scopes: Vec<String>,
}

/// Resolves the request's web session, if any.
#[async_trait]
pub trait SessionResolver: Send + Sync {
    async fn resolve(&self, headers: &HeaderMap) -> Result<Option<ResolvedSession>, StoreError>;
}

/// Reads the session cookie and looks it up in the web session table.
pub struct CookieSessionResolver {
    sessions: WebSessionStore,
    cookie_name: String,
}

impl CookieSessionResolver {
    pub fn new(sessions: WebSessionStore, cookie_name: impl Into<String>) -> Self {
        Self {
            sessions,
            cookie_name: cookie_name.into(),
        }
    }
}

#[async_trait]
impl SessionResolver for CookieSessionResolver {
    async fn resolve(&self, headers: &HeaderMap) -> Result<Option<ResolvedSession>, StoreError> {
        let Some(value) = session_cookie(headers, &self.cookie_name) else {
            return Ok(None);
        };

        Ok(self.sessions.find(value).await?.map(|s| ResolvedSession {
            user_id: s.user_id,
            scopes: s.scopes,
        }))
    }
}

/// Value of the named cookie across all `Cookie` headers. Empty values count as absent.
fn session_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}
