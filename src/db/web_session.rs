//! Browser sessions behind the cookie fallback channel.
//!
//! The web front end owns these sessions; this service only needs to read
//! them. Create and delete exist for that front end and for tests.

use sqlx::sqlite::SqlitePool;

use super::{join_scopes, split_scopes};
use crate::issuer::{generate_refresh_token, hash_refresh_token};
use crate::jwt::unix_now;
use crate::refresh::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSession {
    pub user_id: String,
    pub scopes: Vec<String>,
    pub expires_at: u64,
}

#[derive(Clone)]
pub struct WebSessionStore {
    pool: SqlitePool,
}

impl WebSessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a session and return the raw cookie value.
    pub async fn create(
        &self,
        user_id: &str,
        scopes: &[String],
        ttl_secs: u64,
    ) -> Result<String, StoreError> {
        let now = unix_now().unwrap_or(0);
        let expires_at = now
            .checked_add(ttl_secs)
            .and_then(|exp| i64::try_from(exp).ok())
            .ok_or_else(|| StoreError::Backend("Session lifetime out of range".into()))?;
        let token = generate_refresh_token();
        sqlx::query(
            "INSERT INTO web_sessions (token_hash, user_id, scopes, expires_at, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(hash_refresh_token(&token))
        .bind(user_id)
        .bind(join_scopes(scopes))
        .bind(expires_at)
        .bind(now as i64)
        .execute(&self.pool)
        .await?;
        Ok(token)
    }

    /// Look up an unexpired session by raw cookie value.
    pub async fn find(&self, token: &str) -> Result<Option<WebSession>, StoreError> {
        let now = unix_now().unwrap_or(0) as i64;
        let row: Option<(String, String, i64)> = sqlx::query_as(
            "SELECT user_id, scopes, expires_at FROM web_sessions WHERE token_hash = ? AND expires_at > ?",
        )
        .bind(hash_refresh_token(token))
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(user_id, scopes, expires_at)| WebSession {
            user_id,
            scopes: split_scopes(&scopes),
            expires_at: expires_at.max(0) as u64,
        }))
    }

    pub async fn delete_expired(&self) -> Result<u64, StoreError> {
        let now = unix_now().unwrap_or(0) as i64;
        let result = sqlx::query("DELETE FROM web_sessions WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
