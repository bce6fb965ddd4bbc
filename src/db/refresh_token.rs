//! SQLite-backed refresh token storage.
//!
//! Access tokens are stateless and never stored; only refresh token hashes
//! live here.

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::sqlite::SqlitePool;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{join_scopes, split_scopes};
use crate::jwt::unix_now;
use crate::refresh::{NewRefreshToken, RefreshStore, RefreshTokenRecord, StoreError};

#[derive(sqlx::FromRow)]
struct RefreshTokenRow {
    id: String,
    user_id: String,
    device_id: String,
    token_hash: String,
    scopes: String,
    expires_at: i64,
    revoked_at: Option<i64>,
    rotated_at: Option<i64>,
    metadata: String,
    created_at: i64,
    updated_at: i64,
}

impl From<RefreshTokenRow> for RefreshTokenRecord {
    fn from(row: RefreshTokenRow) -> Self {
        // Unreadable metadata is audit-only and not worth failing a lookup over.
        let metadata = serde_json::from_str::<Map<String, Value>>(&row.metadata).unwrap_or_default();
        Self {
            id: row.id,
            user_id: row.user_id,
            device_id: row.device_id,
            token_hash: row.token_hash,
            scopes: split_scopes(&row.scopes),
            expires_at: row.expires_at.max(0) as u64,
            revoked_at: row.revoked_at.map(|t| t.max(0) as u64),
            rotated_at: row.rotated_at.map(|t| t.max(0) as u64),
            metadata,
            created_at: row.created_at.max(0) as u64,
            updated_at: row.updated_at.max(0) as u64,
        }
    }
}

const SELECT_COLUMNS: &str = "SELECT id, user_id, device_id, token_hash, scopes, expires_at, revoked_at, rotated_at, metadata, created_at, updated_at FROM refresh_tokens";

/// Store for refresh token records.
#[derive(Clone)]
pub struct SqliteRefreshStore {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

impl SqliteRefreshStore {
    pub fn new(pool: SqlitePool, write_lock: Arc<Mutex<()>>) -> Self {
        Self { pool, write_lock }
    }

}

#[async_trait]
impl RefreshStore for SqliteRefreshStore {
    async fn persist(
        &self,
        token: NewRefreshToken,
        previous_token_hash: Option<&str>,
    ) -> Result<RefreshTokenRecord, StoreError> {
        let now = now_secs()?;
        let id = Uuid::new_v4().to_string();
        let expires_at = i64::try_from(token.expires_at)
            .map_err(|_| StoreError::Backend("Expiry out of range".into()))?;
        let metadata = serde_json::to_string(&token.metadata)
            .map_err(|e| StoreError::Backend(format!("Failed to encode metadata: {}", e)))?;

        let _guard = self.write_lock.lock().await;
        // Dropping the transaction without commit rolls it back.
        let mut tx = self.pool.begin().await?;

        if let Some(previous) = previous_token_hash {
            let result = sqlx::query(
                "UPDATE refresh_tokens SET revoked_at = ?, rotated_at = ?, updated_at = ? WHERE token_hash = ? AND revoked_at IS NULL",
            )
            .bind(now)
            .bind(now)
            .bind(now)
            .bind(previous)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                tx.rollback().await?;
                return Err(StoreError::Stale);
            }
        }

        sqlx::query(
            "INSERT INTO refresh_tokens (id, user_id, device_id, token_hash, scopes, expires_at, metadata, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&token.user_id)
        .bind(&token.device_id)
        .bind(&token.token_hash)
        .bind(join_scopes(&token.scopes))
        .bind(expires_at)
        .bind(&metadata)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(RefreshTokenRecord {
            id,
            user_id: token.user_id,
            device_id: token.device_id,
            token_hash: token.token_hash,
            scopes: token.scopes,
            expires_at: token.expires_at,
            revoked_at: None,
            rotated_at: None,
            metadata: token.metadata,
            created_at: now as u64,
            updated_at: now as u64,
        })
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let row: Option<RefreshTokenRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE token_hash = ?"))
                .bind(token_hash)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(RefreshTokenRecord::from))
    }

    async fn revoke_by_device(&self, user_id: &str, device_id: &str) -> Result<u64, StoreError> {
        let now = now_secs()?;
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = ?, updated_at = ? WHERE user_id = ? AND device_id = ? AND revoked_at IS NULL",
        )
        .bind(now)
        .bind(now)
        .bind(user_id)
        .bind(device_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_expired(&self) -> Result<u64, StoreError> {
        let now = now_secs()?;
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn now_secs() -> Result<i64, StoreError> {
    unix_now()
        .map(|t| t as i64)
        .ok_or_else(|| StoreError::Backend("System time error".into()))
}
