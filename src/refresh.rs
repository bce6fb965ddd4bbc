//! Refresh token persistence contract and rotation.
//!
//! Only hashes of refresh tokens are stored. Every way a presented refresh
//! token can be unusable collapses into [`RefreshError::InvalidRefreshToken`];
//! the precise reason is logged and never returned to the client.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::issuer::{TokenIssuer, TokenPair, hash_refresh_token};
use crate::jwt::{JwtError, unix_now};

/// A stored refresh token.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshTokenRecord {
    pub id: String,
    pub user_id: String,
    pub device_id: String,
    pub token_hash: String,
    pub scopes: Vec<String>,
    /// Unix seconds
    pub expires_at: u64,
    pub revoked_at: Option<u64>,
    pub rotated_at: Option<u64>,
    pub metadata: Map<String, Value>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl RefreshTokenRecord {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

/// Input for a new refresh token record.
#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    pub user_id: String,
    pub device_id: String,
    pub token_hash: String,
    pub scopes: Vec<String>,
    pub expires_at: u64,
    pub metadata: Map<String, Value>,
}

/// Storage for refresh token records.
#[async_trait]
pub trait RefreshStore: Send + Sync {
    /// Insert `token`. With `previous_token_hash`, the previous record is
    /// marked revoked and rotated in the same transaction; if it is no longer
    /// active nothing is written and [`StoreError::Stale`] is returned.
    async fn persist(
        &self,
        token: NewRefreshToken,
        previous_token_hash: Option<&str>,
    ) -> Result<RefreshTokenRecord, StoreError>;

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>, StoreError>;

    /// Revoke every active record for the device. Returns how many were revoked.
    async fn revoke_by_device(&self, user_id: &str, device_id: &str) -> Result<u64, StoreError>;

    /// Delete records that expired. Returns how many were deleted.
    async fn delete_expired(&self) -> Result<u64, StoreError>;
}

/// Errors that can occur in a refresh store.
#[derive(Debug)]
pub enum StoreError {
    /// The record being rotated was revoked or rotated concurrently
    Stale,
    /// Storage could not be reached
    Unavailable(String),
    /// Any other storage failure
    Backend(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Stale => write!(f, "Refresh token is no longer active"),
            StoreError::Unavailable(e) => write!(f, "Store unavailable: {}", e),
            StoreError::Backend(e) => write!(f, "Store error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

/// Why a refresh attempt was refused. Only logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NotFound,
    Revoked,
    DeviceMismatch,
    Expired,
    LostRotationRace,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::NotFound => "not_found",
            RejectReason::Revoked => "revoked",
            RejectReason::DeviceMismatch => "device_mismatch",
            RejectReason::Expired => "expired",
            RejectReason::LostRotationRace => "lost_rotation_race",
        }
    }
}

/// Outcome of a failed refresh.
#[derive(Debug)]
pub enum RefreshError {
    /// Uniform rejection for every unusable refresh token
    InvalidRefreshToken,
    /// Storage could not be reached
    Unavailable(String),
    /// Unexpected storage or signing failure
    Internal(String),
}

impl std::fmt::Display for RefreshError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefreshError::InvalidRefreshToken => write!(f, "Invalid refresh token"),
            RefreshError::Unavailable(e) => write!(f, "Store unavailable: {}", e),
            RefreshError::Internal(e) => write!(f, "Internal error: {}", e),
        }
    }
}

impl std::error::Error for RefreshError {}

impl From<StoreError> for RefreshError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Stale => RefreshError::InvalidRefreshToken,
            StoreError::Unavailable(e) => RefreshError::Unavailable(e),
            StoreError::Backend(e) => RefreshError::Internal(e),
        }
    }
}

impl From<JwtError> for RefreshError {
    fn from(e: JwtError) -> Self {
        RefreshError::Internal(e.to_string())
    }
}

/// Check a stored record against the presenting device at `now`.
pub fn validate_record(
    record: &RefreshTokenRecord,
    device_id: &str,
    now: u64,
) -> Result<(), RejectReason> {
    if record.is_revoked() {
        return Err(RejectReason::Revoked);
    }
    if record.device_id != device_id {
        return Err(RejectReason::DeviceMismatch);
    }
    if record.expires_at <= now {
        return Err(RejectReason::Expired);
    }
    Ok(())
}

/// Snapshot stored alongside each record for audit.
pub fn scope_metadata(scopes: &[String]) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert(
        "scopes".to_string(),
        Value::Array(scopes.iter().cloned().map(Value::String).collect()),
    );
    metadata
}

/// Exchange a refresh token for a new pair, retiring the old token.
pub async fn rotate(
    store: &dyn RefreshStore,
    issuer: &TokenIssuer,
    refresh_token: &str,
    device_id: &str,
) -> Result<(TokenPair, RefreshTokenRecord), RefreshError> {
    let now = unix_now().ok_or_else(|| RefreshError::Internal("System time error".into()))?;
    let token_hash = hash_refresh_token(refresh_token);

    let Some(record) = store.find_by_hash(&token_hash).await? else {
        return Err(reject(RejectReason::NotFound, None, device_id));
    };

    if let Err(reason) = validate_record(&record, device_id, now) {
        if reason == RejectReason::Revoked && record.rotated_at.is_some() {
            // A rotated token coming back is a replay of an old credential.
            warn!(
                user_id = %record.user_id,
                device_id = %record.device_id,
                "Rotated refresh token presented again"
            );
        }
        return Err(reject(reason, Some(&record), device_id));
    }

    let pair = issuer.issue_at(&record.user_id, &record.device_id, &record.scopes, now)?;
    let new_token = NewRefreshToken {
        user_id: record.user_id.clone(),
        device_id: record.device_id.clone(),
        token_hash: hash_refresh_token(&pair.refresh_token),
        scopes: pair.scopes.clone(),
        expires_at: pair.refresh_token_expires_at,
        metadata: scope_metadata(&pair.scopes),
    };

    match store.persist(new_token, Some(&token_hash)).await {
        Ok(stored) => {
            info!(user_id = %stored.user_id, device_id = %stored.device_id, "Refresh token rotated");
            Ok((pair, stored))
        }
        Err(StoreError::Stale) => Err(reject(
            RejectReason::LostRotationRace,
            Some(&record),
            device_id,
        )),
        Err(e) => Err(e.into()),
    }
}

fn reject(
    reason: RejectReason,
    record: Option<&RefreshTokenRecord>,
    device_id: &str,
) -> RefreshError {
    info!(
        reason = reason.as_str(),
        user_id = record.map(|r| r.user_id.as_str()).unwrap_or("-"),
        presented_device_id = %device_id,
        "Refresh token rejected"
    );
    RefreshError::InvalidRefreshToken
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(device_id: &str, expires_at: u64) -> RefreshTokenRecord {
        RefreshTokenRecord {
            id: "r1".to_string(),
            user_id: "u1".to_string(),
            device_id: device_id.to_string(),
            token_hash: "h".to_string(),
            scopes: vec!["chat:rw".to_string()],
            expires_at,
            revoked_at: None,
            rotated_at: None,
            metadata: Map::new(),
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_validate_record() {
        let active = record("d1", 100);
        assert_eq!(validate_record(&active, "d1", 50), Ok(()));
        assert_eq!(
            validate_record(&active, "d2", 50),
            Err(RejectReason::DeviceMismatch)
        );
        assert_eq!(validate_record(&active, "d1", 100), Err(RejectReason::Expired));

        let mut revoked = active.clone();
        revoked.revoked_at = Some(10);
        assert_eq!(validate_record(&revoked, "d1", 50), Err(RejectReason::Revoked));
    }

    #[test]
    fn test_store_errors_map_uniformly() {
        assert!(matches!(
            RefreshError::from(StoreError::Stale),
            RefreshError::InvalidRefreshToken
        ));
        assert!(matches!(
            RefreshError::from(StoreError::Unavailable("down".into())),
            RefreshError::Unavailable(_)
        ));
        assert!(matches!(
            RefreshError::from(StoreError::Backend("boom".into())),
            RefreshError::Internal(_)
        ));
    }

    #[test]
    fn test_scope_metadata() {
        let metadata = scope_metadata(&["a".to_string(), "b".to_string()]);
        assert_eq!(metadata["scopes"], serde_json::json!(["a", "b"]));
    }
}
