//! Scheduled cleanup of expired credentials.

use crate::db::Database;
use crate::rate_limit::RateLimitConfig;
use crate::refresh::RefreshStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Interval between cleanup runs.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60); // 1 hour

/// Run all cleanup tasks once.
pub async fn run_cleanup(db: &Database) {
    match db.refresh_tokens().delete_expired().await {
        Ok(count) if count > 0 => info!("Cleaned up {} expired refresh tokens", count),
        Ok(_) => {}
        Err(e) => error!("Failed to clean up expired refresh tokens: {}", e),
    }

    match db.web_sessions().delete_expired().await {
        Ok(count) if count > 0 => info!("Cleaned up {} expired web sessions", count),
        Ok(_) => {}
        Err(e) => error!("Failed to clean up expired web sessions: {}", e),
    }
}

/// Forget rate limiter state for clients that have gone quiet.
pub fn prune_rate_limits(rate_limits: &RateLimitConfig) {
    let before = rate_limits.tracked_clients();
    rate_limits.retain_recent();
    let after = rate_limits.tracked_clients();
    debug!(before, after, "Pruned rate limiter state");
}

/// Spawn a background task that runs cleanup periodically.
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_scheduler(
    db: Database,
    rate_limits: Arc<RateLimitConfig>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);

        loop {
            interval.tick().await;
            run_cleanup(&db).await;
            prune_rate_limits(&rate_limits);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oidc::ExternalIdentity;
    use crate::refresh::{NewRefreshToken, scope_metadata};

    #[tokio::test]
    async fn test_run_cleanup_removes_expired_only() {
        let db = Database::open(":memory:").await.unwrap();
        let user = db
            .users()
            .resolve(&ExternalIdentity {
                subject_id: "ext".to_string(),
                email: "cleanup@example.com".to_string(),
                name: None,
            })
            .await
            .unwrap();
        let store = db.refresh_tokens();
        for (hash, expires_at) in [("expired", 1), ("live", u64::from(u32::MAX))] {
            store
                .persist(
                    NewRefreshToken {
                        user_id: user.id.clone(),
                        device_id: "d1".to_string(),
                        token_hash: hash.to_string(),
                        scopes: vec![],
                        expires_at,
                        metadata: scope_metadata(&[]),
                    },
                    None,
                )
                .await
                .unwrap();
        }

        run_cleanup(&db).await;

        assert!(store.find_by_hash("expired").await.unwrap().is_none());
        assert!(store.find_by_hash("live").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_scheduler_prunes_shared_rate_limits() {
        let db = Database::open(":memory:").await.unwrap();
        let quota = governor::Quota::with_period(Duration::from_millis(5)).unwrap();
        let rate_limits = Arc::new(RateLimitConfig::with_quotas(quota, quota, true));
        assert!(rate_limits.refresh.check_key(&"198.51.100.7".to_string()).is_ok());
        assert_eq!(rate_limits.tracked_clients(), 1);

        tokio::time::sleep(Duration::from_millis(30)).await;
        // The first tick fires immediately
        let handle = spawn_cleanup_scheduler(db, rate_limits.clone());
        for _ in 0..50 {
            if rate_limits.tracked_clients() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();

        assert_eq!(rate_limits.tracked_clients(), 0);
    }
}
