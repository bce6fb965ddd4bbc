use sqlx::sqlite::SqlitePool;
use uuid::Uuid;

use crate::jwt::unix_now;
use crate::oidc::ExternalIdentity;
use crate::refresh::StoreError;

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub external_subject: Option<String>,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    email: String,
    name: Option<String>,
    external_subject: Option<String>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            email: row.email,
            name: row.name,
            external_subject: row.external_subject,
        }
    }
}

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, email, name, external_subject FROM users WHERE email = ?",
        )
        .bind(email.trim())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    /// Map an external identity to an internal user, creating one on first login.
    /// The email is the join key; name and external subject follow the provider.
    pub async fn resolve(&self, identity: &ExternalIdentity) -> Result<User, StoreError> {
        let now = unix_now().unwrap_or(0) as i64;
        let email = identity.email.trim();
        let id = Uuid::new_v4().to_string();

        // Upsert keyed on the case-insensitive email column.
        sqlx::query(
            "INSERT INTO users (id, email, name, external_subject, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(email) DO UPDATE SET
                name = COALESCE(excluded.name, users.name),
                external_subject = excluded.external_subject,
                updated_at = excluded.updated_at",
        )
        .bind(&id)
        .bind(email)
        .bind(identity.name.as_deref())
        .bind(&identity.subject_id)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_by_email(email)
            .await?
            .ok_or_else(|| StoreError::Backend("User vanished after upsert".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn identity(email: &str, name: Option<&str>) -> ExternalIdentity {
        ExternalIdentity {
            subject_id: format!("ext-{email}"),
            email: email.to_string(),
            name: name.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_resolve_creates_then_reuses() {
        let db = Database::open(":memory:").await.unwrap();
        let users = db.users();

        let first = users.resolve(&identity("alice@example.com", Some("Alice"))).await.unwrap();
        let again = users.resolve(&identity("ALICE@example.com", None)).await.unwrap();

        assert_eq!(first.id, again.id);
        assert_eq!(again.name.as_deref(), Some("Alice"));
        assert_eq!(users.get_by_email("alice@example.com").await.unwrap(), Some(again));
    }

    #[tokio::test]
    async fn test_distinct_emails_get_distinct_users() {
        let db = Database::open(":memory:").await.unwrap();
        let users = db.users();
        let a = users.resolve(&identity("a@example.com", None)).await.unwrap();
        let b = users.resolve(&identity("b@example.com", None)).await.unwrap();
        assert_ne!(a.id, b.id);
        assert!(users.get_by_email("c@example.com").await.unwrap().is_none());
    }
}
