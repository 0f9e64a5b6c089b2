//! Backing table for credential records

use crate::error::PersistenceError;
use archivist_common::types::{CredentialRecord, Expiry};
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, instrument};

/// Read/write access to stored credential records, one per tenant.
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    async fn load(&self, tenant_id: &str) -> Result<Option<CredentialRecord>, PersistenceError>;

    /// Insert or replace the tenant's record.
    async fn save(&self, record: &CredentialRecord) -> Result<(), PersistenceError>;

    async fn delete(&self, tenant_id: &str) -> Result<(), PersistenceError>;
}

#[derive(Debug, sqlx::FromRow)]
struct CredentialRow {
    tenant_id: String,
    sort_key: String,
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<i64>,
    scope: String,
    bot_user_id: String,
}

impl TryFrom<CredentialRow> for CredentialRecord {
    type Error = PersistenceError;

    fn try_from(row: CredentialRow) -> Result<Self, Self::Error> {
        let expires_at = Expiry::from_epoch(row.expires_at)
            .map_err(|e| PersistenceError::Corrupt(format!("tenant {}: {}", row.tenant_id, e)))?;

        Ok(CredentialRecord {
            tenant_id: row.tenant_id,
            access_token: row.access_token,
            refresh_token: row.refresh_token,
            expires_at,
            scope: row.scope,
            bot_user_id: row.bot_user_id,
            sort_key: row.sort_key,
        })
    }
}

/// Postgres-backed credential table.
///
/// Rows are keyed by `(tenant_id, sort_key)`; this repository only ever
/// touches rows under its own sort key.
#[derive(Clone)]
pub struct PgCredentialRepository {
    pool: PgPool,
    sort_key: String,
}

impl PgCredentialRepository {
    pub fn new(pool: PgPool, sort_key: impl Into<String>) -> Self {
        Self {
            pool,
            sort_key: sort_key.into(),
        }
    }
}

#[async_trait]
impl CredentialRepository for PgCredentialRepository {
    #[instrument(skip(self))]
    async fn load(&self, tenant_id: &str) -> Result<Option<CredentialRecord>, PersistenceError> {
        let row = sqlx::query_as::<_, CredentialRow>(
            r#"
            SELECT tenant_id, sort_key, access_token, refresh_token, expires_at, scope, bot_user_id
            FROM workspace_credentials
            WHERE tenant_id = $1 AND sort_key = $2
            "#,
        )
        .bind(tenant_id)
        .bind(&self.sort_key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(CredentialRecord::try_from).transpose()
    }

    #[instrument(skip(self, record), fields(tenant = %record.tenant_id))]
    async fn save(&self, record: &CredentialRecord) -> Result<(), PersistenceError> {
        // Last writer wins when two refreshes race.
        sqlx::query(
            r#"
            INSERT INTO workspace_credentials
                (tenant_id, sort_key, access_token, refresh_token, expires_at, scope, bot_user_id, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            ON CONFLICT (tenant_id, sort_key) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                scope = excluded.scope,
                bot_user_id = excluded.bot_user_id,
                updated_at = NOW()
            "#,
        )
        .bind(&record.tenant_id)
        .bind(&self.sort_key)
        .bind(&record.access_token)
        .bind(&record.refresh_token)
        .bind(record.expires_at.epoch_secs())
        .bind(&record.scope)
        .bind(&record.bot_user_id)
        .execute(&self.pool)
        .await?;

        debug!("credential saved");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, tenant_id: &str) -> Result<(), PersistenceError> {
        sqlx::query("DELETE FROM workspace_credentials WHERE tenant_id = $1 AND sort_key = $2")
            .bind(tenant_id)
            .bind(&self.sort_key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(expires_at: Option<i64>) -> CredentialRow {
        CredentialRow {
            tenant_id: "T1".to_string(),
            sort_key: "workspace-token".to_string(),
            access_token: "xoxe-1".to_string(),
            refresh_token: None,
            expires_at,
            scope: "files:read".to_string(),
            bot_user_id: "U0BOT".to_string(),
        }
    }

    #[test]
    fn test_row_conversion() {
        let record = CredentialRecord::try_from(row(Some(1_700_000_000))).unwrap();
        assert_eq!(record.expires_at, Expiry::At(1_700_000_000));
        assert_eq!(record.sort_key, "workspace-token");

        let unbounded = CredentialRecord::try_from(row(None)).unwrap();
        assert_eq!(unbounded.expires_at, Expiry::Never);
    }

    #[test]
    fn test_negative_expiry_is_corrupt() {
        let err = CredentialRecord::try_from(row(Some(-1))).unwrap_err();
        assert!(matches!(err, PersistenceError::Corrupt(_)));
    }
}
