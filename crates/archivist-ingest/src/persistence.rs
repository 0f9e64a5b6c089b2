//! Write-back of ingestion results and the channel-name index

use crate::error::PersistenceError;
use archivist_common::types::{ChannelRecord, MessageRecord};
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, instrument};

/// Ingestion state on persisted message rows.
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Append `keys` to the message's completed keys. Never replaces.
    async fn append_completed_keys(
        &self,
        message: &MessageRecord,
        keys: &[String],
    ) -> Result<(), PersistenceError>;

    /// Set the failure flag and summary on the message.
    async fn mark_failed(&self, message: &MessageRecord, error: &str) -> Result<(), PersistenceError>;
}

/// External channel-name index, fed by channel change records.
#[async_trait]
pub trait ChannelIndex: Send + Sync {
    async fn upsert(&self, channel: &ChannelRecord) -> Result<(), PersistenceError>;
}

fn message_ref(message: &MessageRecord) -> String {
    format!("{}/{}/{}", message.tenant_id, message.channel_id, message.ts)
}

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    #[instrument(skip_all, fields(tenant = %message.tenant_id, ts = %message.ts, count = keys.len()))]
    async fn append_completed_keys(
        &self,
        message: &MessageRecord,
        keys: &[String],
    ) -> Result<(), PersistenceError> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET completed_keys = completed_keys || $4::text[],
                updated_at = NOW()
            WHERE tenant_id = $1 AND channel_id = $2 AND ts = $3
            "#,
        )
        .bind(&message.tenant_id)
        .bind(&message.channel_id)
        .bind(&message.ts)
        .bind(keys)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::NotFound(message_ref(message)));
        }

        debug!("completed keys appended");
        Ok(())
    }

    #[instrument(skip_all, fields(tenant = %message.tenant_id, ts = %message.ts))]
    async fn mark_failed(&self, message: &MessageRecord, error: &str) -> Result<(), PersistenceError> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET ingest_failed = TRUE,
                ingest_error = $4,
                updated_at = NOW()
            WHERE tenant_id = $1 AND channel_id = $2 AND ts = $3
            "#,
        )
        .bind(&message.tenant_id)
        .bind(&message.channel_id)
        .bind(&message.ts)
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::NotFound(message_ref(message)));
        }

        Ok(())
    }
}

#[derive(Clone)]
pub struct PgChannelIndex {
    pool: PgPool,
}

impl PgChannelIndex {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChannelIndex for PgChannelIndex {
    #[instrument(skip_all, fields(tenant = %channel.tenant_id, channel = %channel.channel_id))]
    async fn upsert(&self, channel: &ChannelRecord) -> Result<(), PersistenceError> {
        sqlx::query(
            r#"
            INSERT INTO channel_names (tenant_id, channel_id, name, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (tenant_id, channel_id) DO UPDATE SET
                name = COALESCE(excluded.name, channel_names.name),
                updated_at = NOW()
            "#,
        )
        .bind(&channel.tenant_id)
        .bind(&channel.channel_id)
        .bind(&channel.name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
