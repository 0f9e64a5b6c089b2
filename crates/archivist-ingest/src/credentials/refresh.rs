//! Credential refresh with an advisory per-tenant lock

use super::{now_epoch, CredentialStore, TokenRefresher};
use crate::cache::AdvisoryLock;
use crate::error::CredentialError;
use archivist_common::types::{CredentialRecord, Expiry};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Keeps a tenant's credential usable, refreshing it when it nears expiry.
///
/// Concurrent executions may still both refresh the same tenant: the lock
/// check and the lock write are not atomic. Both refreshed token pairs stay
/// valid with the provider, and the last one saved wins.
pub struct RefreshCoordinator {
    store: Arc<CredentialStore>,
    refresher: Arc<dyn TokenRefresher>,
    lock: AdvisoryLock,
    lock_wait: Duration,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<CredentialStore>,
        refresher: Arc<dyn TokenRefresher>,
        lock: AdvisoryLock,
        lock_wait: Duration,
    ) -> Self {
        Self {
            store,
            refresher,
            lock,
            lock_wait,
        }
    }

    /// Load the tenant's credential and refresh it if needed.
    pub async fn resolve(&self, tenant_id: &str) -> Result<CredentialRecord, CredentialError> {
        let record = self.store.get_valid(tenant_id).await?;
        self.ensure_fresh(tenant_id, record).await
    }

    #[instrument(skip(self, record))]
    pub async fn ensure_fresh(
        &self,
        tenant_id: &str,
        record: CredentialRecord,
    ) -> Result<CredentialRecord, CredentialError> {
        let buffer = self.store.refresh_buffer_secs();
        if !record.is_expiring(now_epoch(), buffer) {
            return Ok(record);
        }

        let refresh_token = match record.refresh_token.as_deref() {
            Some(token) if !token.is_empty() => token.to_string(),
            _ => return Err(CredentialError::ExpiredNoRefresh(tenant_id.to_string())),
        };

        if self.lock.is_held(tenant_id) {
            debug!(wait_ms = self.lock_wait.as_millis() as u64, "refresh in progress elsewhere, waiting");
            tokio::time::sleep(self.lock_wait).await;

            match self.store.reload(tenant_id).await {
                Ok(current) if !current.is_expiring(now_epoch(), buffer) => {
                    info!("credential was refreshed by another execution");
                    return Ok(current);
                },
                Ok(_) => debug!("credential still expiring, refreshing anyway"),
                Err(e) => debug!(error = %e, "re-read failed, refreshing anyway"),
            }
        }

        self.lock.acquire(tenant_id);
        match self.refresh(&record, &refresh_token).await {
            // The lock is left to expire on its own after success.
            Ok(updated) => Ok(updated),
            Err(e) => {
                self.lock.release(tenant_id);
                warn!(error = %e, "credential refresh failed");
                Err(e)
            },
        }
    }

    async fn refresh(
        &self,
        record: &CredentialRecord,
        refresh_token: &str,
    ) -> Result<CredentialRecord, CredentialError> {
        let grant = self.refresher.refresh(refresh_token).await?;
        let expires_at = Expiry::after(now_epoch(), grant.expires_in);
        let updated = record.refreshed(grant.access_token, grant.refresh_token, expires_at);

        self.store.save(&updated).await?;

        info!(expires_at = ?updated.expires_at.epoch_secs(), "credential refreshed");
        Ok(updated)
    }
}
