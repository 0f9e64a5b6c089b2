//! Cached access to stored credentials

use super::{now_epoch, CredentialRepository};
use crate::cache::KeyedCache;
use crate::error::CredentialError;
use archivist_common::types::CredentialRecord;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Share of a credential's remaining life it may spend in the cache.
const CACHE_LIFE_FRACTION: f64 = 0.6;

pub struct CredentialStore {
    repository: Arc<dyn CredentialRepository>,
    cache: Arc<KeyedCache<CredentialRecord>>,
    namespace: String,
    refresh_buffer_secs: i64,
}

impl CredentialStore {
    /// `cache`'s default TTL is used for credentials with unbounded expiry.
    pub fn new(
        repository: Arc<dyn CredentialRepository>,
        cache: Arc<KeyedCache<CredentialRecord>>,
        namespace: impl Into<String>,
        refresh_buffer_secs: i64,
    ) -> Self {
        Self {
            repository,
            cache,
            namespace: namespace.into(),
            refresh_buffer_secs,
        }
    }

    pub fn refresh_buffer_secs(&self) -> i64 {
        self.refresh_buffer_secs
    }

    fn cache_key(&self, tenant_id: &str) -> String {
        format!("{}:{}", self.namespace, tenant_id)
    }

    /// Fetch the tenant's credential, from cache when possible.
    ///
    /// A stored record that is expired and has no refresh token is deleted
    /// and reported as [`CredentialError::ExpiredNoRefresh`]. An expiring
    /// record that can be refreshed is returned as-is for the caller to
    /// refresh.
    #[instrument(skip(self))]
    pub async fn get_valid(&self, tenant_id: &str) -> Result<CredentialRecord, CredentialError> {
        let key = self.cache_key(tenant_id);
        if let Some(record) = self.cache.get(&key) {
            debug!("credential cache hit");
            return Ok(record);
        }

        let record = self
            .repository
            .load(tenant_id)
            .await?
            .ok_or_else(|| CredentialError::NoCredential(tenant_id.to_string()))?;

        let now = now_epoch();
        if record.is_expiring(now, self.refresh_buffer_secs) && !record.is_refreshable() {
            warn!("stored credential expired without refresh token, deleting it");
            self.repository.delete(tenant_id).await?;
            return Err(CredentialError::ExpiredNoRefresh(tenant_id.to_string()));
        }

        self.cache_record(&key, &record, now);
        Ok(record)
    }

    /// Drop any cached copy and read the backing store again.
    pub async fn reload(&self, tenant_id: &str) -> Result<CredentialRecord, CredentialError> {
        self.cache.remove(&self.cache_key(tenant_id));
        self.get_valid(tenant_id).await
    }

    /// Persist `record` and replace the cached copy.
    #[instrument(skip(self, record), fields(tenant = %record.tenant_id))]
    pub async fn save(&self, record: &CredentialRecord) -> Result<(), CredentialError> {
        self.repository.save(record).await?;
        self.cache_record(&self.cache_key(&record.tenant_id), record, now_epoch());
        Ok(())
    }

    fn cache_record(&self, key: &str, record: &CredentialRecord, now: i64) {
        match record.expires_at.remaining(now) {
            None => self.cache.set(key, record.clone(), None),
            Some(remaining) => {
                let ttl = remaining.mul_f64(CACHE_LIFE_FRACTION);
                if ttl.is_zero() {
                    self.cache.remove(key);
                } else {
                    self.cache.set(key, record.clone(), Some(ttl));
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCredentialRepository;
    use archivist_common::types::Expiry;
    use std::time::Duration;

    fn credential(expires_at: Expiry, refresh: Option<&str>) -> CredentialRecord {
        CredentialRecord {
            tenant_id: "T1".to_string(),
            access_token: "xoxe-1".to_string(),
            refresh_token: refresh.map(str::to_string),
            expires_at,
            scope: "files:read".to_string(),
            bot_user_id: "U0BOT".to_string(),
            sort_key: "workspace-token".to_string(),
        }
    }

    fn store(repository: Arc<MemoryCredentialRepository>) -> CredentialStore {
        CredentialStore::new(
            repository,
            Arc::new(KeyedCache::new(Duration::from_secs(300))),
            "workspace-token",
            300,
        )
    }

    #[tokio::test]
    async fn test_missing_credential() {
        let store = store(Arc::new(MemoryCredentialRepository::new()));
        let err = store.get_valid("T1").await.unwrap_err();
        assert!(matches!(err, CredentialError::NoCredential(t) if t == "T1"));
    }

    #[tokio::test]
    async fn test_expired_without_refresh_token_is_deleted() {
        let repository = Arc::new(MemoryCredentialRepository::new());
        repository.insert(credential(Expiry::At(now_epoch() - 1), None));

        let err = store(repository.clone()).get_valid("T1").await.unwrap_err();
        assert!(matches!(err, CredentialError::ExpiredNoRefresh(_)));
        assert!(!repository.contains("T1"));
    }

    #[tokio::test]
    async fn test_expired_refreshable_is_returned_and_kept() {
        let repository = Arc::new(MemoryCredentialRepository::new());
        repository.insert(credential(Expiry::At(now_epoch() - 1), Some("xoxe-r")));

        let record = store(repository.clone()).get_valid("T1").await.unwrap();
        assert!(record.is_expiring(now_epoch(), 300));
        assert!(repository.contains("T1"));
    }

    #[tokio::test]
    async fn test_valid_credential_is_cached() {
        let repository = Arc::new(MemoryCredentialRepository::new());
        repository.insert(credential(Expiry::At(now_epoch() + 3_600), None));
        let store = store(repository.clone());

        store.get_valid("T1").await.unwrap();
        repository.remove("T1");

        let cached = store.get_valid("T1").await.unwrap();
        assert_eq!(cached.access_token, "xoxe-1");
        assert_eq!(repository.load_count(), 1);

        let err = store.reload("T1").await.unwrap_err();
        assert!(matches!(err, CredentialError::NoCredential(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_ttl_is_fraction_of_remaining_life() {
        let repository = Arc::new(MemoryCredentialRepository::new());
        repository.insert(credential(Expiry::At(now_epoch() + 1_000), None));
        let store = store(repository.clone());

        store.get_valid("T1").await.unwrap();
        tokio::time::advance(Duration::from_secs(590)).await;
        store.get_valid("T1").await.unwrap();
        assert_eq!(repository.load_count(), 1);

        tokio::time::advance(Duration::from_secs(20)).await;
        store.get_valid("T1").await.unwrap();
        assert_eq!(repository.load_count(), 2);
    }

    #[tokio::test]
    async fn test_unbounded_credential_uses_default_ttl() {
        let repository = Arc::new(MemoryCredentialRepository::new());
        repository.insert(credential(Expiry::Never, None));
        let store = store(repository.clone());

        store.get_valid("T1").await.unwrap();
        store.get_valid("T1").await.unwrap();
        assert_eq!(repository.load_count(), 1);
    }

    #[tokio::test]
    async fn test_save_updates_cache() {
        let repository = Arc::new(MemoryCredentialRepository::new());
        let store = store(repository.clone());

        let mut record = credential(Expiry::Never, Some("r"));
        store.save(&record).await.unwrap();
        record.access_token = "xoxe-2".to_string();
        repository.insert(record);

        assert_eq!(store.get_valid("T1").await.unwrap().access_token, "xoxe-1");
        assert_eq!(store.reload("T1").await.unwrap().access_token, "xoxe-2");
    }
}
