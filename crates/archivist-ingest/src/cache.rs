//! Process-local TTL cache and the advisory refresh lock built on it
//!
//! Entries expire lazily on read; [`KeyedCache::purge_expired`] sweeps the
//! rest. Time comes from `tokio::time` so tests can drive it with a paused
//! clock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// String-keyed cache where every write carries its own TTL.
pub struct KeyedCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    default_ttl: Duration,
}

impl<V: Clone> KeyedCache<V> {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            default_ttl,
        }
    }

    // A panic while holding the lock cannot leave a half-written entry, so a
    // poisoned map is still consistent.
    fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the value if present and not expired. Expired entries are
    /// dropped on the way out.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.entries();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Some(entry.value.clone()),
            Some(_) => {
                trace!(key, "cache entry expired");
                entries.remove(key);
                None
            },
            None => None,
        }
    }

    /// Store `value` for `ttl`, or the cache default when `None`.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let expires_at = Instant::now() + ttl.unwrap_or(self.default_ttl);
        self.entries().insert(key.into(), CacheEntry { value, expires_at });
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.entries().remove(key).map(|entry| entry.value)
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before - entries.len()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries().values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }
}

/// Best-effort marker meaning "a refresh for this tenant started recently".
///
/// This is not a mutex. Two callers can both observe the lock as free and
/// both refresh; absence of the marker never proves no refresh is running.
#[derive(Clone)]
pub struct AdvisoryLock {
    cache: Arc<KeyedCache<bool>>,
    ttl: Duration,
}

impl AdvisoryLock {
    pub fn new(cache: Arc<KeyedCache<bool>>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    fn key(tenant_id: &str) -> String {
        format!("refresh-lock:{}", tenant_id)
    }

    pub fn is_held(&self, tenant_id: &str) -> bool {
        self.cache.get(&Self::key(tenant_id)).unwrap_or(false)
    }

    /// Mark the tenant as refreshing. Overwrites any existing marker.
    pub fn acquire(&self, tenant_id: &str) {
        self.cache.set(Self::key(tenant_id), true, Some(self.ttl));
    }

    pub fn release(&self, tenant_id: &str) {
        self.cache.remove(&Self::key(tenant_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_lazily() {
        let cache = KeyedCache::new(Duration::from_secs(10));
        cache.set("a", 1, None);
        cache.set("b", 2, Some(Duration::from_secs(30)));

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(cache.get("a"), Some(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get("a"), None);
        assert!(!cache.has("a"));
        assert_eq!(cache.get("b"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = KeyedCache::new(Duration::from_secs(5));
        cache.set("short", "x", None);
        cache.set("long", "y", Some(Duration::from_secs(60)));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.purge_expired(), 0);
        assert_eq!(cache.get("long"), Some("y"));
    }

    #[tokio::test]
    async fn test_overwrite_and_remove() {
        let cache = KeyedCache::new(Duration::from_secs(60));
        cache.set("k", 1, None);
        cache.set("k", 2, None);
        assert_eq!(cache.get("k"), Some(2));
        assert_eq!(cache.remove("k"), Some(2));
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_advisory_lock_expires() {
        let lock = AdvisoryLock::new(
            Arc::new(KeyedCache::new(Duration::from_secs(1))),
            Duration::from_secs(60),
        );
        assert!(!lock.is_held("T1"));

        lock.acquire("T1");
        assert!(lock.is_held("T1"));
        assert!(!lock.is_held("T2"));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(!lock.is_held("T1"));
    }

    #[tokio::test]
    async fn test_advisory_lock_release() {
        let lock = AdvisoryLock::new(
            Arc::new(KeyedCache::new(Duration::from_secs(1))),
            Duration::from_secs(60),
        );
        lock.acquire("T1");
        lock.release("T1");
        assert!(!lock.is_held("T1"));
    }
}
