//! In-memory collaborators for tests
//!
//! Compiled for unit tests and behind the `test-utils` feature, which the
//! integration tests enable.
//!
//! Each type implements one of the persistence or network traits and records
//! what was asked of it.

use crate::credentials::{CredentialRepository, RefreshGrant, TokenRefresher};
use crate::error::{CredentialError, PersistenceError};
use crate::persistence::{ChannelIndex, MessageRepository};
use crate::storage::{ChunkReceiver, ObjectStore, WriteError};
use archivist_common::types::{ChannelRecord, CredentialRecord, MessageRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub struct MemoryCredentialRepository {
    records: Mutex<HashMap<String, CredentialRecord>>,
    loads: AtomicUsize,
}

impl MemoryCredentialRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: CredentialRecord) {
        lock(&self.records).insert(record.tenant_id.clone(), record);
    }

    pub fn get(&self, tenant_id: &str) -> Option<CredentialRecord> {
        lock(&self.records).get(tenant_id).cloned()
    }

    pub fn contains(&self, tenant_id: &str) -> bool {
        lock(&self.records).contains_key(tenant_id)
    }

    pub fn remove(&self, tenant_id: &str) -> Option<CredentialRecord> {
        lock(&self.records).remove(tenant_id)
    }

    /// Reads that reached the repository, i.e. cache misses.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialRepository for MemoryCredentialRepository {
    async fn load(&self, tenant_id: &str) -> Result<Option<CredentialRecord>, PersistenceError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.get(tenant_id))
    }

    async fn save(&self, record: &CredentialRecord) -> Result<(), PersistenceError> {
        self.insert(record.clone());
        Ok(())
    }

    async fn delete(&self, tenant_id: &str) -> Result<(), PersistenceError> {
        self.remove(tenant_id);
        Ok(())
    }
}

/// Answers every refresh with the same grant or the same rejection.
pub struct ScriptedRefresher {
    outcome: Result<RefreshGrant, String>,
    calls: AtomicUsize,
    last_refresh_token: Mutex<Option<String>>,
}

impl ScriptedRefresher {
    pub fn succeeding(grant: RefreshGrant) -> Self {
        Self::with_outcome(Ok(grant))
    }

    pub fn failing(error: impl Into<String>) -> Self {
        Self::with_outcome(Err(error.into()))
    }

    fn with_outcome(outcome: Result<RefreshGrant, String>) -> Self {
        Self {
            outcome,
            calls: AtomicUsize::new(0),
            last_refresh_token: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_refresh_token(&self) -> Option<String> {
        lock(&self.last_refresh_token).clone()
    }
}

#[async_trait]
impl TokenRefresher for ScriptedRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshGrant, CredentialError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *lock(&self.last_refresh_token) = Some(refresh_token.to_string());
        self.outcome
            .clone()
            .map_err(CredentialError::RefreshRejected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub content_type: Option<String>,
}

/// Commits an object only once the whole body arrived.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, StoredObject>>,
    fail_with: Option<String>,
    writes: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects every write with `message` without storing anything.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fail_with: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        lock(&self.objects).get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.objects).keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        lock(&self.objects).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write calls received, successful or not.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn write(
        &self,
        key: &str,
        content_type: Option<&str>,
        mut chunks: ChunkReceiver,
    ) -> Result<u64, WriteError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_with {
            return Err(WriteError::Destination {
                started: false,
                message: message.clone(),
            });
        }

        let mut data = Vec::new();
        while let Some(bytes) = chunks.next().await? {
            data.extend_from_slice(&bytes);
        }

        let size = data.len() as u64;
        lock(&self.objects).insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.map(str::to_string),
            },
        );
        Ok(size)
    }
}

/// Message rows keyed by `(tenant, channel, ts)`.
///
/// Writes to a message that was never inserted fail with
/// [`PersistenceError::NotFound`], as an update of a missing row would.
#[derive(Default)]
pub struct MemoryMessageRepository {
    messages: Mutex<HashMap<(String, String, String), MessageRecord>>,
    writes: AtomicUsize,
    fail_appends: AtomicBool,
    fail_marks: AtomicBool,
}

fn message_key(message: &MessageRecord) -> (String, String, String) {
    (
        message.tenant_id.clone(),
        message.channel_id.clone(),
        message.ts.clone(),
    )
}

impl MemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, message: MessageRecord) {
        lock(&self.messages).insert(message_key(&message), message);
    }

    pub fn get(&self, tenant_id: &str, channel_id: &str, ts: &str) -> Option<MessageRecord> {
        let key = (tenant_id.to_string(), channel_id.to_string(), ts.to_string());
        lock(&self.messages).get(&key).cloned()
    }

    /// Successful writes of either kind.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub fn fail_marks(&self, fail: bool) {
        self.fail_marks.store(fail, Ordering::SeqCst);
    }

    fn update<F>(&self, message: &MessageRecord, apply: F) -> Result<(), PersistenceError>
    where
        F: FnOnce(&mut MessageRecord),
    {
        let mut messages = lock(&self.messages);
        let stored = messages.get_mut(&message_key(message)).ok_or_else(|| {
            PersistenceError::NotFound(format!(
                "{}/{}/{}",
                message.tenant_id, message.channel_id, message.ts
            ))
        })?;
        apply(stored);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl MessageRepository for MemoryMessageRepository {
    async fn append_completed_keys(
        &self,
        message: &MessageRecord,
        keys: &[String],
    ) -> Result<(), PersistenceError> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(PersistenceError::Corrupt("append rejected".to_string()));
        }
        self.update(message, |stored| stored.completed_keys.extend_from_slice(keys))
    }

    async fn mark_failed(&self, message: &MessageRecord, error: &str) -> Result<(), PersistenceError> {
        if self.fail_marks.load(Ordering::SeqCst) {
            return Err(PersistenceError::Corrupt("mark rejected".to_string()));
        }
        self.update(message, |stored| {
            stored.ingest_failed = true;
            stored.ingest_error = Some(error.to_string());
        })
    }
}

#[derive(Default)]
pub struct RecordingChannelIndex {
    upserts: Mutex<Vec<ChannelRecord>>,
}

impl RecordingChannelIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upserts(&self) -> Vec<ChannelRecord> {
        lock(&self.upserts).clone()
    }
}

#[async_trait]
impl ChannelIndex for RecordingChannelIndex {
    async fn upsert(&self, channel: &ChannelRecord) -> Result<(), PersistenceError> {
        lock(&self.upserts).push(channel.clone());
        Ok(())
    }
}
