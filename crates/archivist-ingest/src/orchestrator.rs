//! Per-message attachment ingestion

use crate::credentials::RefreshCoordinator;
use crate::error::{CredentialError, FileError};
use crate::retry::RetryPolicy;
use crate::transfer::Transferer;
use archivist_common::types::{FileDescriptor, MessageRecord, TargetKey};
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Debug)]
pub struct FileFailure {
    pub file_id: String,
    pub error: FileError,
}

/// Files of one message split by result. Either side may be empty.
#[derive(Debug, Default)]
pub struct IngestOutcome {
    pub completed: Vec<TargetKey>,
    pub failed: Vec<FileFailure>,
}

impl IngestOutcome {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    /// `Failed to process {n} file(s): {id1, id2, ...}`, or `None` when
    /// nothing failed.
    pub fn failure_summary(&self) -> Option<String> {
        if self.failed.is_empty() {
            return None;
        }
        let ids: Vec<&str> = self.failed.iter().map(|f| f.file_id.as_str()).collect();
        Some(format!(
            "Failed to process {} file(s): {}",
            self.failed.len(),
            ids.join(", ")
        ))
    }
}

pub struct FileIngestor {
    credentials: Arc<RefreshCoordinator>,
    transferer: Arc<Transferer>,
    retry: RetryPolicy,
    namespace: String,
}

impl FileIngestor {
    pub fn new(
        credentials: Arc<RefreshCoordinator>,
        transferer: Arc<Transferer>,
        retry: RetryPolicy,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            credentials,
            transferer,
            retry,
            namespace: namespace.into(),
        }
    }

    pub fn target_key(&self, message: &MessageRecord, file: &FileDescriptor) -> TargetKey {
        TargetKey::new(
            &self.namespace,
            &message.tenant_id,
            &message.channel_id,
            &message.ts,
            &file.id,
        )
    }

    /// Archive every file of `message`, one at a time.
    ///
    /// The only error is failing to obtain the tenant's credential, in which
    /// case no file is attempted. File failures land in
    /// [`IngestOutcome::failed`] and never stop the loop.
    #[instrument(skip_all, fields(tenant = %message.tenant_id, channel = %message.channel_id, ts = %message.ts))]
    pub async fn ingest(&self, message: &MessageRecord) -> Result<IngestOutcome, CredentialError> {
        let credential = self.credentials.resolve(&message.tenant_id).await?;

        let mut outcome = IngestOutcome::default();
        for file in &message.file_descriptors {
            match self.ingest_file(message, file, &credential.access_token).await {
                Ok(key) => outcome.completed.push(key),
                Err(error) => {
                    warn!(file_id = %file.id, error = %error, "file ingestion failed");
                    outcome.failed.push(FileFailure {
                        file_id: file.id.clone(),
                        error,
                    });
                },
            }
        }

        info!(
            completed = outcome.completed.len(),
            failed = outcome.failed.len(),
            "message ingestion finished"
        );
        Ok(outcome)
    }

    async fn ingest_file(
        &self,
        message: &MessageRecord,
        file: &FileDescriptor,
        token: &str,
    ) -> Result<TargetKey, FileError> {
        let source_url = file
            .source_url
            .as_deref()
            .ok_or_else(|| FileError::Unfetchable(file.id.clone()))?;

        let key = self.target_key(message, file);
        self.retry
            .run(|| {
                self.transferer
                    .transfer(source_url, token, &key, file.mimetype.as_deref())
            })
            .await?;

        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{AdvisoryLock, KeyedCache};
    use crate::credentials::{CredentialStore, RefreshGrant};
    use crate::error::TransferError;
    use crate::memory::{MemoryCredentialRepository, MemoryObjectStore, ScriptedRefresher};
    use archivist_common::types::{CredentialRecord, Expiry};
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Harness {
        store: Arc<MemoryObjectStore>,
        refresher: Arc<ScriptedRefresher>,
        ingestor: FileIngestor,
    }

    fn harness(credential: Option<CredentialRecord>) -> Harness {
        let repository = Arc::new(MemoryCredentialRepository::new());
        if let Some(record) = credential {
            repository.insert(record);
        }
        let refresher = Arc::new(ScriptedRefresher::failing("invalid_refresh_token"));
        let credentials = CredentialStore::new(
            repository,
            Arc::new(KeyedCache::new(Duration::from_secs(300))),
            "workspace-token",
            300,
        );
        let coordinator = RefreshCoordinator::new(
            Arc::new(credentials),
            refresher.clone(),
            AdvisoryLock::new(Arc::new(KeyedCache::new(Duration::from_secs(60))), Duration::from_secs(60)),
            Duration::from_millis(100),
        );
        let store = Arc::new(MemoryObjectStore::new());
        let transferer = Transferer::new(reqwest::Client::new(), store.clone(), Duration::from_secs(5));
        let ingestor = FileIngestor::new(
            Arc::new(coordinator),
            Arc::new(transferer),
            RetryPolicy::new(3, Duration::from_millis(5)),
            "ns",
        );
        Harness {
            store,
            refresher,
            ingestor,
        }
    }

    fn credential(expires_at: Expiry, refresh: Option<&str>) -> CredentialRecord {
        CredentialRecord {
            tenant_id: "T".to_string(),
            access_token: "xoxb-valid".to_string(),
            refresh_token: refresh.map(str::to_string),
            expires_at,
            scope: "files:read".to_string(),
            bot_user_id: "U0BOT".to_string(),
            sort_key: "workspace-token".to_string(),
        }
    }

    fn message(files: Vec<FileDescriptor>) -> MessageRecord {
        MessageRecord::new("T", "C", "ts").with_files(files)
    }

    #[test]
    fn test_failure_summary_format() {
        let outcome = IngestOutcome {
            completed: Vec::new(),
            failed: vec![
                FileFailure {
                    file_id: "f1".to_string(),
                    error: FileError::Unfetchable("f1".to_string()),
                },
                FileFailure {
                    file_id: "f3".to_string(),
                    error: FileError::Transfer(TransferError::HttpStatus(404)),
                },
            ],
        };
        assert_eq!(
            outcome.failure_summary().as_deref(),
            Some("Failed to process 2 file(s): f1, f3")
        );
        assert_eq!(IngestOutcome::default().failure_summary(), None);
    }

    #[tokio::test]
    async fn test_missing_source_url_is_unfetchable_and_loop_continues() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/f2"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"two".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let h = harness(Some(credential(Expiry::Never, None)));
        let msg = message(vec![
            FileDescriptor::new("f1"),
            FileDescriptor::new("f2").with_source_url(format!("{}/f2", server.uri())),
        ]);

        let outcome = h.ingestor.ingest(&msg).await.unwrap();
        assert_eq!(outcome.completed, vec![TargetKey::new("ns", "T", "C", "ts", "f2")]);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].file_id, "f1");
        assert!(matches!(outcome.failed[0].error, FileError::Unfetchable(ref id) if id == "f1"));
        assert_eq!(h.store.keys(), vec!["ns/T/C/ts/f2".to_string()]);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let h = harness(Some(credential(Expiry::Never, None)));
        let msg = message(vec![FileDescriptor::new("f1").with_source_url(server.uri())]);

        let outcome = h.ingestor.ingest(&msg).await.unwrap();
        assert_eq!(outcome.completed.len(), 1);
        assert!(!outcome.has_failures());
    }

    #[tokio::test]
    async fn test_persistent_failure_uses_whole_retry_budget() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let h = harness(Some(credential(Expiry::Never, None)));
        let msg = message(vec![FileDescriptor::new("f1").with_source_url(server.uri())]);

        let outcome = h.ingestor.ingest(&msg).await.unwrap();
        assert!(outcome.completed.is_empty());
        assert!(matches!(
            outcome.failed[0].error,
            FileError::Transfer(TransferError::HttpStatus(500))
        ));
    }

    #[tokio::test]
    async fn test_credential_failure_attempts_no_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let h = harness(Some(credential(
            Expiry::At(chrono::Utc::now().timestamp() - 60),
            Some("xoxe-r1"),
        )));
        let msg = message(vec![FileDescriptor::new("f1").with_source_url(server.uri())]);

        let err = h.ingestor.ingest(&msg).await.unwrap_err();
        assert!(matches!(err, CredentialError::RefreshRejected(_)));
        assert_eq!(h.refresher.calls(), 1);
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_missing_credential_is_critical() {
        let h = harness(None);
        let msg = message(vec![FileDescriptor::new("f1").with_source_url("http://127.0.0.1:9/f1")]);

        let err = h.ingestor.ingest(&msg).await.unwrap_err();
        assert!(matches!(err, CredentialError::NoCredential(_)));
    }

    #[tokio::test]
    async fn test_refreshed_token_is_used_for_downloads() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(wiremock::matchers::header("authorization", "Bearer xoxe-new"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"x".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let repository = Arc::new(MemoryCredentialRepository::new());
        repository.insert(credential(
            Expiry::At(chrono::Utc::now().timestamp() + 10),
            Some("xoxe-r1"),
        ));
        let coordinator = RefreshCoordinator::new(
            Arc::new(CredentialStore::new(
                repository,
                Arc::new(KeyedCache::new(Duration::from_secs(300))),
                "workspace-token",
                300,
            )),
            Arc::new(ScriptedRefresher::succeeding(RefreshGrant {
                access_token: "xoxe-new".to_string(),
                refresh_token: None,
                expires_in: Some(43_200),
            })),
            AdvisoryLock::new(Arc::new(KeyedCache::new(Duration::from_secs(60))), Duration::from_secs(60)),
            Duration::from_millis(100),
        );
        let store = Arc::new(MemoryObjectStore::new());
        let ingestor = FileIngestor::new(
            Arc::new(coordinator),
            Arc::new(Transferer::new(reqwest::Client::new(), store.clone(), Duration::from_secs(5))),
            RetryPolicy::new(1, Duration::ZERO),
            "ns",
        );

        let msg = message(vec![FileDescriptor::new("f1").with_source_url(server.uri())]);
        let outcome = ingestor.ingest(&msg).await.unwrap();
        assert_eq!(outcome.completed.len(), 1);
    }
}
