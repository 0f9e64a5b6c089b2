//! Change-log record routing and result write-back

use crate::error::RouteError;
use crate::orchestrator::{FileIngestor, IngestOutcome};
use crate::persistence::{ChannelIndex, MessageRepository};
use archivist_common::types::{ChangeRecord, ChannelRecord, EventType, MessageRecord, Payload};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Delete,
    NoPayload,
    NotMessage,
    NoFiles,
    AlreadyIngested,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SkipReason::Delete => "delete event",
            SkipReason::NoPayload => "no new payload",
            SkipReason::NotMessage => "not a message",
            SkipReason::NoFiles => "message has no files",
            SkipReason::AlreadyIngested => "already ingested",
        };
        f.write_str(reason)
    }
}

/// Where a record goes, decided from the record alone.
#[derive(Debug, PartialEq, Eq)]
pub enum Route<'a> {
    Skip(SkipReason),
    Channel(&'a ChannelRecord),
    Ingest(&'a MessageRecord),
}

impl<'a> Route<'a> {
    pub fn classify(record: &'a ChangeRecord) -> Self {
        if record.event_type == EventType::Delete {
            return Route::Skip(SkipReason::Delete);
        }
        match &record.new_payload {
            None => Route::Skip(SkipReason::NoPayload),
            Some(Payload::Channel(channel)) => Route::Channel(channel),
            Some(Payload::Other) => Route::Skip(SkipReason::NotMessage),
            Some(Payload::Message(message)) if !message.has_files() => {
                Route::Skip(SkipReason::NoFiles)
            },
            Some(Payload::Message(message)) if message.is_fully_ingested() => {
                Route::Skip(SkipReason::AlreadyIngested)
            },
            Some(Payload::Message(message)) => Route::Ingest(message),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    Skipped(SkipReason),
    ChannelIndexed,
    /// Counts from one ingestion pass over the message's files.
    Ingested { completed: usize, failed: usize },
}

/// Totals for one batch. `processed` counts every record attempted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub processed: usize,
    pub ingested: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct RecordRouter {
    ingestor: Arc<FileIngestor>,
    messages: Arc<dyn MessageRepository>,
    channels: Arc<dyn ChannelIndex>,
}

impl RecordRouter {
    pub fn new(
        ingestor: Arc<FileIngestor>,
        messages: Arc<dyn MessageRepository>,
        channels: Arc<dyn ChannelIndex>,
    ) -> Self {
        Self {
            ingestor,
            messages,
            channels,
        }
    }

    /// Route one record and persist what ingestion produced.
    ///
    /// A credential failure marks the whole message failed, writes no keys,
    /// and is returned to the caller. A failed write-back is handled the same
    /// way: the message is marked failed on a best-effort basis and the
    /// write-back error is returned.
    pub async fn route(&self, record: &ChangeRecord) -> Result<RouteOutcome, RouteError> {
        match Route::classify(record) {
            Route::Skip(reason) => {
                debug!(%reason, "skipping record");
                Ok(RouteOutcome::Skipped(reason))
            },
            Route::Channel(channel) => {
                self.channels
                    .upsert(channel)
                    .await
                    .map_err(|e| RouteError::ChannelIndex(e.to_string()))?;
                Ok(RouteOutcome::ChannelIndexed)
            },
            Route::Ingest(message) => self.ingest(message).await,
        }
    }

    #[instrument(skip_all, fields(tenant = %message.tenant_id, channel = %message.channel_id, ts = %message.ts))]
    async fn ingest(&self, message: &MessageRecord) -> Result<RouteOutcome, RouteError> {
        let outcome = match self.ingestor.ingest(message).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "credential resolution failed, marking message failed");
                if let Err(mark_err) = self.messages.mark_failed(message, &e.to_string()).await {
                    error!(error = %mark_err, "failed to mark message as failed");
                }
                return Err(e.into());
            },
        };

        if let Err(e) = self.write_back(message, &outcome).await {
            error!(error = %e, "result write-back failed, marking message failed");
            if let Err(mark_err) = self.messages.mark_failed(message, &e.to_string()).await {
                error!(error = %mark_err, "failed to mark message as failed");
            }
            return Err(e);
        }

        Ok(RouteOutcome::Ingested {
            completed: outcome.completed.len(),
            failed: outcome.failed.len(),
        })
    }

    async fn write_back(&self, message: &MessageRecord, outcome: &IngestOutcome) -> Result<(), RouteError> {
        // Keys are deterministic, so a retried file yields a key that may
        // already be recorded.
        let new_keys: Vec<String> = outcome
            .completed
            .iter()
            .map(|key| key.as_str().to_string())
            .filter(|key| !message.completed_keys.contains(key))
            .collect();

        if !new_keys.is_empty() {
            self.messages.append_completed_keys(message, &new_keys).await?;
        }

        if let Some(summary) = outcome.failure_summary() {
            warn!(%summary, "message partially ingested");
            self.messages.mark_failed(message, &summary).await?;
        }
        Ok(())
    }

    /// Process records strictly in order. A failing record is logged and
    /// counted; it never stops the batch.
    pub async fn process_batch(&self, records: &[ChangeRecord]) -> BatchReport {
        let mut report = BatchReport::default();
        for (index, record) in records.iter().enumerate() {
            report.processed += 1;
            match self.route(record).await {
                Ok(RouteOutcome::Skipped(_)) => report.skipped += 1,
                Ok(RouteOutcome::ChannelIndexed) => {},
                Ok(RouteOutcome::Ingested { failed, .. }) => {
                    if failed > 0 {
                        report.failed += 1;
                    } else {
                        report.ingested += 1;
                    }
                },
                Err(e) => {
                    error!(index, error = %e, "record processing failed");
                    report.failed += 1;
                },
            }
        }

        info!(
            processed = report.processed,
            ingested = report.ingested,
            skipped = report.skipped,
            failed = report.failed,
            "batch processed"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archivist_common::types::FileDescriptor;

    fn message(files: usize, completed: usize) -> MessageRecord {
        let mut message = MessageRecord::new("T", "C", "ts").with_files(
            (0..files)
                .map(|i| FileDescriptor::new(format!("f{}", i)))
                .collect(),
        );
        message.completed_keys = (0..completed).map(|i| format!("ns/T/C/ts/f{}", i)).collect();
        message
    }

    #[test]
    fn test_delete_is_skipped_even_with_payload() {
        let mut record = ChangeRecord::insert(Payload::Message(message(1, 0)));
        record.event_type = EventType::Delete;
        assert_eq!(Route::classify(&record), Route::Skip(SkipReason::Delete));
    }

    #[test]
    fn test_missing_payload_is_skipped() {
        let record = ChangeRecord {
            event_type: EventType::Update,
            new_payload: None,
            old_payload: Some(Payload::Other),
        };
        assert_eq!(Route::classify(&record), Route::Skip(SkipReason::NoPayload));
    }

    #[test]
    fn test_non_message_entities() {
        let other = ChangeRecord::insert(Payload::Other);
        assert_eq!(Route::classify(&other), Route::Skip(SkipReason::NotMessage));

        let channel = ChannelRecord {
            tenant_id: "T".to_string(),
            channel_id: "C".to_string(),
            name: Some("general".to_string()),
        };
        let record = ChangeRecord::insert(Payload::Channel(channel.clone()));
        assert_eq!(Route::classify(&record), Route::Channel(&channel));
    }

    #[test]
    fn test_message_routing() {
        let empty = ChangeRecord::insert(Payload::Message(message(0, 0)));
        assert_eq!(Route::classify(&empty), Route::Skip(SkipReason::NoFiles));

        let done = ChangeRecord::insert(Payload::Message(message(2, 2)));
        assert_eq!(Route::classify(&done), Route::Skip(SkipReason::AlreadyIngested));

        let partial = message(2, 1);
        let record = ChangeRecord::insert(Payload::Message(partial.clone()));
        assert_eq!(Route::classify(&record), Route::Ingest(&partial));
    }
}
