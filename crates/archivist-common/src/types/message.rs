//! Message records and the attachments they reference

use serde::{Deserialize, Serialize};

/// One attachment referenced by a message.
///
/// A descriptor without `source_url` points at a file shared from another
/// workspace and can never be fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mimetype: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
}

impl FileDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            mimetype: None,
            source_url: None,
        }
    }

    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    pub fn with_mimetype(mut self, mimetype: impl Into<String>) -> Self {
        self.mimetype = Some(mimetype.into());
        self
    }
}

/// A chat message as persisted in the change log's backing table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub tenant_id: String,
    pub channel_id: String,
    pub ts: String,
    #[serde(default)]
    pub file_descriptors: Vec<FileDescriptor>,
    /// Target keys already written to storage. Append-only.
    #[serde(default)]
    pub completed_keys: Vec<String>,
    #[serde(default)]
    pub ingest_failed: bool,
    #[serde(default)]
    pub ingest_error: Option<String>,
}

impl MessageRecord {
    pub fn new(
        tenant_id: impl Into<String>,
        channel_id: impl Into<String>,
        ts: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            channel_id: channel_id.into(),
            ts: ts.into(),
            file_descriptors: Vec::new(),
            completed_keys: Vec::new(),
            ingest_failed: false,
            ingest_error: None,
        }
    }

    pub fn with_files(mut self, files: Vec<FileDescriptor>) -> Self {
        self.file_descriptors = files;
        self
    }

    pub fn has_files(&self) -> bool {
        !self.file_descriptors.is_empty()
    }

    /// Every descriptor has a completed key.
    pub fn is_fully_ingested(&self) -> bool {
        self.has_files() && self.completed_keys.len() >= self.file_descriptors.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_fully_ingested() {
        let mut message = MessageRecord::new("T1", "C1", "1700000000.000100")
            .with_files(vec![FileDescriptor::new("F1"), FileDescriptor::new("F2")]);
        assert!(!message.is_fully_ingested());

        message.completed_keys.push("a".to_string());
        assert!(!message.is_fully_ingested());

        message.completed_keys.push("b".to_string());
        assert!(message.is_fully_ingested());
    }

    #[test]
    fn test_message_without_files_is_never_ingested() {
        let message = MessageRecord::new("T1", "C1", "1");
        assert!(!message.has_files());
        assert!(!message.is_fully_ingested());
    }

    #[test]
    fn test_deserialize_defaults() {
        let message: MessageRecord = serde_json::from_str(
            r#"{"tenantId":"T1","channelId":"C1","ts":"1.2","fileDescriptors":[{"id":"F1"}]}"#,
        )
        .unwrap();
        assert_eq!(message.file_descriptors[0].source_url, None);
        assert!(message.completed_keys.is_empty());
        assert!(!message.ingest_failed);
    }
}
