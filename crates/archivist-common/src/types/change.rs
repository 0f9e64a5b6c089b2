//! Change-log records delivered by the upstream log producer

use super::message::MessageRecord;
use crate::error::{ArchivistError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Insert,
    Update,
    Delete,
}

/// A channel entity, consumed by the channel-name index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRecord {
    pub tenant_id: String,
    pub channel_id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Entity image carried by a change-log record, tagged by `entity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "entity", rename_all = "lowercase")]
pub enum Payload {
    Message(MessageRecord),
    Channel(ChannelRecord),
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub event_type: EventType,
    #[serde(default)]
    pub new_payload: Option<Payload>,
    #[serde(default)]
    pub old_payload: Option<Payload>,
}

impl ChangeRecord {
    pub fn insert(payload: Payload) -> Self {
        Self {
            event_type: EventType::Insert,
            new_payload: Some(payload),
            old_payload: None,
        }
    }

    /// Parse a JSON array of change records.
    pub fn parse_batch(raw: &str) -> Result<Vec<ChangeRecord>> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        if !value.is_array() {
            return Err(ArchivistError::InvalidPayload(
                "expected a JSON array of change records".to_string(),
            ));
        }
        Ok(serde_json::from_value(value)?)
    }
}
