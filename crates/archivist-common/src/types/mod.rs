//! Domain types shared between the ingestion pipeline and its collaborators

mod change;
mod credential;
mod message;
mod target_key;

pub use change::{ChangeRecord, ChannelRecord, EventType, Payload};
pub use credential::{CredentialRecord, Expiry};
pub use message::{FileDescriptor, MessageRecord};
pub use target_key::TargetKey;
