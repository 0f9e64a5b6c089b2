//! Error types shared across Archivist crates

use thiserror::Error;

/// Result type alias for shared operations
pub type Result<T> = std::result::Result<T, ArchivistError>;

/// Main error type for shared Archivist code
#[derive(Error, Debug)]
pub enum ArchivistError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid expiry value: {0}")]
    InvalidExpiry(i64),
}
