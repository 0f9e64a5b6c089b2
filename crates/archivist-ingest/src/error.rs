//! Error types for the ingestion pipeline
//!
//! Each concern has its own enum so callers can tell a message-level failure
//! (credentials) from a file-level one (transfer) without string matching.

use thiserror::Error;

/// Missing or unusable settings. Fatal before any record is processed.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: '{value}'")]
    Invalid { name: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Failure to obtain a usable bearer credential for a tenant.
///
/// Always critical for the message being processed and never retried here.
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("No credential stored for tenant {0}")]
    NoCredential(String),

    #[error("Credential for tenant {0} expired and cannot be refreshed")]
    ExpiredNoRefresh(String),

    #[error("Token refresh rejected: {0}")]
    RefreshRejected(String),

    #[error("Token refresh request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Credential persistence failed: {0}")]
    Persistence(#[from] PersistenceError),
}

/// A single transfer attempt failed.
///
/// Variant names record whether the destination write had begun. Use
/// [`TransferError::upload_started`] when only that bit matters.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Source responded with HTTP {0}")]
    HttpStatus(u16),

    #[error("Network error before upload started: {0}")]
    PreUploadNetworkError(String),

    #[error("Source stream failed after upload started: {0}")]
    PostUploadStreamError(String),

    #[error("Timed out after {0}s before upload started")]
    PreUploadTimeout(u64),

    #[error("Timed out after {0}s with upload in progress")]
    PostUploadTimeout(u64),

    #[error("Destination write failed: {message}")]
    DestinationWriteError { upload_started: bool, message: String },
}

impl TransferError {
    pub fn upload_started(&self) -> bool {
        match self {
            TransferError::HttpStatus(_)
            | TransferError::PreUploadNetworkError(_)
            | TransferError::PreUploadTimeout(_) => false,
            TransferError::PostUploadStreamError(_) | TransferError::PostUploadTimeout(_) => true,
            TransferError::DestinationWriteError { upload_started, .. } => *upload_started,
        }
    }
}

/// Why one file of a message was not archived.
#[derive(Error, Debug)]
pub enum FileError {
    #[error("File {0} has no source URL and cannot be fetched")]
    Unfetchable(String),

    #[error(transparent)]
    Transfer(#[from] TransferError),
}

/// Backing store read or write failed.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt stored record: {0}")]
    Corrupt(String),

    #[error("Record not found: {0}")]
    NotFound(String),
}

/// Failure surfaced from routing one change-log record.
#[derive(Error, Debug)]
pub enum RouteError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("Channel index update failed: {0}")]
    ChannelIndex(String),
}
