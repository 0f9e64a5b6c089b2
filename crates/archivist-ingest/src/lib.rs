//! Archivist Ingest Library
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//!
//! Archives chat attachments into object storage as change-log records for
//! messages arrive.
//!
//! # Pipeline
//!
//! - [`router::RecordRouter`]: decides what each change-log record needs and
//!   writes ingestion results back onto the message
//! - [`orchestrator::FileIngestor`]: resolves one credential per message and
//!   copies its files sequentially
//! - [`credentials`]: cached per-tenant credentials with lock-guarded refresh
//! - [`transfer::Transferer`]: authenticated streaming copy, wrapped in
//!   [`retry::RetryPolicy`]
//! - [`storage`]: S3 destination
//!
//! # Example
//!
//! ```no_run
//! use archivist_common::types::ChangeRecord;
//! use archivist_ingest::router::RecordRouter;
//!
//! async fn handle(router: &RecordRouter, raw: &str) -> anyhow::Result<()> {
//!     let records = ChangeRecord::parse_batch(raw)?;
//!     let report = router.process_batch(&records).await;
//!     println!("{} processed, {} failed", report.processed, report.failed);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod credentials;
pub mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod orchestrator;
pub mod persistence;
pub mod retry;
pub mod router;
pub mod storage;
pub mod transfer;

pub use config::IngestConfig;
pub use error::{ConfigError, CredentialError, FileError, PersistenceError, RouteError, TransferError};
