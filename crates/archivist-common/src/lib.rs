//! Archivist Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, error handling and logging for the Archivist workspace.
//!
//! # Overview
//!
//! - **Types**: credential records, message records, file descriptors,
//!   change-log records and the deterministic [`types::TargetKey`]
//! - **Error Handling**: [`ArchivistError`] and its [`Result`] alias
//! - **Logging**: `tracing` subscriber setup shared by every binary
//!
//! # Example
//!
//! ```no_run
//! use archivist_common::types::ChangeRecord;
//!
//! fn load(raw: &str) -> archivist_common::Result<usize> {
//!     let records = ChangeRecord::parse_batch(raw)?;
//!     Ok(records.len())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{ArchivistError, Result};
