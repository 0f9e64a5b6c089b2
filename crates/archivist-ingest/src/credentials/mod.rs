//! Per-tenant bearer credential lifecycle
//!
//! - [`CredentialStore`]: cached reads of the stored record, with deletion of
//!   records that expired and can never be refreshed
//! - [`RefreshCoordinator`]: upstream refresh guarded by an advisory lock
//! - [`CredentialRepository`]: backing table access
//! - [`TokenRefresher`]: the provider's refresh endpoint

pub mod oauth;
pub mod refresh;
pub mod repository;
pub mod store;

pub use oauth::{OAuthRefresher, RefreshGrant, TokenRefresher};
pub use refresh::RefreshCoordinator;
pub use repository::{CredentialRepository, PgCredentialRepository};
pub use store::CredentialStore;

/// Current wall-clock time in epoch seconds.
pub(crate) fn now_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}
