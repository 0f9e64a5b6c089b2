//! Per-tenant bearer credential

use crate::error::{ArchivistError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// When a credential stops being usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expiry {
    /// The provider granted a token without a lifetime.
    Never,
    /// Absolute expiry in epoch seconds.
    At(i64),
}

impl Expiry {
    /// Decode the persisted form. A missing or zero value is the unbounded
    /// sentinel.
    pub fn from_epoch(value: Option<i64>) -> Result<Self> {
        match value {
            None | Some(0) => Ok(Expiry::Never),
            Some(secs) if secs < 0 => Err(ArchivistError::InvalidExpiry(secs)),
            Some(secs) => Ok(Expiry::At(secs)),
        }
    }

    /// Encode for persistence; `None` means unbounded.
    pub fn epoch_secs(&self) -> Option<i64> {
        match self {
            Expiry::Never => None,
            Expiry::At(secs) => Some(*secs),
        }
    }

    /// Expiry for a grant issued at `now` with an optional lifetime.
    pub fn after(now: i64, lifetime_secs: Option<i64>) -> Self {
        match lifetime_secs {
            Some(lifetime) => Expiry::At(now.saturating_add(lifetime)),
            None => Expiry::Never,
        }
    }

    /// `now >= expires_at - buffer`. An unbounded expiry is never reached.
    pub fn is_reached(&self, now: i64, buffer_secs: i64) -> bool {
        match self {
            Expiry::Never => false,
            Expiry::At(expires_at) => now >= expires_at.saturating_sub(buffer_secs),
        }
    }

    /// Time left before expiry, `None` when unbounded.
    pub fn remaining(&self, now: i64) -> Option<Duration> {
        match self {
            Expiry::Never => None,
            Expiry::At(expires_at) => {
                let secs = expires_at.saturating_sub(now).max(0);
                Some(Duration::from_secs(secs as u64))
            },
        }
    }
}

/// Stored bearer credential for one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub tenant_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Expiry,
    pub scope: String,
    pub bot_user_id: String,
    /// Sort key assigned by the backing table.
    pub sort_key: String,
}

impl CredentialRecord {
    pub fn is_refreshable(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    pub fn is_expiring(&self, now: i64, buffer_secs: i64) -> bool {
        self.expires_at.is_reached(now, buffer_secs)
    }

    /// Apply a successful refresh grant. The old refresh token is kept unless
    /// the provider rotated it.
    pub fn refreshed(
        &self,
        access_token: String,
        refresh_token: Option<String>,
        expires_at: Expiry,
    ) -> Self {
        Self {
            access_token,
            refresh_token: refresh_token.or_else(|| self.refresh_token.clone()),
            expires_at,
            ..self.clone()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn record(expires_at: Expiry, refresh: Option<&str>) -> CredentialRecord {
        CredentialRecord {
            tenant_id: "T1".to_string(),
            access_token: "xoxe-old".to_string(),
            refresh_token: refresh.map(str::to_string),
            expires_at,
            scope: "files:read".to_string(),
            bot_user_id: "U0BOT".to_string(),
            sort_key: "workspace-token".to_string(),
        }
    }

    #[test]
    fn test_expiry_buffer() {
        let expiry = Expiry::At(1_000);
        assert!(!expiry.is_reached(600, 300));
        assert!(expiry.is_reached(700, 300));
        assert!(expiry.is_reached(1_000, 0));
        assert!(!expiry.is_reached(999, 0));
    }

    #[test]
    fn test_unbounded_expiry_never_reached() {
        assert!(!Expiry::Never.is_reached(i64::MAX, 300));
        assert_eq!(Expiry::Never.remaining(0), None);
    }

    #[test]
    fn test_from_epoch() {
        assert_eq!(Expiry::from_epoch(None).unwrap(), Expiry::Never);
        assert_eq!(Expiry::from_epoch(Some(0)).unwrap(), Expiry::Never);
        assert_eq!(Expiry::from_epoch(Some(42)).unwrap(), Expiry::At(42));
        assert!(Expiry::from_epoch(Some(-5)).is_err());
    }

    #[test]
    fn test_remaining_clamps_to_zero() {
        assert_eq!(Expiry::At(100).remaining(150), Some(Duration::ZERO));
        assert_eq!(Expiry::At(100).remaining(40), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_refreshed_keeps_refresh_token_unless_rotated() {
        let old = record(Expiry::At(10), Some("xoxe-r1"));

        let kept = old.refreshed("xoxe-new".to_string(), None, Expiry::At(50));
        assert_eq!(kept.access_token, "xoxe-new");
        assert_eq!(kept.refresh_token.as_deref(), Some("xoxe-r1"));
        assert_eq!(kept.expires_at, Expiry::At(50));
        assert_eq!(kept.sort_key, old.sort_key);

        let rotated = old.refreshed("xoxe-new".to_string(), Some("xoxe-r2".to_string()), Expiry::Never);
        assert_eq!(rotated.refresh_token.as_deref(), Some("xoxe-r2"));
    }

    #[test]
    fn test_empty_refresh_token_is_not_refreshable() {
        assert!(!record(Expiry::Never, Some("")).is_refreshable());
        assert!(!record(Expiry::Never, None).is_refreshable());
        assert!(record(Expiry::Never, Some("r")).is_refreshable());
    }
}
