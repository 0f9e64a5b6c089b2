//! Configuration management

use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use crate::storage::StorageConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Provider OAuth token endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://slack.com/api/oauth.v2.access";

/// First segment of every archived object key.
pub const DEFAULT_ARCHIVE_NAMESPACE: &str = "attachments";

/// Cache namespace and table sort key of stored credentials.
pub const DEFAULT_CREDENTIAL_NAMESPACE: &str = "workspace-token";

/// Refresh this long before the stored expiry.
pub const DEFAULT_TOKEN_REFRESH_BUFFER_SECS: i64 = 300;

/// Cache lifetime of credentials that never expire.
pub const DEFAULT_CREDENTIAL_CACHE_TTL_SECS: u64 = 300;

pub const DEFAULT_REFRESH_LOCK_TTL_SECS: u64 = 60;

pub const DEFAULT_REFRESH_LOCK_WAIT_MS: u64 = 100;

/// Hard cap on one transfer attempt (5 minutes).
pub const DEFAULT_TRANSFER_TIMEOUT_SECS: u64 = 300;

pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;

pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1000;

pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Ingestion worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub oauth: OAuthConfig,
    pub credentials: CredentialConfig,
    pub transfer: TransferConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
}

/// App credentials used for token refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    pub namespace: String,
    pub refresh_buffer_secs: i64,
    pub cache_ttl_secs: u64,
    pub lock_ttl_secs: u64,
    pub lock_wait_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    pub namespace: String,
    pub timeout_secs: u64,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(name))
}

fn string_or(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parsed_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
        _ => Ok(default),
    }
}

impl IngestConfig {
    /// Load `.env` if present, then read the environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let config = IngestConfig {
            oauth: OAuthConfig {
                token_url: string_or("TOKEN_URL", DEFAULT_TOKEN_URL),
                client_id: required("CLIENT_ID")?,
                client_secret: required("CLIENT_SECRET")?,
            },
            credentials: CredentialConfig {
                namespace: string_or("CREDENTIAL_NAMESPACE", DEFAULT_CREDENTIAL_NAMESPACE),
                refresh_buffer_secs: parsed_or(
                    "TOKEN_REFRESH_BUFFER_SECS",
                    DEFAULT_TOKEN_REFRESH_BUFFER_SECS,
                )?,
                cache_ttl_secs: parsed_or(
                    "CREDENTIAL_CACHE_TTL_SECS",
                    DEFAULT_CREDENTIAL_CACHE_TTL_SECS,
                )?,
                lock_ttl_secs: parsed_or("REFRESH_LOCK_TTL_SECS", DEFAULT_REFRESH_LOCK_TTL_SECS)?,
                lock_wait_ms: parsed_or("REFRESH_LOCK_WAIT_MS", DEFAULT_REFRESH_LOCK_WAIT_MS)?,
            },
            transfer: TransferConfig {
                namespace: string_or("ARCHIVE_NAMESPACE", DEFAULT_ARCHIVE_NAMESPACE),
                timeout_secs: parsed_or("TRANSFER_TIMEOUT_SECS", DEFAULT_TRANSFER_TIMEOUT_SECS)?,
                retry_max_attempts: parsed_or("RETRY_MAX_ATTEMPTS", DEFAULT_RETRY_MAX_ATTEMPTS)?,
                retry_base_delay_ms: parsed_or("RETRY_BASE_DELAY_MS", DEFAULT_RETRY_BASE_DELAY_MS)?,
            },
            database: DatabaseConfig {
                url: required("DATABASE_URL")?,
                max_connections: parsed_or(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                )?,
            },
            storage: StorageConfig::from_env()?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transfer.retry_max_attempts == 0 {
            return Err(ConfigError::Validation(
                "RETRY_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        if self.transfer.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "TRANSFER_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }

        if self.credentials.cache_ttl_secs == 0 || self.credentials.lock_ttl_secs == 0 {
            return Err(ConfigError::Validation(
                "Credential cache and lock TTLs must be greater than 0".to_string(),
            ));
        }

        if self.credentials.refresh_buffer_secs < 0 {
            return Err(ConfigError::Validation(format!(
                "TOKEN_REFRESH_BUFFER_SECS cannot be negative, got {}",
                self.credentials.refresh_buffer_secs
            )));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::Validation(
                "DATABASE_MAX_CONNECTIONS must be greater than 0".to_string(),
            ));
        }

        self.storage.validate()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.transfer.retry_max_attempts,
            Duration::from_millis(self.transfer.retry_base_delay_ms),
        )
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer.timeout_secs)
    }

    pub fn credential_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.credentials.cache_ttl_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.credentials.lock_ttl_secs)
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.credentials.lock_wait_ms)
    }
}
