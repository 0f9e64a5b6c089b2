use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::env;

/// S3 rejects multipart parts smaller than this, except the last one.
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

pub const DEFAULT_PART_SIZE: usize = 8 * 1024 * 1024;

pub const DEFAULT_REGION: &str = "us-east-1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    /// Static credentials. When absent the default AWS provider chain is used.
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub path_style: bool,
    pub part_size: usize,
}

impl StorageConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bucket = env::var("S3_BUCKET")
            .ok()
            .filter(|b| !b.is_empty())
            .ok_or(ConfigError::Missing("S3_BUCKET"))?;

        let part_size = match env::var("S3_PART_SIZE") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                name: "S3_PART_SIZE",
                value: raw.clone(),
            })?,
            Err(_) => DEFAULT_PART_SIZE,
        };

        let config = Self {
            endpoint: env::var("S3_ENDPOINT").ok().filter(|e| !e.is_empty()),
            region: env::var("S3_REGION").unwrap_or_else(|_| DEFAULT_REGION.to_string()),
            bucket,
            access_key: env::var("S3_ACCESS_KEY")
                .or_else(|_| env::var("AWS_ACCESS_KEY_ID"))
                .ok(),
            secret_key: env::var("S3_SECRET_KEY")
                .or_else(|_| env::var("AWS_SECRET_ACCESS_KEY"))
                .ok(),
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            part_size,
        };

        config.validate()?;
        Ok(config)
    }

    /// Local MinIO with its stock credentials
    pub fn for_minio(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            region: DEFAULT_REGION.to_string(),
            bucket: bucket.into(),
            access_key: Some("minioadmin".to_string()),
            secret_key: Some("minioadmin".to_string()),
            path_style: true,
            part_size: DEFAULT_PART_SIZE,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.part_size < MIN_PART_SIZE {
            return Err(ConfigError::Validation(format!(
                "S3 part size {} is below the {} byte minimum",
                self.part_size, MIN_PART_SIZE
            )));
        }
        if self.access_key.is_some() != self.secret_key.is_some() {
            return Err(ConfigError::Validation(
                "S3 access key and secret key must be set together".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for name in [
            "S3_BUCKET",
            "S3_ENDPOINT",
            "S3_REGION",
            "S3_ACCESS_KEY",
            "S3_SECRET_KEY",
            "AWS_ACCESS_KEY_ID",
            "AWS_SECRET_ACCESS_KEY",
            "S3_PATH_STYLE",
            "S3_PART_SIZE",
        ] {
            env::remove_var(name);
        }
    }

    #[test]
    fn test_for_minio() {
        let config = StorageConfig::for_minio("http://localhost:9000", "archive");
        assert_eq!(config.endpoint.as_deref(), Some("http://localhost:9000"));
        assert!(config.path_style);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_bucket_is_required() {
        clear_env();
        let err = StorageConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("S3_BUCKET")));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        clear_env();
        env::set_var("S3_BUCKET", "attachments");
        env::set_var("S3_REGION", "eu-west-1");
        env::set_var("AWS_ACCESS_KEY_ID", "key");
        env::set_var("AWS_SECRET_ACCESS_KEY", "secret");

        let config = StorageConfig::from_env().unwrap();
        assert_eq!(config.bucket, "attachments");
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.access_key.as_deref(), Some("key"));
        assert_eq!(config.part_size, DEFAULT_PART_SIZE);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_small_part_size_rejected() {
        clear_env();
        env::set_var("S3_BUCKET", "attachments");
        env::set_var("S3_PART_SIZE", "1024");

        assert!(matches!(
            StorageConfig::from_env().unwrap_err(),
            ConfigError::Validation(_)
        ));
        clear_env();
    }
}
