use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Default bucket holding metadata, PDFs, bulk archives and status markers.
pub const DEFAULT_BUCKET: &str = "arxivist";

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// One attempt must fit a multi-gigabyte archive download.
pub const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 1800;

/// Whole operation, retries included.
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 3600;

#[derive(Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    /// Static credentials; when absent the default AWS provider chain is used.
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub path_style: bool,
    pub connect_timeout_secs: u64,
    pub attempt_timeout_secs: u64,
    pub operation_timeout_secs: u64,
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("access_key", &self.access_key.as_ref().map(|_| "<redacted>"))
            .field("path_style", &self.path_style)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("attempt_timeout_secs", &self.attempt_timeout_secs)
            .field("operation_timeout_secs", &self.operation_timeout_secs)
            .finish()
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: DEFAULT_REGION.to_string(),
            bucket: DEFAULT_BUCKET.to_string(),
            access_key: None,
            secret_key: None,
            path_style: false,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            attempt_timeout_secs: DEFAULT_ATTEMPT_TIMEOUT_SECS,
            operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
        }
    }
}

impl StorageConfig {
    pub fn from_env() -> Self {
        Self {
            endpoint: env::var("S3_ENDPOINT").ok(),
            region: env::var("S3_REGION")
                .or_else(|_| env::var("AWS_REGION"))
                .unwrap_or_else(|_| DEFAULT_REGION.to_string()),
            bucket: env::var("S3_BUCKET").unwrap_or_else(|_| DEFAULT_BUCKET.to_string()),
            access_key: env::var("S3_ACCESS_KEY").ok(),
            secret_key: env::var("S3_SECRET_KEY").ok(),
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            connect_timeout_secs: env_secs("S3_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS),
            attempt_timeout_secs: env_secs("S3_ATTEMPT_TIMEOUT_SECS", DEFAULT_ATTEMPT_TIMEOUT_SECS),
            operation_timeout_secs: env_secs(
                "S3_OPERATION_TIMEOUT_SECS",
                DEFAULT_OPERATION_TIMEOUT_SECS,
            ),
        }
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
            ..Self::default()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bucket.is_empty() {
            anyhow::bail!("S3_BUCKET cannot be empty");
        }
        if self.access_key.is_some() != self.secret_key.is_some() {
            anyhow::bail!("S3_ACCESS_KEY and S3_SECRET_KEY must be set together");
        }
        if self.connect_timeout_secs == 0 || self.attempt_timeout_secs == 0 {
            anyhow::bail!("S3 timeouts must be greater than 0");
        }
        if self.operation_timeout_secs < self.attempt_timeout_secs {
            anyhow::bail!("S3_OPERATION_TIMEOUT_SECS must not be smaller than S3_ATTEMPT_TIMEOUT_SECS");
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Bound on a single request, including the body transfer
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

fn env_secs(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
