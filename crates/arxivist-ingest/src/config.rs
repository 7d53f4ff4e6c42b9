//! Pipeline configuration
//!
//! Every section is loaded from environment variables (after `.env` has been
//! read by the binary) and validated before any network client is built.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::storage::config::StorageConfig;

// ============================================================================
// Defaults
// ============================================================================

/// arXiv OAI-PMH endpoint.
pub const DEFAULT_HARVEST_ENDPOINT: &str = "https://export.arxiv.org/oai2";

/// Metadata format carrying identity, categories and version history.
pub const DEFAULT_METADATA_PREFIX: &str = "arXivRaw";

/// Lower bound used when no checkpoint has ever been written.
pub const DEFAULT_HARVEST_EPOCH: &str = "2008-11-26";

pub const DEFAULT_FETCH_BASE_URL: &str = "https://export.arxiv.org/pdf";

/// arXiv asks automated clients for no more than one request every 3 seconds.
pub const DEFAULT_FETCH_MIN_INTERVAL_MS: u64 = 3000;

/// Text the origin serves instead of a PDF when none exists for a record.
pub const DEFAULT_UNAVAILABLE_MARKER: &str = "PDF unavailable";

pub const DEFAULT_USER_AGENT: &str = "arxivist-harvester/0.1";

pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 120;

pub const DEFAULT_CHECKPOINT_URL: &str = "sqlite://arxivist.db?mode=rwc";

/// Setting row holding the harvest cursor.
pub const DEFAULT_CHECKPOINT_SETTING: &str = "last_record";

pub const DEFAULT_EXTRACT_PREFIX: &str = "extracted/pdf";

pub const DEFAULT_STATUS_PREFIX: &str = "status";

pub const DEFAULT_QUEUE_WAIT_SECS: i32 = 20;

/// Long enough to unpack a multi-gigabyte archive before redelivery.
pub const DEFAULT_VISIBILITY_TIMEOUT_SECS: i32 = 900;

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Complete configuration for all arxivist commands
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    pub harvest: HarvestConfig,
    pub fetch: FetchConfig,
    pub checkpoint: CheckpointConfig,
    pub queue: QueueConfig,
    pub unpack: UnpackConfig,
    pub retry: RetryConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self {
            storage: StorageConfig::from_env(),
            harvest: HarvestConfig::from_env(),
            fetch: FetchConfig::from_env(),
            checkpoint: CheckpointConfig::from_env(),
            queue: QueueConfig::from_env(),
            unpack: UnpackConfig::from_env(),
            retry: RetryConfig::from_env(),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.storage.validate()?;
        self.harvest.validate()?;
        self.fetch.validate()?;
        self.queue.validate()?;
        self.unpack.validate()?;
        self.retry.validate()?;
        if self.storage.attempt_timeout_secs <= self.queue.wait_secs as u64 {
            anyhow::bail!("S3_ATTEMPT_TIMEOUT_SECS must exceed UNTAR_WAIT_SECS so long polls can finish");
        }
        Ok(())
    }
}

/// Remote feed settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    pub endpoint: String,
    pub metadata_prefix: String,
    /// Optional OAI set, e.g. "cs" or "physics:hep-th"
    pub set: Option<String>,
    /// `from` date used when the checkpoint store is empty (YYYY-MM-DD)
    pub epoch: String,
    /// Insert a YYMM partition into storage keys
    pub partition_keys: bool,
    pub timeout_secs: u64,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_HARVEST_ENDPOINT.to_string(),
            metadata_prefix: DEFAULT_METADATA_PREFIX.to_string(),
            set: None,
            epoch: DEFAULT_HARVEST_EPOCH.to_string(),
            partition_keys: false,
            timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }
}

impl HarvestConfig {
    pub fn from_env() -> Self {
        Self {
            endpoint: env_string("HARVEST_ENDPOINT", DEFAULT_HARVEST_ENDPOINT),
            metadata_prefix: env_string("HARVEST_METADATA_PREFIX", DEFAULT_METADATA_PREFIX),
            set: std::env::var("HARVEST_SET").ok().filter(|s| !s.is_empty()),
            epoch: env_string("HARVEST_EPOCH", DEFAULT_HARVEST_EPOCH),
            partition_keys: env_or("HARVEST_PARTITION_KEYS", false),
            timeout_secs: env_or("HARVEST_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.endpoint.is_empty() {
            anyhow::bail!("HARVEST_ENDPOINT cannot be empty");
        }
        if self.metadata_prefix.is_empty() {
            anyhow::bail!("HARVEST_METADATA_PREFIX cannot be empty");
        }
        if NaiveDate::parse_from_str(&self.epoch, "%Y-%m-%d").is_err() {
            anyhow::bail!("HARVEST_EPOCH must be in format YYYY-MM-DD, got: {}", self.epoch);
        }
        if self.timeout_secs == 0 {
            anyhow::bail!("HARVEST_TIMEOUT_SECS must be greater than 0");
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Artifact origin settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    pub base_url: String,
    pub min_interval_ms: u64,
    pub unavailable_marker: String,
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_FETCH_BASE_URL.to_string(),
            min_interval_ms: DEFAULT_FETCH_MIN_INTERVAL_MS,
            unavailable_marker: DEFAULT_UNAVAILABLE_MARKER.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }
}

impl FetchConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: env_string("FETCH_BASE_URL", DEFAULT_FETCH_BASE_URL),
            min_interval_ms: env_or("FETCH_MIN_INTERVAL_MS", DEFAULT_FETCH_MIN_INTERVAL_MS),
            unavailable_marker: env_string("FETCH_UNAVAILABLE_MARKER", DEFAULT_UNAVAILABLE_MARKER),
            user_agent: env_string("FETCH_USER_AGENT", DEFAULT_USER_AGENT),
            timeout_secs: env_or("FETCH_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.base_url.is_empty() {
            anyhow::bail!("FETCH_BASE_URL cannot be empty");
        }
        if self.min_interval_ms == 0 {
            anyhow::bail!("FETCH_MIN_INTERVAL_MS must be greater than 0");
        }
        if self.unavailable_marker.is_empty() {
            anyhow::bail!("FETCH_UNAVAILABLE_MARKER cannot be empty");
        }
        if self.timeout_secs == 0 {
            anyhow::bail!("FETCH_TIMEOUT_SECS must be greater than 0");
        }
        Ok(())
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Cursor persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    pub database_url: String,
    pub setting_name: String,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_CHECKPOINT_URL.to_string(),
            setting_name: DEFAULT_CHECKPOINT_SETTING.to_string(),
        }
    }
}

impl CheckpointConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: env_string("CHECKPOINT_DATABASE_URL", DEFAULT_CHECKPOINT_URL),
            setting_name: env_string("CHECKPOINT_SETTING_NAME", DEFAULT_CHECKPOINT_SETTING),
        }
    }
}

/// Untar work queue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// SQS FIFO queue URL; required by `dispatch` and `unpack`
    pub queue_url: Option<String>,
    pub wait_secs: i32,
    pub visibility_timeout_secs: i32,
    pub batch_size: i32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_url: None,
            wait_secs: DEFAULT_QUEUE_WAIT_SECS,
            visibility_timeout_secs: DEFAULT_VISIBILITY_TIMEOUT_SECS,
            batch_size: 1,
        }
    }
}

impl QueueConfig {
    pub fn from_env() -> Self {
        Self {
            queue_url: std::env::var("UNTAR_QUEUE_URL").ok().filter(|s| !s.is_empty()),
            wait_secs: env_or("UNTAR_WAIT_SECS", DEFAULT_QUEUE_WAIT_SECS),
            visibility_timeout_secs: env_or(
                "UNTAR_VISIBILITY_TIMEOUT_SECS",
                DEFAULT_VISIBILITY_TIMEOUT_SECS,
            ),
            batch_size: env_or("UNTAR_BATCH_SIZE", 1),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(1..=10).contains(&self.batch_size) {
            anyhow::bail!("UNTAR_BATCH_SIZE must be between 1 and 10, got: {}", self.batch_size);
        }
        if !(0..=20).contains(&self.wait_secs) {
            anyhow::bail!("UNTAR_WAIT_SECS must be between 0 and 20, got: {}", self.wait_secs);
        }
        if self.visibility_timeout_secs <= 0 {
            anyhow::bail!("UNTAR_VISIBILITY_TIMEOUT_SECS must be greater than 0");
        }
        Ok(())
    }

    pub fn require_url(&self) -> anyhow::Result<&str> {
        self.queue_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("UNTAR_QUEUE_URL must be set"))
    }
}

/// Archive extraction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnpackConfig {
    pub extract_prefix: String,
    pub status_prefix: String,
    pub workers: usize,
}

impl Default for UnpackConfig {
    fn default() -> Self {
        Self {
            extract_prefix: DEFAULT_EXTRACT_PREFIX.to_string(),
            status_prefix: DEFAULT_STATUS_PREFIX.to_string(),
            workers: 1,
        }
    }
}

impl UnpackConfig {
    pub fn from_env() -> Self {
        Self {
            extract_prefix: env_string("UNPACK_EXTRACT_PREFIX", DEFAULT_EXTRACT_PREFIX),
            status_prefix: env_string("UNPACK_STATUS_PREFIX", DEFAULT_STATUS_PREFIX),
            workers: env_or("UNPACK_WORKERS", 1),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workers == 0 {
            anyhow::bail!("UNPACK_WORKERS must be greater than 0");
        }
        if self.extract_prefix.trim_matches('/').is_empty() {
            anyhow::bail!("UNPACK_EXTRACT_PREFIX cannot be empty");
        }
        if self.status_prefix.trim_matches('/').is_empty() {
            anyhow::bail!("UNPACK_STATUS_PREFIX cannot be empty");
        }
        Ok(())
    }
}

/// Backoff settings shared by every network client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
        }
    }
}

impl RetryConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_attempts: env_or("RETRY_MAX_ATTEMPTS", defaults.max_attempts),
            base_delay_ms: env_or("RETRY_BASE_DELAY_MS", defaults.base_delay_ms),
            max_delay_ms: env_or("RETRY_MAX_DELAY_MS", defaults.max_delay_ms),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_attempts == 0 {
            anyhow::bail!("RETRY_MAX_ATTEMPTS must be greater than 0");
        }
        if self.max_delay_ms < self.base_delay_ms {
            anyhow::bail!("RETRY_MAX_DELAY_MS must not be smaller than RETRY_BASE_DELAY_MS");
        }
        Ok(())
    }

    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_attempt_timeout_must_cover_long_poll() {
        let mut config = Config::default();
        config.storage.attempt_timeout_secs = 20;
        config.storage.operation_timeout_secs = 20;
        config.queue.wait_secs = 20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.harvest.epoch, "2008-11-26");
        assert_eq!(config.fetch.min_interval(), Duration::from_secs(3));
        assert_eq!(config.unpack.extract_prefix, "extracted/pdf");
    }

    #[test]
    fn test_invalid_epoch_rejected() {
        let config = HarvestConfig {
            epoch: "2008/11/26".to_string(),
            ..HarvestConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = FetchConfig {
            min_interval_ms: 0,
            ..FetchConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_queue_batch_bounds() {
        let mut config = QueueConfig::default();
        assert!(config.validate().is_ok());
        config.batch_size = 11;
        assert!(config.validate().is_err());
        assert!(config.require_url().is_err());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = UnpackConfig {
            workers: 0,
            ..UnpackConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        std::env::set_var("FETCH_MIN_INTERVAL_MS", "1500");
        std::env::set_var("HARVEST_SET", "cs");
        std::env::set_var("UNPACK_WORKERS", "4");

        let config = Config::from_env().unwrap();
        assert_eq!(config.fetch.min_interval(), Duration::from_millis(1500));
        assert_eq!(config.harvest.set.as_deref(), Some("cs"));
        assert_eq!(config.unpack.workers, 4);

        std::env::remove_var("FETCH_MIN_INTERVAL_MS");
        std::env::remove_var("HARVEST_SET");
        std::env::remove_var("UNPACK_WORKERS");
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = RetryConfig {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 1000,
        };
        let policy = config.policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
    }
}
