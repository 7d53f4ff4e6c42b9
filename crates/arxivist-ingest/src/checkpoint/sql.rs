use async_trait::async_trait;
use sqlx::any::{install_default_drivers, AnyPoolOptions};
use sqlx::{AnyPool, Row};
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::{CheckpointStore, Cursor};
use crate::config::CheckpointConfig;
use crate::error::{IngestError, Result};
use crate::retry::{retry_transient, RetryPolicy};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS harvest_settings (
    setting_name TEXT PRIMARY KEY,
    setting_value TEXT NOT NULL
)";

const SELECT_SETTING: &str =
    "SELECT setting_value FROM harvest_settings WHERE setting_name = $1";

const UPSERT_SETTING: &str = "INSERT INTO harvest_settings (setting_name, setting_value)
VALUES ($1, $2)
ON CONFLICT (setting_name) DO UPDATE SET setting_value = excluded.setting_value";

/// Checkpoint row in SQLite or Postgres, selected by URL scheme
#[derive(Debug, Clone)]
pub struct SqlCheckpointStore {
    pool: AnyPool,
    setting_name: String,
    retry: RetryPolicy,
}

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

impl SqlCheckpointStore {
    /// Connect and create the settings table if needed.
    pub async fn connect(config: &CheckpointConfig, retry: RetryPolicy) -> Result<Self> {
        install_default_drivers();

        let mut options = AnyPoolOptions::new().acquire_timeout(Duration::from_secs(30));
        if is_in_memory(&config.database_url) {
            // every connection to an in-memory SQLite database is a fresh database
            options = options.max_connections(1).idle_timeout(None).max_lifetime(None);
        } else {
            options = options.max_connections(2);
        }

        let pool = options
            .connect(&config.database_url)
            .await
            .map_err(|e| IngestError::Persistence(format!("checkpoint database: {}", e)))?;

        let store = Self::from_pool(pool, &config.setting_name, retry);
        store.ensure_schema().await?;

        info!(setting = %store.setting_name, "Checkpoint store ready");
        Ok(store)
    }

    pub fn from_pool(pool: AnyPool, setting_name: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            pool,
            setting_name: setting_name.into(),
            retry,
        }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        Ok(())
    }

    pub fn setting_name(&self) -> &str {
        &self.setting_name
    }
}

#[async_trait]
impl CheckpointStore for SqlCheckpointStore {
    #[instrument(skip(self), fields(setting = %self.setting_name))]
    async fn load(&self) -> Result<Option<Cursor>> {
        let (pool, name) = (&self.pool, self.setting_name.as_str());

        let row = retry_transient(&self.retry, "checkpoint_load", || async move {
            sqlx::query(SELECT_SETTING)
                .bind(name)
                .fetch_optional(pool)
                .await
                .map_err(IngestError::from)
        })
        .await?;

        let cursor = match row {
            Some(row) => Some(Cursor::new(row.try_get::<String, _>("setting_value")?)),
            None => None,
        };

        debug!(cursor = ?cursor, "Loaded checkpoint");
        Ok(cursor)
    }

    #[instrument(skip(self), fields(setting = %self.setting_name))]
    async fn save(&self, cursor: &Cursor) -> Result<()> {
        let (pool, name) = (&self.pool, self.setting_name.as_str());

        retry_transient(&self.retry, "checkpoint_save", || async move {
            sqlx::query(UPSERT_SETTING)
                .bind(name)
                .bind(cursor.as_str())
                .execute(pool)
                .await
                .map_err(IngestError::from)
        })
        .await
        .map_err(|e| IngestError::Persistence(format!("checkpoint {}: {}", self.setting_name, e)))?;

        debug!(cursor = %cursor, "Saved checkpoint");
        Ok(())
    }
}
