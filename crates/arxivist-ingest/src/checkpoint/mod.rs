//! Durable harvest cursor
//!
//! A single string value keyed by a fixed setting name. The harvester reads
//! it once at startup and overwrites it after each fully processed page.
//! Read-modify-write is not atomic across processes: one harvester at a time.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::RwLock;

use crate::error::Result;

pub mod sql;

pub use sql::SqlCheckpointStore;

/// Position in the remote feed, stored verbatim.
///
/// For the OAI feed this is the datestamp (`YYYY-MM-DD`) of the last record
/// in the last fully processed page.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Cursor {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// `None` means no harvest has ever completed a page.
    async fn load(&self) -> Result<Option<Cursor>>;

    /// Fails with [`crate::IngestError::Persistence`]; prior state stays intact.
    async fn save(&self, cursor: &Cursor) -> Result<()>;
}

/// Checkpoint held in memory, optionally seeded
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    cursor: RwLock<Option<Cursor>>,
    history: RwLock<Vec<Cursor>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cursor(cursor: Cursor) -> Self {
        Self {
            cursor: RwLock::new(Some(cursor)),
            history: RwLock::new(Vec::new()),
        }
    }

    /// Every cursor passed to `save`, oldest first
    pub async fn history(&self) -> Vec<Cursor> {
        self.history.read().await.clone()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self) -> Result<Option<Cursor>> {
        Ok(self.cursor.read().await.clone())
    }

    async fn save(&self, cursor: &Cursor) -> Result<()> {
        *self.cursor.write().await = Some(cursor.clone());
        self.history.write().await.push(cursor.clone());
        Ok(())
    }
}
