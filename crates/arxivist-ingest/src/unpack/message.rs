//! Untar work queue messages

use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};

/// SQS limit for group and deduplication ids.
const MAX_QUEUE_ID_LEN: usize = 128;

/// `{"key": "...", "bucket": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnpackMessage {
    pub key: String,
    pub bucket: String,
}

impl UnpackMessage {
    pub fn new(key: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            bucket: bucket.into(),
        }
    }

    /// Bodies that are not JSON, or have an empty key, are `Malformed`.
    pub fn parse(body: &str) -> Result<Self> {
        let message: Self = serde_json::from_str(body)
            .map_err(|e| IngestError::malformed(format!("queue message: {}", e)))?;
        if message.key.is_empty() {
            return Err(IngestError::malformed("queue message with empty key"));
        }
        Ok(message)
    }

    pub fn to_body(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// One archive, one group: at most one delivery in flight per archive.
    pub fn group_id(&self) -> String {
        queue_id(&self.key)
    }

    pub fn dedup_id(&self) -> String {
        queue_id(&self.key)
    }
}

/// The archive key itself, or its SHA-256 when the key is too long for SQS.
fn queue_id(key: &str) -> String {
    if key.len() <= MAX_QUEUE_ID_LEN {
        key.to_string()
    } else {
        arxivist_common::checksum::sha256_hex(key.as_bytes())
    }
}

/// `status/{archive_key}.processed`
pub fn marker_key(status_prefix: &str, archive_key: &str) -> String {
    format!("{}/{}.processed", status_prefix.trim_end_matches('/'), archive_key)
}
