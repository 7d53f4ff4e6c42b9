//! Error taxonomy for the ingestion pipelines
//!
//! Failures are classified by what the caller should do about them:
//!
//! - [`IngestError::Transient`]: retry with bounded backoff, then fail the run
//! - [`IngestError::Malformed`]: log and skip, never retry
//! - [`IngestError::FetchFailed`]: the artifact step of one record failed
//! - [`IngestError::Persistence`]: a checkpoint or completion marker could not
//!   be written; fatal to the unit of work it guards
//!
//! An artifact that the origin reports as unavailable is not an error at all;
//! see [`crate::fetch::FetchOutcome::Absent`].

use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Transient I/O failure during {operation}: {message}")]
    Transient { operation: String, message: String },

    #[error("Malformed input: {0}")]
    Malformed(String),

    #[error("Artifact fetch failed for {identity} ({url}): {reason}")]
    FetchFailed {
        identity: String,
        url: String,
        reason: String,
    },

    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Permanent failure during {operation}: {message}")]
    Permanent { operation: String, message: String },

    #[error("Interrupted: {0}")]
    Interrupted(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl IngestError {
    pub fn transient(operation: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Transient {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    pub fn permanent(operation: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Permanent {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    pub fn malformed(message: impl std::fmt::Display) -> Self {
        Self::Malformed(message.to_string())
    }

    /// Whether retrying the same operation could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            IngestError::Transient { .. } => true,
            IngestError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::Interrupted
            ),
            IngestError::Database(e) => {
                matches!(e, sqlx::Error::PoolTimedOut | sqlx::Error::Io(_))
            },
            _ => false,
        }
    }
}

impl From<arxivist_common::ArxivistError> for IngestError {
    fn from(err: arxivist_common::ArxivistError) -> Self {
        match err {
            arxivist_common::ArxivistError::Io(e) => IngestError::Io(e),
            arxivist_common::ArxivistError::Serialization(e) => IngestError::Json(e),
            arxivist_common::ArxivistError::Config(msg) => IngestError::Config(msg),
            arxivist_common::ArxivistError::Parse(msg) => IngestError::Malformed(msg),
        }
    }
}
