//! Error types shared across arxivist crates

use thiserror::Error;

/// Result type alias for shared operations
pub type Result<T> = std::result::Result<T, ArxivistError>;

/// Errors that are not specific to one pipeline stage
#[derive(Error, Debug)]
pub enum ArxivistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
