//! Error types for setsense-store.

use std::path::PathBuf;

/// Result type for setsense-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in setsense-store.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A stored timestamp is out of range.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// A stored workout id is not a UUID.
    #[error("Invalid workout id: {0}")]
    InvalidId(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
