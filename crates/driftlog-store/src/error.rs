//! Error types for the store module.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record encoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Append attempted on a log opened for reading.
    #[error("log {0} is read-only")]
    ReadOnly(PathBuf),

    /// Append attempted before the initial scan completed.
    #[error("log {0} has not completed its initial scan")]
    NotScanned(PathBuf),

    /// Operation on a log that is not open.
    #[error("log {0} is closed")]
    Closed(PathBuf),

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    #[error(transparent)]
    Core(#[from] driftlog_core::CoreError),
}

impl StoreError {
    /// Precondition violations are programmer errors and never succeed on
    /// retry.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            StoreError::ReadOnly(_) | StoreError::NotScanned(_) | StoreError::Closed(_)
        )
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
