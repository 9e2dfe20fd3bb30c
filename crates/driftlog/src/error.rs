//! Error types for a driftlog node.

use driftlog_core::CoreError;
use driftlog_store::StoreError;
use driftlog_sync::SyncError;
use thiserror::Error;

/// Errors that can occur during node operations.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Core error (malformed filter or payload).
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Config could not be parsed.
    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),

    /// Filesystem error outside the stores.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Repository ids become directory names and must be plain.
    #[error("invalid repository id: {0:?}")]
    InvalidRepository(String),

    /// Node was closed.
    #[error("node closed")]
    Closed,
}

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
