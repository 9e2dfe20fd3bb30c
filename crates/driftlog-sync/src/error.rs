//! Error types for the sync module.

use thiserror::Error;

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The peer could not be reached, or answered with something unusable.
    /// Retried on the next round.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Transport-level error from a single network call.
    #[error("transport error: {0}")]
    Transport(String),

    /// Message could not be decoded.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Peer runs a different protocol version.
    #[error("protocol version mismatch: local={local}, peer={peer}")]
    VersionMismatch { local: u32, peer: u32 },

    /// Local storage failed.
    #[error("store error: {0}")]
    Store(#[from] driftlog_store::StoreError),

    /// A filter or payload could not be restored.
    #[error("core error: {0}")]
    Core(#[from] driftlog_core::CoreError),

    /// The engine or scheduler was closed.
    #[error("closed")]
    Closed,

    /// The round was abandoned before its result arrived.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Transient failures that a later round may get past.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::ServiceUnavailable(_)
            | SyncError::Transport(_)
            | SyncError::InvalidMessage(_)
            | SyncError::Cancelled => true,
            SyncError::Store(e) => !e.is_precondition(),
            SyncError::VersionMismatch { .. } | SyncError::Core(_) | SyncError::Closed => false,
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::InvalidMessage(e.to_string())
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
