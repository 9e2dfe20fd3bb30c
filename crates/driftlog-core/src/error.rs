//! Error types for driftlog core.

use thiserror::Error;

/// Errors raised by the core primitives.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An encoded Bloom filter could not be restored.
    ///
    /// This indicates a protocol mismatch with the peer and is never retried.
    #[error("invalid bloom filter: {0}")]
    InvalidFilter(String),

    /// A single sync payload entry could not be decoded.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
