//! # driftlog core
//!
//! Pure primitives for driftlog: bit fields, Bloom filters, and the values
//! the sync protocol moves between peers.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`BloomFilter`] - Probabilistic set of ids, rebuilt every sync round
//! - [`BitField`] / [`BufferPool`] - Bit storage and recyclable buffers
//! - [`Commit`] - An opaque, uniquely identified record
//! - [`SyncValue`] - Codec trait for anything the protocol can reconcile

pub mod bitfield;
pub mod bloom;
pub mod commit;
pub mod error;
pub mod hash;

pub use bitfield::{BitField, BufferPool};
pub use bloom::{clamp_fpr, BloomFilter, BloomOptions, EncodedBloomFilter, MAX_FPR};
pub use commit::{now_millis, Commit, CommitId, LogEntry, SyncValue, ValueKind};
pub use error::{CoreError, Result};
pub use hash::murmur3_32;
