//! # driftlog store
//!
//! Durable storage for driftlog: a crash-safe append-only JSON log, and commit
//! stores built on it (plus SQLite and in-memory variants) behind the
//! [`CommitStore`] trait.
//!
//! ## Key Types
//!
//! - [`AppendOnlyLog`] - Line-delimited JSON log with torn-tail recovery
//! - [`CommitStore`] - The async trait for commit persistence
//! - [`LogCommitStore`] - Commit store backed by an append-only log
//! - [`SqliteCommitStore`] - SQLite-based commit store, selected per node with the `sqlite` commit backend
//! - [`MemoryCommitStore`] - In-memory store for tests
//! - [`EntryLog`] - Durable collection of application log entries
//!
//! ## Usage
//!
//! ```rust,no_run
//! use driftlog_core::Commit;
//! use driftlog_store::{CommitStore, LogCommitStore};
//!
//! async fn example() -> driftlog_store::Result<()> {
//!     let store = LogCommitStore::open("data/commits.jsonl").await?;
//!     store.insert_commit(&Commit::new(&b"hello"[..])).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Idempotent inserts**: inserting the same commit twice returns `AlreadyExists`
//! - **Crash recovery**: a torn final record is truncated on the next write-mode open
//! - **Read-only mode**: never mutates the file, even when it is damaged

pub mod entries;
pub mod error;
pub mod log;
pub mod log_store;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use entries::EntryLog;
pub use error::{Result, StoreError};
pub use log::{AppendOnlyLog, LogPhase, LogRecord, OpenMode};
pub use log_store::LogCommitStore;
pub use memory::MemoryCommitStore;
pub use sqlite::SqliteCommitStore;
pub use traits::{CommitStore, InsertResult};
