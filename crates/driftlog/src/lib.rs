//! # driftlog
//!
//! Eventually consistent append-only logs, reconciled with Bloom filters.
//!
//! ## Overview
//!
//! Every writer keeps its own local log of opaque, id-keyed records. Peers
//! converge by trading Bloom filters of what they hold and pushing whatever
//! the other side's filter proves missing. There is no coordinator, no global
//! order and no locking across peers.
//!
//! - **Commits**: immutable records with an opaque body
//! - **Log entries**: free-form JSON records synced as raw objects
//! - **Repositories**: one commit log and one entry log, on disk
//! - **Peer links**: per-repository sync engines towards one peer URL
//!
//! ## Usage
//!
//! ```rust,no_run
//! use driftlog::{LoopbackTransport, Node, NodeConfig};
//!
//! async fn example() -> driftlog::Result<()> {
//!     let transport = LoopbackTransport::new();
//!
//!     let server = Node::new(NodeConfig::new("data/server"), transport.clone());
//!     server.repository("main").await?;
//!     transport.register("mem://server", server.router());
//!
//!     let client = Node::new(NodeConfig::new("data/client"), transport);
//!     let repo = client.repository("main").await?;
//!     repo.commit(b"hello".to_vec()).await?;
//!
//!     let link = client.connect("main", "mem://server").await?;
//!     link.sync().await?;
//!     link.start_syncing();
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `driftlog::core` - Bit fields, Bloom filters, commits
//! - `driftlog::store` - Append-only log and commit stores
//! - `driftlog::sync` - Sync protocol, engines, scheduling

pub mod config;
pub mod error;
pub mod node;

// Re-export component crates
pub use driftlog_core as core;
pub use driftlog_store as store;
pub use driftlog_sync as sync;

// Re-export main types for convenience
pub use config::{CommitBackend, NodeConfig};
pub use error::{NodeError, Result};
pub use node::{validate_repository_id, Node, PeerLink, Repository, COMMITS, ENTRIES};

// Re-export commonly used types
pub use driftlog_core::{BloomFilter, Commit, CommitId, LogEntry};
pub use driftlog_sync::{LoopbackTransport, SyncConfig, SyncStatus, Transport};
