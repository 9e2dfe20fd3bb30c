//! # driftlog sync
//!
//! Bloom filter set reconciliation between two collections.
//!
//! ## Overview
//!
//! Each round, one side sends a filter of every id it holds plus the values
//! the peer's previous filter proves missing. The peer persists them and
//! answers the same way. Filters use fresh random seeds every round, so a
//! value hidden by a false positive is soon exposed. No indexes, vector
//! clocks or ordering are exchanged.
//!
//! ## Key Types
//!
//! - [`SyncMessage`] - One protocol message: filter, size, values
//! - [`SyncEngine`] - Client driver for one collection
//! - [`SyncEndpoint`] / [`EndpointRouter`] - Answering side
//! - [`SyncScheduler`] - Batches many engines' rounds into one call per peer
//! - [`Transport`] - Injected network call
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use driftlog_core::Commit;
//! use driftlog_store::MemoryCommitStore;
//! use driftlog_sync::{
//!     EndpointRouter, LoopbackTransport, SchedulerConfig, SchedulerRegistry, SyncConfig,
//!     SyncEndpoint, SyncEngine,
//! };
//!
//! async fn example() -> driftlog_sync::Result<()> {
//!     let remote = Arc::new(MemoryCommitStore::new());
//!     let router = EndpointRouter::new();
//!     router.mount(SyncEndpoint::<Commit>::new("commits", "main", remote, &SyncConfig::server()));
//!
//!     let transport = LoopbackTransport::new();
//!     transport.register("mem://remote", router);
//!
//!     let registry = SchedulerRegistry::new(transport, SyncConfig::client(), SchedulerConfig::default());
//!     let local = Arc::new(MemoryCommitStore::new());
//!     let engine = SyncEngine::<Commit>::new(
//!         "commits",
//!         "main",
//!         local,
//!         registry.get_or_create("mem://remote"),
//!         SyncConfig::client(),
//!     );
//!     engine.sync().await
//! }
//! ```
//!
//! ## Message Flow
//!
//! ```text
//! Engine                     Scheduler                    Endpoint
//!   |-- {f, s, c} ------------>|                             |
//!   |                          |-- [{storage, id, msg}] ---->|  persist c
//!   |                          |<- [{storage, id, res}] -----|  build vs f
//!   |<-------------- {f, s, c}-|                             |
//!   persist c, keep f for the next round
//! ```

pub mod config;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod messages;
pub mod retry;
pub mod scheduler;
pub mod source;
pub mod stats;
pub mod timer;
pub mod transport;

pub use config::{SchedulerConfig, SyncConfig};
pub use endpoint::{handle_batch, EndpointRouter, NewValuesCallback, Responder, SyncEndpoint};
pub use engine::{StatusCallback, SyncEngine, SyncStatus};
pub use error::{Result, SyncError};
pub use messages::{
    expected_cycles, needs_replication, target_fpr, BuildParams, SyncMessage, SyncRequest,
    SyncResponse, WireMessage, PROTOCOL_VERSION,
};
pub use retry::{retry, retry_if, RetryConfig};
pub use scheduler::{SchedulerRegistry, SyncScheduler};
pub use source::SyncSource;
pub use stats::MovingAverage;
pub use timer::{ease_in_expo, DynamicInterval};
pub use transport::{loopback::LoopbackTransport, BatchHandler, Transport};
