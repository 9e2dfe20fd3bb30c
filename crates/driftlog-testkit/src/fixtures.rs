//! Test fixtures and helpers.
//!
//! Common setup code for sync tests: fast timing presets, value generators,
//! and a loopback-wired engine/endpoint pair.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use driftlog_core::{Commit, LogEntry};
use driftlog_store::{CommitStore, MemoryCommitStore};
use driftlog_sync::{
    EndpointRouter, LoopbackTransport, RetryConfig, SchedulerConfig, SyncConfig, SyncEndpoint,
    SyncEngine, SyncScheduler,
};
use rand::Rng;
use serde_json::{json, Map};

/// URL the [`SyncPair`] endpoint is registered under.
pub const PEER_URL: &str = "mem://peer";

/// Timing that keeps tests fast. One round fits the sync window, so filters
/// are sized for single-round convergence (`fpr = 1 / N^2`).
pub fn fast_sync_config() -> SyncConfig {
    SyncConfig {
        min_sync_freq: Duration::from_millis(10),
        max_sync_freq: Duration::from_millis(50),
        sync_duration: Duration::from_millis(10),
        polling_backoff: Duration::from_secs(1),
        max_consecutive_failures: 5,
    }
}

/// Flush every few milliseconds and retry quickly.
pub fn fast_scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        tick: Duration::from_millis(5),
        batch_cap: 50,
        retry: RetryConfig::test(),
    }
}

/// `n` distinct commits with bodies `"{prefix} {i}"`.
pub fn commits(prefix: &str, n: usize) -> Vec<Commit> {
    (0..n)
        .map(|i| Commit::new(format!("{} {}", prefix, i).into_bytes()))
        .collect()
}

/// `n` log entries with ids `"{prefix}-{i}"`.
pub fn entries(prefix: &str, n: usize) -> Vec<LogEntry> {
    (0..n)
        .map(|i| {
            let mut fields = Map::new();
            fields.insert("severity".into(), json!(if i % 10 == 0 { "WARN" } else { "INFO" }));
            fields.insert("message".into(), json!(format!("{} event {}", prefix, i)));
            LogEntry::new(format!("{}-{}", prefix, i), fields)
        })
        .collect()
}

/// `n` random ids, unique with overwhelming probability.
pub fn random_ids<R: Rng + ?Sized>(rng: &mut R, n: usize) -> HashSet<String> {
    let mut ids = HashSet::with_capacity(n);
    while ids.len() < n {
        ids.insert(format!("{:016x}", rng.gen::<u64>()));
    }
    ids
}

/// A commit engine syncing with an in-process endpoint over loopback.
pub struct SyncPair {
    pub transport: Arc<LoopbackTransport>,
    pub scheduler: Arc<SyncScheduler>,
    pub local: Arc<MemoryCommitStore>,
    pub remote: Arc<MemoryCommitStore>,
    pub engine: SyncEngine<Commit>,
}

impl SyncPair {
    /// Wire a started scheduler. Must be called inside a tokio runtime.
    pub fn new(local: Vec<Commit>, remote: Vec<Commit>) -> Self {
        let transport = LoopbackTransport::new();
        let local = Arc::new(MemoryCommitStore::with_commits(local));
        let remote = Arc::new(MemoryCommitStore::with_commits(remote));

        let router = EndpointRouter::new();
        router.mount(SyncEndpoint::<Commit>::new(
            "commits",
            "main",
            remote.clone(),
            &fast_sync_config(),
        ));
        transport.register(PEER_URL, router);

        let scheduler = SyncScheduler::new(
            PEER_URL,
            transport.clone(),
            fast_sync_config(),
            fast_scheduler_config(),
        );
        scheduler.start();
        let engine = SyncEngine::<Commit>::new(
            "commits",
            "main",
            local.clone(),
            scheduler.clone(),
            fast_sync_config(),
        );

        Self {
            transport,
            scheduler,
            local,
            remote,
            engine,
        }
    }

    pub async fn local_ids(&self) -> HashSet<String> {
        ids(&self.local).await
    }

    pub async fn remote_ids(&self) -> HashSet<String> {
        ids(&self.remote).await
    }

    /// Both sides hold the same ids.
    pub async fn converged(&self) -> bool {
        self.local_ids().await == self.remote_ids().await
    }
}

async fn ids(store: &MemoryCommitStore) -> HashSet<String> {
    store
        .commit_ids()
        .await
        .map(|ids| ids.into_iter().map(|id| id.to_string()).collect())
        .unwrap_or_default()
}
