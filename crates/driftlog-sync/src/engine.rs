//! Per-collection sync driver.
//!
//! A [`SyncEngine`] owns the client side of the protocol for one
//! `(storage, id)` collection: it remembers the peer's last filter and size,
//! runs rounds through a shared [`SyncScheduler`], persists what the peer
//! sends back, and tracks whether the peer is reachable.
//!
//! ## Usage
//!
//! - [`sync`](SyncEngine::sync) runs rounds until the collections agree.
//! - [`start_syncing`](SyncEngine::start_syncing) polls in the background on a
//!   [`DynamicInterval`]; [`touch`](SyncEngine::touch) after a local write
//!   brings the next round forward.
//!
//! ## Design Notes
//!
//! - Rounds of one engine never overlap.
//! - Every stop or close bumps a generation counter. A round that started
//!   under an older generation discards its result.
//! - The status callback fires only when the online flag changes.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

use driftlog_core::{BloomFilter, BufferPool, SyncValue};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::messages::{self, BuildParams, SyncMessage, PROTOCOL_VERSION};
use crate::scheduler::SyncScheduler;
use crate::source::SyncSource;
use crate::timer::DynamicInterval;

/// Coarse state of an engine, for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// Last round failed.
    Offline,
    /// Online, and the peer is still missing local values.
    Sync,
    /// Online and caught up.
    Idle,
}

/// Called with the new online flag whenever it changes.
pub type StatusCallback = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Default)]
struct PeerState {
    filter: Option<BloomFilter>,
    size: usize,
    version: Option<u32>,
}

struct Polling {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct EngineInner<T: SyncValue> {
    storage: String,
    id: String,
    source: Arc<dyn SyncSource<T>>,
    scheduler: Arc<SyncScheduler>,
    config: SyncConfig,
    peer: Mutex<PeerState>,
    online: AtomicBool,
    ready: AtomicBool,
    closed: AtomicBool,
    sync_active: AtomicBool,
    generation: AtomicU64,
    round: tokio::sync::Mutex<()>,
    interval: Mutex<DynamicInterval>,
    wake: Arc<Notify>,
    polling: Mutex<Option<Polling>>,
    on_status: Mutex<Option<StatusCallback>>,
    pool: Mutex<BufferPool>,
}

impl<T: SyncValue> Drop for EngineInner<T> {
    fn drop(&mut self) {
        if let Ok(mut polling) = self.polling.lock() {
            if let Some(p) = polling.take() {
                p.task.abort();
            }
        }
    }
}

/// Clears a flag when dropped.
struct FlagGuard<'a>(&'a AtomicBool);

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Client side of the sync protocol for one collection.
pub struct SyncEngine<T: SyncValue> {
    inner: Arc<EngineInner<T>>,
}

impl<T: SyncValue> Clone for SyncEngine<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: SyncValue> SyncEngine<T> {
    pub fn new(
        storage: impl Into<String>,
        id: impl Into<String>,
        source: Arc<dyn SyncSource<T>>,
        scheduler: Arc<SyncScheduler>,
        config: SyncConfig,
    ) -> Self {
        let interval = DynamicInterval::new(
            config.min_sync_freq,
            config.max_sync_freq,
            config.polling_backoff,
            Instant::now(),
        );
        Self {
            inner: Arc::new(EngineInner {
                storage: storage.into(),
                id: id.into(),
                source,
                scheduler,
                config,
                peer: Mutex::new(PeerState::default()),
                online: AtomicBool::new(true),
                ready: AtomicBool::new(true),
                closed: AtomicBool::new(false),
                sync_active: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                round: tokio::sync::Mutex::new(()),
                interval: Mutex::new(interval),
                wake: Arc::new(Notify::new()),
                polling: Mutex::new(None),
                on_status: Mutex::new(None),
                pool: Mutex::new(BufferPool::new()),
            }),
        }
    }

    pub fn storage(&self) -> &str {
        &self.inner.storage
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn set_status_callback(&self, callback: impl Fn(bool) + Send + Sync + 'static) {
        if let Ok(mut slot) = self.inner.on_status.lock() {
            *slot = Some(Arc::new(callback));
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Rounds
    // ─────────────────────────────────────────────────────────────────────────

    /// Run one round against the peer.
    ///
    /// Returns `Ok(true)` when the round completed and `Ok(false)` when the
    /// engine was stopped or closed while it ran, in which case the peer's
    /// answer is dropped unread.
    pub async fn send_sync_message(&self) -> Result<bool> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return Err(SyncError::Closed);
        }
        let generation = inner.generation.load(Ordering::Acquire);
        let _round = inner.round.lock().await;
        if self.is_stale(generation) {
            return Ok(false);
        }

        let values = inner.source.values().await?;
        let local_ids: Vec<String> = values.iter().map(|v| v.sync_id().to_owned()).collect();
        let cycles = if inner.sync_active.load(Ordering::Acquire) {
            1
        } else {
            inner.scheduler.sync_cycles()
        };
        let (wire, priority) = {
            let peer = lock(&inner.peer)?;
            let priority =
                messages::needs_replication(peer.filter.as_ref(), local_ids.iter().map(String::as_str));
            let params = BuildParams {
                peer_filter: peer.filter.as_ref(),
                local_size: values.len(),
                peer_size: peer.size,
                expected_cycles: cycles,
                include_missing: true,
                low_accuracy: false,
            };
            let mut pool = lock(&inner.pool)?;
            let msg = SyncMessage::build_in(params, values, &mut pool);
            debug!(
                storage = %inner.storage,
                id = %inner.id,
                local = msg.size(),
                peer = peer.size,
                cycles,
                priority,
                sending = msg.values().len(),
                "sync round"
            );
            let wire = msg.to_wire();
            let (filter, _, _) = msg.into_parts();
            filter.reuse(&mut pool);
            (wire, priority)
        };

        // Rounds the peer still needs jump the scheduler's normal queue.
        let result = inner
            .scheduler
            .send(&inner.storage, &inner.id, wire, priority)
            .await;
        if self.is_stale(generation) {
            debug!(storage = %inner.storage, id = %inner.id, "discarding result of cancelled round");
            return Ok(false);
        }

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                self.set_online(false);
                return Err(e);
            }
        };
        let reply = match SyncMessage::<T>::from_wire(&response) {
            Ok(reply) => reply,
            Err(e) => {
                self.set_online(false);
                return Err(SyncError::InvalidMessage(e.to_string()));
            }
        };

        let peer_version = reply.build_version();
        let (filter, peer_size, received) = reply.into_parts();
        let needs_replication = messages::needs_replication(Some(&filter), local_ids.iter().map(String::as_str));
        {
            let mut peer = lock(&inner.peer)?;
            let old = peer.filter.replace(filter);
            peer.size = peer_size;
            peer.version = Some(peer_version);
            if let Some(old) = old {
                if let Ok(mut pool) = inner.pool.lock() {
                    old.reuse(&mut pool);
                }
            }
        }
        if peer_version != PROTOCOL_VERSION {
            info!(
                storage = %inner.storage,
                id = %inner.id,
                local = PROTOCOL_VERSION,
                peer = peer_version,
                "peer speaks another protocol version"
            );
            self.set_online(false);
            return Err(SyncError::VersionMismatch {
                local: PROTOCOL_VERSION,
                peer: peer_version,
            });
        }

        let persisted = inner.source.persist(received).await?;
        if persisted > 0 {
            debug!(storage = %inner.storage, id = %inner.id, persisted, "stored values from peer");
        }
        if persisted > 0 || needs_replication {
            self.touch();
        }
        self.set_online(true);
        Ok(true)
    }

    /// Converge with the peer now.
    ///
    /// Runs at least as many rounds as fit in the sync window at the fastest
    /// frequency, then keeps going while the peer is missing local values.
    /// Gives up on a non-retryable error, or after
    /// `max_consecutive_failures` failed rounds in a row.
    pub async fn sync(&self) -> Result<()> {
        let inner = &self.inner;
        inner.sync_active.store(true, Ordering::Release);
        let _active = FlagGuard(&inner.sync_active);

        let mut remaining = inner.config.min_cycles().max(1);
        let mut failures = 0usize;
        loop {
            match self.send_sync_message().await {
                Ok(true) => {
                    failures = 0;
                    remaining = remaining.saturating_sub(1);
                }
                Ok(false) => return Err(SyncError::Cancelled),
                Err(e) => {
                    failures += 1;
                    if !e.is_retryable() || failures >= inner.config.max_consecutive_failures {
                        info!(storage = %inner.storage, id = %inner.id, failures, error = %e, "sync gave up");
                        return Err(e);
                    }
                    debug!(storage = %inner.storage, id = %inner.id, failures, error = %e, "sync round failed");
                    tokio::time::sleep(inner.config.min_sync_freq).await;
                    continue;
                }
            }
            if remaining == 0 && !self.needs_replication().await? {
                return Ok(());
            }
        }
    }

    /// True until the peer's last filter covers every local id.
    pub async fn needs_replication(&self) -> Result<bool> {
        let ids = self.inner.source.ids().await?;
        let peer = lock(&self.inner.peer)?;
        Ok(messages::needs_replication(
            peer.filter.as_ref(),
            ids.iter().map(String::as_str),
        ))
    }

    pub async fn status(&self) -> Result<SyncStatus> {
        if !self.is_online() {
            return Ok(SyncStatus::Offline);
        }
        if self.needs_replication().await? {
            Ok(SyncStatus::Sync)
        } else {
            Ok(SyncStatus::Idle)
        }
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::Acquire)
    }

    /// Protocol version the peer last answered with.
    pub fn peer_version(&self) -> Option<u32> {
        self.inner.peer.lock().ok()?.version
    }

    /// Peer collection size from its last answer.
    pub fn peer_size(&self) -> usize {
        self.inner.peer.lock().map(|p| p.size).unwrap_or(0)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Background polling
    // ─────────────────────────────────────────────────────────────────────────

    /// Start polling the peer. No-op if already polling or closed.
    pub fn start_syncing(&self) {
        let inner = &self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return;
        }
        let Ok(mut polling) = inner.polling.lock() else {
            return;
        };
        if polling.is_some() {
            return;
        }
        self.reset_interval();

        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(poll_loop(Arc::downgrade(inner), Arc::clone(&inner.wake), rx));
        *polling = Some(Polling { shutdown, task });
        debug!(storage = %inner.storage, id = %inner.id, "polling started");
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.polling.lock().map(|p| p.is_some()).unwrap_or(false)
    }

    /// Bring the next round forward to the minimum interval.
    pub fn touch(&self) {
        self.reset_interval();
        self.inner.wake.notify_one();
    }

    /// Stop polling and cancel any round in progress.
    pub fn stop_syncing(&self) {
        let inner = &self.inner;
        inner.generation.fetch_add(1, Ordering::AcqRel);
        let stopped = match inner.polling.lock() {
            Ok(mut polling) => polling.take(),
            Err(_) => None,
        };
        if let Some(p) = stopped {
            let _ = p.shutdown.send(true);
            p.task.abort();
            debug!(storage = %inner.storage, id = %inner.id, "polling stopped");
        }
        self.reset_interval();
    }

    /// While not ready, background polling skips its rounds.
    pub fn set_ready(&self, ready: bool) {
        let was = self.inner.ready.swap(ready, Ordering::AcqRel);
        if ready && !was {
            self.touch();
        }
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    /// Stop for good. Later rounds fail with [`SyncError::Closed`] and the
    /// engine reports itself offline.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop_syncing();
        self.set_online(false);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn is_stale(&self, generation: u64) -> bool {
        self.inner.closed.load(Ordering::Acquire)
            || self.inner.generation.load(Ordering::Acquire) != generation
    }

    fn reset_interval(&self) {
        if let Ok(mut interval) = self.inner.interval.lock() {
            interval.reset(Instant::now());
        }
    }

    fn set_online(&self, online: bool) {
        let inner = &self.inner;
        if inner.online.swap(online, Ordering::AcqRel) == online {
            return;
        }
        info!(storage = %inner.storage, id = %inner.id, online, "peer status changed");
        let callback = inner.on_status.lock().ok().and_then(|c| c.clone());
        if let Some(callback) = callback {
            callback(online);
        }
    }
}

async fn poll_loop<T: SyncValue>(
    inner: Weak<EngineInner<T>>,
    wake: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let Some(strong) = inner.upgrade() else {
            break;
        };
        let delay = match strong.interval.lock() {
            Ok(interval) => interval.next_delay(Instant::now()),
            Err(_) => break,
        };
        drop(strong);
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = wake.notified() => continue,
            _ = tokio::time::sleep(delay) => {}
        }
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if !inner.ready.load(Ordering::Acquire) {
            continue;
        }
        let engine = SyncEngine { inner };
        if let Err(e) = engine.send_sync_message().await {
            debug!(storage = %engine.inner.storage, id = %engine.inner.id, error = %e, "background round failed");
        }
    }
}

fn lock<U>(mutex: &Mutex<U>) -> Result<std::sync::MutexGuard<'_, U>> {
    mutex
        .lock()
        .map_err(|_| SyncError::ServiceUnavailable("engine state poisoned".into()))
}
