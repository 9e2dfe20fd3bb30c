//! Request batching towards one peer URL.
//!
//! Many engines (one per repository) talk to the same peer. Instead of one
//! network call per round, each engine queues its message on the peer's
//! [`SyncScheduler`], which flushes the queues on a fixed tick as a single
//! batched call and fans the responses back out by `(storage, id)`.
//!
//! ## Invariants
//!
//! - At most one batched call is in flight per scheduler; a flush that finds
//!   one running does nothing.
//! - The priority queue is drained before the normal queue, each up to
//!   `batch_cap` entries per flush.
//! - Every queued caller is answered exactly once.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::{SchedulerConfig, SyncConfig};
use crate::error::{Result, SyncError};
use crate::messages::{SyncRequest, SyncResponse, WireMessage};
use crate::retry::retry_if;
use crate::stats::MovingAverage;
use crate::transport::Transport;

/// A caller waiting for its response.
struct PendingSyncRequest {
    req: SyncRequest,
    reply: oneshot::Sender<Result<WireMessage>>,
}

#[derive(Default)]
struct Queues {
    priority: VecDeque<PendingSyncRequest>,
    normal: VecDeque<PendingSyncRequest>,
}

impl Queues {
    fn len(&self) -> usize {
        self.priority.len() + self.normal.len()
    }

    fn take_batch(&mut self, cap: usize) -> Vec<PendingSyncRequest> {
        let p = cap.min(self.priority.len());
        let n = cap.min(self.normal.len());
        let mut batch: Vec<_> = self.priority.drain(..p).collect();
        batch.extend(self.normal.drain(..n));
        batch
    }
}

/// Clears the in-flight flag when a flush ends, however it ends.
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Batches sync messages for one peer URL.
pub struct SyncScheduler {
    url: String,
    transport: Arc<dyn Transport>,
    sync_config: SyncConfig,
    config: SchedulerConfig,
    queues: Mutex<Queues>,
    in_flight: AtomicBool,
    closed: AtomicBool,
    rtt: Mutex<MovingAverage>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl SyncScheduler {
    /// Create a scheduler. Nothing is sent until [`start`](Self::start) or a
    /// manual [`flush`](Self::flush).
    pub fn new(
        url: impl Into<String>,
        transport: Arc<dyn Transport>,
        sync_config: SyncConfig,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        let window = SyncConfig::client().min_cycles() * 2;
        Arc::new(Self {
            url: url.into(),
            transport,
            sync_config,
            config,
            queues: Mutex::new(Queues::default()),
            in_flight: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            rtt: Mutex::new(MovingAverage::new(window)),
            ticker: Mutex::new(None),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Spawn the flush loop on the current runtime. Idempotent.
    ///
    /// The loop holds only a weak reference and ends when the scheduler is
    /// dropped or closed.
    pub fn start(self: &Arc<Self>) {
        let Ok(mut ticker) = self.ticker.lock() else {
            return;
        };
        if ticker.is_some() || self.closed.load(Ordering::Acquire) {
            return;
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.config.tick;
        *ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(scheduler) = weak.upgrade() else {
                    break;
                };
                if scheduler.closed.load(Ordering::Acquire) {
                    break;
                }
                scheduler.flush().await;
            }
        }));
    }

    /// Queue a message and wait for the peer's answer.
    pub async fn send(
        &self,
        storage: &str,
        id: &str,
        msg: WireMessage,
        priority: bool,
    ) -> Result<WireMessage> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SyncError::Closed);
        }
        let (reply, rx) = oneshot::channel();
        let pending = PendingSyncRequest {
            req: SyncRequest {
                storage: storage.to_owned(),
                id: id.to_owned(),
                msg,
            },
            reply,
        };
        {
            let mut queues = self.lock_queues()?;
            if priority {
                queues.priority.push_back(pending);
            } else {
                queues.normal.push_back(pending);
            }
        }
        rx.await
            .map_err(|_| SyncError::ServiceUnavailable(format!("{}: scheduler dropped request", self.url)))?
    }

    /// Send one batch. Returns the number of requests it carried; zero when
    /// the queues are empty or another flush is in flight.
    pub async fn flush(&self) -> usize {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            debug!(url = %self.url, "flush skipped, call in flight");
            return 0;
        }
        let _guard = FlightGuard(&self.in_flight);

        let batch = match self.lock_queues() {
            Ok(mut queues) => queues.take_batch(self.config.batch_cap),
            Err(_) => return 0,
        };
        if batch.is_empty() {
            return 0;
        }
        let count = batch.len();

        let requests: Vec<&SyncRequest> = batch.iter().map(|p| &p.req).collect();
        let body = match serde_json::to_string(&requests) {
            Ok(body) => body,
            Err(e) => {
                reject_all(batch, &format!("encode batch: {}", e));
                return count;
            }
        };

        let start = Instant::now();
        let result = retry_if(
            "sync batch",
            &self.config.retry,
            || self.transport.post(&self.url, body.clone()),
            SyncError::is_retryable,
        )
        .await;

        let text = match result {
            Ok(text) => {
                let rtt = start.elapsed();
                if let Ok(mut avg) = self.rtt.lock() {
                    avg.add_value(rtt.as_secs_f64() * 1000.0);
                }
                debug!(url = %self.url, requests = count, rtt_ms = rtt.as_millis() as u64, "sync batch answered");
                text
            }
            Err(e) => {
                info!(url = %self.url, requests = count, error = %e, "sync batch failed");
                reject_all(batch, &e.to_string());
                return count;
            }
        };

        let responses: Vec<SyncResponse> = match serde_json::from_str(&text) {
            Ok(responses) => responses,
            Err(e) => {
                warn!(url = %self.url, error = %e, "unparsable sync response");
                reject_all(batch, &format!("unparsable response: {}", e));
                return count;
            }
        };

        let mut by_key: HashMap<(String, String), VecDeque<WireMessage>> = HashMap::new();
        for resp in responses {
            by_key
                .entry((resp.storage, resp.id))
                .or_default()
                .push_back(resp.res);
        }
        for pending in batch {
            let key = (pending.req.storage, pending.req.id);
            let answer = match by_key.get_mut(&key).and_then(VecDeque::pop_front) {
                Some(res) => Ok(res),
                None => {
                    debug!(url = %self.url, storage = %key.0, id = %key.1, "no response for request");
                    Err(SyncError::ServiceUnavailable(format!(
                        "{}: no response for {}/{}",
                        self.url, key.0, key.1
                    )))
                }
            };
            // The caller may have given up.
            let _ = pending.reply.send(answer);
        }
        count
    }

    /// Rounds expected within the sync window at the measured round-trip time.
    pub fn sync_cycles(&self) -> usize {
        let avg_ms = self.rtt.lock().map(|avg| avg.current_value()).unwrap_or(0.0);
        self.sync_config
            .cycles(Duration::from_secs_f64(avg_ms.max(0.0) / 1000.0))
    }

    /// Average round-trip time of recent batches.
    pub fn average_rtt(&self) -> Duration {
        let avg_ms = self.rtt.lock().map(|avg| avg.current_value()).unwrap_or(0.0);
        Duration::from_secs_f64(avg_ms.max(0.0) / 1000.0)
    }

    /// Requests waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.queues.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop the flush loop and fail every queued request with
    /// [`SyncError::Closed`].
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Ok(mut ticker) = self.ticker.lock() {
            if let Some(handle) = ticker.take() {
                handle.abort();
            }
        }
        if let Ok(mut queues) = self.queues.lock() {
            let cap = queues.len();
            for pending in queues.take_batch(cap) {
                let _ = pending.reply.send(Err(SyncError::Closed));
            }
        }
    }

    fn lock_queues(&self) -> Result<std::sync::MutexGuard<'_, Queues>> {
        self.queues
            .lock()
            .map_err(|_| SyncError::ServiceUnavailable(format!("{}: queue poisoned", self.url)))
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        self.close();
    }
}

fn reject_all(batch: Vec<PendingSyncRequest>, reason: &str) {
    for pending in batch {
        let _ = pending
            .reply
            .send(Err(SyncError::ServiceUnavailable(reason.to_owned())));
    }
}

/// Caller-owned map of peer URL to scheduler.
///
/// Every engine syncing with the same URL should share one scheduler so their
/// rounds are batched together.
pub struct SchedulerRegistry {
    transport: Arc<dyn Transport>,
    sync_config: SyncConfig,
    config: SchedulerConfig,
    schedulers: Mutex<HashMap<String, Arc<SyncScheduler>>>,
}

impl SchedulerRegistry {
    pub fn new(transport: Arc<dyn Transport>, sync_config: SyncConfig, config: SchedulerConfig) -> Self {
        Self {
            transport,
            sync_config,
            config,
            schedulers: Mutex::new(HashMap::new()),
        }
    }

    /// The started scheduler for `url`, created on first use.
    pub fn get_or_create(&self, url: &str) -> Arc<SyncScheduler> {
        let mut schedulers = match self.schedulers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(existing) = schedulers.get(url) {
            if !existing.is_closed() {
                return Arc::clone(existing);
            }
        }
        let scheduler = SyncScheduler::new(
            url,
            Arc::clone(&self.transport),
            self.sync_config.clone(),
            self.config.clone(),
        );
        scheduler.start();
        schedulers.insert(url.to_owned(), Arc::clone(&scheduler));
        scheduler
    }

    pub fn get(&self, url: &str) -> Option<Arc<SyncScheduler>> {
        self.schedulers.lock().ok()?.get(url).cloned()
    }

    pub fn len(&self) -> usize {
        self.schedulers.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close and forget every scheduler.
    pub fn close_all(&self) {
        let drained: Vec<_> = match self.schedulers.lock() {
            Ok(mut guard) => guard.drain().map(|(_, s)| s).collect(),
            Err(_) => return,
        };
        for scheduler in drained {
            scheduler.close();
        }
    }
}
