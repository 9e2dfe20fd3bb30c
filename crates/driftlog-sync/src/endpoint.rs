//! Answering side of the sync protocol.
//!
//! A [`SyncEndpoint`] serves one `(storage, id)` collection. For each incoming
//! message it first persists the values the sender pushed, then builds the
//! reply against the sender's filter, so the reply filter already covers what
//! was just received.
//!
//! [`EndpointRouter`] dispatches a batched request body to the endpoints it
//! holds and is the usual [`BatchHandler`] behind a transport.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use driftlog_core::{BufferPool, SyncValue};
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::messages::{BuildParams, SyncMessage, SyncRequest, SyncResponse, WireMessage, PROTOCOL_VERSION};
use crate::source::SyncSource;
use crate::transport::BatchHandler;

/// Answers one sync message for one collection.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, msg: WireMessage) -> Result<WireMessage>;
}

/// Called with the number of values a peer pushed that were new locally.
pub type NewValuesCallback = Arc<dyn Fn(usize) + Send + Sync>;

pub struct SyncEndpoint<T: SyncValue> {
    storage: String,
    id: String,
    source: Arc<dyn SyncSource<T>>,
    expected_cycles: usize,
    low_accuracy: bool,
    pool: Mutex<BufferPool>,
    on_new_values: Option<NewValuesCallback>,
}

impl<T: SyncValue> SyncEndpoint<T> {
    /// Filters are sized for the fastest round frequency of `config`.
    pub fn new(
        storage: impl Into<String>,
        id: impl Into<String>,
        source: Arc<dyn SyncSource<T>>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            storage: storage.into(),
            id: id.into(),
            source,
            expected_cycles: config.min_cycles().max(1),
            low_accuracy: false,
            pool: Mutex::new(BufferPool::new()),
            on_new_values: None,
        }
    }

    pub fn with_low_accuracy(mut self, low_accuracy: bool) -> Self {
        self.low_accuracy = low_accuracy;
        self
    }

    pub fn on_new_values(mut self, callback: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.on_new_values = Some(Arc::new(callback));
        self
    }

    pub fn storage(&self) -> &str {
        &self.storage
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

#[async_trait]
impl<T: SyncValue> Responder for SyncEndpoint<T> {
    async fn respond(&self, msg: WireMessage) -> Result<WireMessage> {
        let incoming = SyncMessage::<T>::from_wire(&msg)
            .map_err(|e| SyncError::InvalidMessage(format!("{}/{}: {}", self.storage, self.id, e)))?;
        let peer_version = incoming.build_version();
        let (peer_filter, peer_size, pushed) = incoming.into_parts();

        let pushed_count = pushed.len();
        let persisted = self.source.persist(pushed).await?;
        if persisted > 0 {
            debug!(storage = %self.storage, id = %self.id, persisted, pushed = pushed_count, "stored pushed values");
            if let Some(callback) = &self.on_new_values {
                callback(persisted);
            }
        }

        let local = self.source.values().await?;
        let params = BuildParams {
            peer_filter: Some(&peer_filter),
            local_size: local.len(),
            peer_size,
            expected_cycles: self.expected_cycles,
            include_missing: peer_version >= PROTOCOL_VERSION,
            low_accuracy: self.low_accuracy,
        };

        let mut pool = self
            .pool
            .lock()
            .map_err(|_| SyncError::ServiceUnavailable(format!("{}/{}: pool poisoned", self.storage, self.id)))?;
        let reply = SyncMessage::build_in(params, local, &mut pool);
        let wire = reply.to_wire();
        debug!(
            storage = %self.storage,
            id = %self.id,
            local = reply.size(),
            peer = peer_size,
            sending = reply.values().len(),
            "answered sync message"
        );
        let (filter, _, _) = reply.into_parts();
        filter.reuse(&mut pool);
        peer_filter.reuse(&mut pool);
        Ok(wire)
    }
}

/// Answer every entry of a batched request body.
///
/// Entries whose collection `resolve` does not know, or whose responder
/// fails, are left out of the response; the requesting scheduler reports them
/// to their callers as unavailable.
pub async fn handle_batch<F>(body: &str, resolve: F) -> Result<String>
where
    F: Fn(&str, &str) -> Option<Arc<dyn Responder>>,
{
    let requests: Vec<SyncRequest> = serde_json::from_str(body)?;
    let mut responses = Vec::with_capacity(requests.len());
    for req in requests {
        let Some(responder) = resolve(&req.storage, &req.id) else {
            warn!(storage = %req.storage, id = %req.id, "sync request for unknown collection");
            continue;
        };
        match responder.respond(req.msg).await {
            Ok(res) => responses.push(SyncResponse {
                storage: req.storage,
                id: req.id,
                res,
            }),
            Err(e) => {
                warn!(storage = %req.storage, id = %req.id, error = %e, "sync request failed");
            }
        }
    }
    Ok(serde_json::to_string(&responses)?)
}

/// Routes batched requests to endpoints by `(storage, id)`.
#[derive(Default)]
pub struct EndpointRouter {
    routes: RwLock<HashMap<(String, String), Arc<dyn Responder>>>,
}

impl EndpointRouter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, storage: impl Into<String>, id: impl Into<String>, responder: Arc<dyn Responder>) {
        if let Ok(mut routes) = self.routes.write() {
            routes.insert((storage.into(), id.into()), responder);
        }
    }

    /// Register an endpoint under its own `(storage, id)`.
    pub fn mount<T: SyncValue>(&self, endpoint: SyncEndpoint<T>) {
        let key = (endpoint.storage.clone(), endpoint.id.clone());
        if let Ok(mut routes) = self.routes.write() {
            routes.insert(key, Arc::new(endpoint));
        }
    }

    pub fn unregister(&self, storage: &str, id: &str) -> bool {
        match self.routes.write() {
            Ok(mut routes) => routes.remove(&(storage.to_owned(), id.to_owned())).is_some(),
            Err(_) => false,
        }
    }

    pub fn resolve(&self, storage: &str, id: &str) -> Option<Arc<dyn Responder>> {
        self.routes
            .read()
            .ok()?
            .get(&(storage.to_owned(), id.to_owned()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.routes.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BatchHandler for EndpointRouter {
    async fn handle(&self, body: &str) -> Result<String> {
        handle_batch(body, |storage, id| self.resolve(storage, id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftlog_core::{BloomFilter, Commit};
    use driftlog_store::{CommitStore, MemoryCommitStore};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn commits(n: usize) -> Vec<Commit> {
        (0..n).map(|i| Commit::new(format!("commit {}", i).into_bytes())).collect()
    }

    fn endpoint(store: Arc<MemoryCommitStore>) -> SyncEndpoint<Commit> {
        SyncEndpoint::new("commits", "repo", store, &SyncConfig::client())
    }

    fn request(filter: &BloomFilter, size: usize, values: Vec<Commit>) -> WireMessage {
        SyncMessage::new(filter.clone(), size, values).to_wire()
    }

    #[tokio::test]
    async fn test_persists_before_reply() {
        let server = Arc::new(MemoryCommitStore::with_commits(commits(3)));
        let pushed = commits(2);
        let mut filter = BloomFilter::new(10, 0.01);
        for c in &pushed {
            filter.add(c.id().as_str());
        }

        let reply = endpoint(server.clone())
            .respond(request(&filter, 2, pushed.clone()))
            .await
            .unwrap();
        let reply = SyncMessage::<Commit>::from_wire(&reply).unwrap();

        assert_eq!(server.count().await.unwrap(), 5);
        assert_eq!(reply.size(), 5);
        for c in &pushed {
            assert!(reply.filter().has(c.id().as_str()));
        }
        // The pushed commits are in the sender's filter, so only the
        // server's own three can come back.
        assert!(reply.values().len() <= 3);
        for c in reply.values() {
            assert!(!pushed.contains(c));
        }
    }

    #[tokio::test]
    async fn test_empty_sender_receives_everything() {
        let server = Arc::new(MemoryCommitStore::with_commits(commits(20)));
        let empty = BloomFilter::new(1, 0.01);

        let reply = endpoint(server).respond(request(&empty, 0, Vec::new())).await.unwrap();
        let reply = SyncMessage::<Commit>::from_wire(&reply).unwrap();
        assert_eq!(reply.values().len(), 20);
    }

    #[tokio::test]
    async fn test_old_sender_gets_filter_only() {
        let server = Arc::new(MemoryCommitStore::with_commits(commits(5)));
        let empty = BloomFilter::new(1, 0.01);
        let mut wire = request(&empty, 0, Vec::new());
        wire.ver = 0;

        let reply = endpoint(server).respond(wire).await.unwrap();
        let reply = SyncMessage::<Commit>::from_wire(&reply).unwrap();
        assert!(reply.values().is_empty());
        assert_eq!(reply.size(), 5);
    }

    #[tokio::test]
    async fn test_new_values_callback() {
        let server = Arc::new(MemoryCommitStore::new());
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let endpoint = endpoint(server).on_new_values(move |n| {
            counter.fetch_add(n, Ordering::SeqCst);
        });

        let empty = BloomFilter::new(1, 0.01);
        endpoint.respond(request(&empty, 4, commits(4))).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_malformed_filter_rejected() {
        let server = Arc::new(MemoryCommitStore::new());
        let mut wire = request(&BloomFilter::new(1, 0.01), 0, Vec::new());
        wire.f.s.clear();

        let err = endpoint(server).respond(wire).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidMessage(_)));
    }

    #[tokio::test]
    async fn test_router_skips_unknown_collections() {
        let router = EndpointRouter::new();
        router.mount(endpoint(Arc::new(MemoryCommitStore::with_commits(commits(2)))));
        assert_eq!(router.len(), 1);

        let msg = request(&BloomFilter::new(1, 0.01), 0, Vec::new());
        let body = serde_json::to_string(&vec![
            SyncRequest {
                storage: "commits".into(),
                id: "repo".into(),
                msg: msg.clone(),
            },
            SyncRequest {
                storage: "commits".into(),
                id: "other".into(),
                msg,
            },
        ])
        .unwrap();

        let out: Vec<SyncResponse> = serde_json::from_str(&router.handle(&body).await.unwrap()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "repo");
        assert_eq!(out[0].res.s, 2);

        assert!(router.unregister("commits", "repo"));
        assert!(router.is_empty());
    }

    #[tokio::test]
    async fn test_unparsable_batch() {
        let router = EndpointRouter::new();
        let err = router.handle("{").await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidMessage(_)));
    }
}
