//! Transport abstraction for the sync protocol.
//!
//! The engine never speaks HTTP itself. A [`Transport`] posts one batched
//! request body to a URL and returns the response body; implementations may
//! use HTTP, WebSockets, or anything else.

use async_trait::async_trait;

use crate::error::Result;

/// Posts a request body and returns the peer's response body.
///
/// Implementations must be thread-safe (Send + Sync). Failures should be
/// reported as [`SyncError::Transport`](crate::SyncError::Transport) or
/// [`SyncError::ServiceUnavailable`](crate::SyncError::ServiceUnavailable).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(&self, url: &str, body: String) -> Result<String>;
}

/// Server side of a transport: answers a whole batched request body.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    async fn handle(&self, body: &str) -> Result<String>;
}

/// An in-process transport for tests and embedding.
///
/// Routes each URL to a registered [`BatchHandler`], typically an
/// [`EndpointRouter`](crate::EndpointRouter).
pub mod loopback {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, RwLock};

    use crate::error::SyncError;

    #[derive(Default)]
    pub struct LoopbackTransport {
        routes: RwLock<HashMap<String, Arc<dyn BatchHandler>>>,
        offline: AtomicBool,
        fail_next: AtomicUsize,
        calls: AtomicUsize,
    }

    impl LoopbackTransport {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Route `url` to `handler`, replacing any previous route.
        pub fn register(&self, url: impl Into<String>, handler: Arc<dyn BatchHandler>) {
            if let Ok(mut routes) = self.routes.write() {
                routes.insert(url.into(), handler);
            }
        }

        pub fn unregister(&self, url: &str) {
            if let Ok(mut routes) = self.routes.write() {
                routes.remove(url);
            }
        }

        /// While offline, every post fails.
        pub fn set_offline(&self, offline: bool) {
            self.offline.store(offline, Ordering::SeqCst);
        }

        /// Fail the next `n` posts.
        pub fn fail_next(&self, n: usize) {
            self.fail_next.store(n, Ordering::SeqCst);
        }

        /// Number of posts attempted so far, including failed ones.
        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn route(&self, url: &str) -> Option<Arc<dyn BatchHandler>> {
            self.routes.read().ok()?.get(url).cloned()
        }

        fn take_injected_failure(&self) -> bool {
            self.fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    #[async_trait]
    impl Transport for LoopbackTransport {
        async fn post(&self, url: &str, body: String) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.offline.load(Ordering::SeqCst) {
                return Err(SyncError::Transport(format!("{}: offline", url)));
            }
            if self.take_injected_failure() {
                return Err(SyncError::Transport(format!("{}: injected failure", url)));
            }
            let handler = self
                .route(url)
                .ok_or_else(|| SyncError::Transport(format!("{}: no route", url)))?;
            handler.handle(&body).await
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        struct Echo;

        #[async_trait]
        impl BatchHandler for Echo {
            async fn handle(&self, body: &str) -> Result<String> {
                Ok(body.to_uppercase())
            }
        }

        #[tokio::test]
        async fn test_routes_to_handler() {
            let transport = LoopbackTransport::new();
            transport.register("mem://a", Arc::new(Echo));

            assert_eq!(transport.post("mem://a", "hi".into()).await.unwrap(), "HI");
            assert!(matches!(
                transport.post("mem://b", "hi".into()).await,
                Err(SyncError::Transport(_))
            ));
            assert_eq!(transport.call_count(), 2);
        }

        #[tokio::test]
        async fn test_failure_injection() {
            let transport = LoopbackTransport::new();
            transport.register("mem://a", Arc::new(Echo));

            transport.fail_next(2);
            assert!(transport.post("mem://a", "x".into()).await.is_err());
            assert!(transport.post("mem://a", "x".into()).await.is_err());
            assert!(transport.post("mem://a", "x".into()).await.is_ok());

            transport.set_offline(true);
            assert!(transport.post("mem://a", "x".into()).await.is_err());
            transport.set_offline(false);
            assert!(transport.post("mem://a", "x".into()).await.is_ok());
        }
    }
}
