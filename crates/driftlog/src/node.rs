//! The Node: repositories, their stores, and their sync links.
//!
//! A node owns a data directory. Every repository under it holds two
//! append-only logs, one of commits and one of log entries, and is served to
//! peers through the node's [`EndpointRouter`]. Connecting a repository to a
//! peer URL creates one [`SyncEngine`] per log, sharing the node's scheduler
//! for that URL.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use driftlog_core::{Commit, LogEntry};
use driftlog_store::{CommitStore, EntryLog, LogCommitStore, SqliteCommitStore};
use driftlog_sync::{
    EndpointRouter, SchedulerRegistry, SyncEndpoint, SyncEngine, SyncSource, SyncStatus, Transport,
};
use tracing::{debug, info};

use crate::config::{CommitBackend, NodeConfig};
use crate::error::{NodeError, Result};

/// Storage kind of the commit log on the wire.
pub const COMMITS: &str = "commits";
/// Storage kind of the entry log on the wire.
pub const ENTRIES: &str = "entries";

/// Both engines of one repository towards one peer.
#[derive(Clone)]
pub struct PeerLink {
    url: String,
    commits: SyncEngine<Commit>,
    entries: SyncEngine<LogEntry>,
}

impl PeerLink {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn commits(&self) -> &SyncEngine<Commit> {
        &self.commits
    }

    pub fn entries(&self) -> &SyncEngine<LogEntry> {
        &self.entries
    }

    /// Converge both logs with the peer.
    pub async fn sync(&self) -> Result<()> {
        self.commits.sync().await?;
        self.entries.sync().await?;
        Ok(())
    }

    pub fn start_syncing(&self) {
        self.commits.start_syncing();
        self.entries.start_syncing();
    }

    pub fn stop_syncing(&self) {
        self.commits.stop_syncing();
        self.entries.stop_syncing();
    }

    pub fn touch(&self) {
        self.commits.touch();
        self.entries.touch();
    }

    /// The less settled of the two engines' states.
    pub async fn status(&self) -> Result<SyncStatus> {
        let commits = self.commits.status().await?;
        let entries = self.entries.status().await?;
        Ok(match (commits, entries) {
            (SyncStatus::Offline, _) | (_, SyncStatus::Offline) => SyncStatus::Offline,
            (SyncStatus::Sync, _) | (_, SyncStatus::Sync) => SyncStatus::Sync,
            _ => SyncStatus::Idle,
        })
    }

    /// Called with the online flag of either engine when it changes.
    pub fn set_status_callback(&self, callback: impl Fn(bool) + Send + Sync + 'static) {
        let callback = Arc::new(callback);
        let for_entries = Arc::clone(&callback);
        self.commits.set_status_callback(move |online| callback(online));
        self.entries.set_status_callback(move |online| for_entries(online));
    }

    fn close(&self) {
        self.commits.close();
        self.entries.close();
    }
}

/// The commit store a repository was opened with.
#[derive(Clone)]
enum Commits {
    Log(Arc<LogCommitStore>),
    Sqlite(Arc<SqliteCommitStore>),
}

impl Commits {
    async fn open(config: &NodeConfig, id: &str) -> Result<Self> {
        let path = config.commits_path(id);
        Ok(match config.commit_backend {
            CommitBackend::Log => Commits::Log(Arc::new(LogCommitStore::open(path).await?)),
            CommitBackend::Sqlite => {
                std::fs::create_dir_all(config.repository_dir(id))?;
                Commits::Sqlite(Arc::new(SqliteCommitStore::open(path)?))
            }
        })
    }

    fn store(&self) -> Arc<dyn CommitStore> {
        match self {
            Commits::Log(store) => store.clone(),
            Commits::Sqlite(store) => store.clone(),
        }
    }

    fn source(&self) -> Arc<dyn SyncSource<Commit>> {
        match self {
            Commits::Log(store) => store.clone(),
            Commits::Sqlite(store) => store.clone(),
        }
    }

    async fn close(&self) -> Result<()> {
        if let Commits::Log(store) = self {
            store.close().await?;
        }
        Ok(())
    }
}

/// One repository: a commit store, an entry log, and its peer links.
pub struct Repository {
    id: String,
    commits: Commits,
    entries: Arc<EntryLog>,
    peers: Mutex<Vec<PeerLink>>,
}

impl Repository {
    pub fn id(&self) -> &str {
        &self.id
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Commits
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a new commit and nudge every peer link.
    pub async fn commit(&self, body: impl Into<Vec<u8>>) -> Result<Commit> {
        let commit = Commit::new(body.into());
        self.commits.store().insert_commit(&commit).await?;
        debug!(repository = %self.id, commit = %commit.id(), "committed");
        self.touch_peers();
        Ok(commit)
    }

    pub async fn commits(&self) -> Result<Vec<Commit>> {
        Ok(self.commits.store().commits().await?)
    }

    pub async fn commit_count(&self) -> Result<usize> {
        Ok(self.commits.store().count().await?)
    }

    pub fn commit_store(&self) -> Arc<dyn CommitStore> {
        self.commits.store()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Log entries
    // ─────────────────────────────────────────────────────────────────────────

    /// Append entries not yet present. Returns how many were new.
    pub async fn append_entries(&self, entries: &[LogEntry]) -> Result<usize> {
        let added = self.entries.append(entries).await?;
        if added > 0 {
            self.touch_peers();
        }
        Ok(added)
    }

    pub async fn entries(&self) -> Result<Vec<LogEntry>> {
        Ok(self.entries.entries().await?)
    }

    /// The `n` newest entries, newest first.
    pub async fn tail(&self, n: usize) -> Result<Vec<LogEntry>> {
        Ok(self.entries.tail(n).await?)
    }

    pub async fn query_entries<P>(&self, predicate: P, limit: usize) -> Result<Vec<LogEntry>>
    where
        P: FnMut(&LogEntry) -> bool + Send + 'static,
    {
        Ok(self.entries.query(predicate, limit).await?)
    }

    pub fn entry_log(&self) -> &Arc<EntryLog> {
        &self.entries
    }

    pub fn peers(&self) -> Vec<PeerLink> {
        self.peers.lock().map(|p| p.clone()).unwrap_or_default()
    }

    fn touch_peers(&self) {
        for peer in self.peers() {
            peer.touch();
        }
    }

    async fn close(&self) -> Result<()> {
        let peers = match self.peers.lock() {
            Ok(mut peers) => std::mem::take(&mut *peers),
            Err(_) => Vec::new(),
        };
        for peer in &peers {
            peer.close();
        }
        self.commits.close().await?;
        self.entries.close().await?;
        Ok(())
    }
}

/// A driftlog node.
pub struct Node {
    config: NodeConfig,
    router: Arc<EndpointRouter>,
    registry: SchedulerRegistry,
    repositories: tokio::sync::Mutex<HashMap<String, Arc<Repository>>>,
    closed: std::sync::atomic::AtomicBool,
}

impl Node {
    /// Create a node that reaches its peers through `transport`.
    pub fn new(config: NodeConfig, transport: Arc<dyn Transport>) -> Self {
        let registry = SchedulerRegistry::new(transport, config.sync.clone(), config.scheduler.clone());
        Self {
            config,
            router: EndpointRouter::new(),
            registry,
            repositories: tokio::sync::Mutex::new(HashMap::new()),
            closed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Handler answering peers' batched sync requests for every open
    /// repository. Register it with whatever serves this node.
    pub fn router(&self) -> Arc<EndpointRouter> {
        Arc::clone(&self.router)
    }

    /// Open a repository, creating its logs on first use.
    pub async fn repository(&self, id: &str) -> Result<Arc<Repository>> {
        self.ensure_open()?;
        validate_repository_id(id)?;
        let mut repositories = self.repositories.lock().await;
        if let Some(repo) = repositories.get(id) {
            return Ok(Arc::clone(repo));
        }

        let commits = Commits::open(&self.config, id).await?;
        let entries = Arc::new(EntryLog::open(self.config.entries_path(id)).await?);
        self.router.mount(SyncEndpoint::<Commit>::new(
            COMMITS,
            id,
            commits.source(),
            &self.config.sync,
        ));
        self.router.mount(SyncEndpoint::<LogEntry>::new(
            ENTRIES,
            id,
            entries.clone(),
            &self.config.sync,
        ));

        let repo = Arc::new(Repository {
            id: id.to_owned(),
            commits,
            entries,
            peers: Mutex::new(Vec::new()),
        });
        info!(
            repository = %id,
            backend = ?self.config.commit_backend,
            commits = repo.commit_count().await?,
            entries = repo.entries.len().await,
            "repository opened"
        );
        repositories.insert(id.to_owned(), Arc::clone(&repo));
        Ok(repo)
    }

    /// Link a repository to the same repository on `peer_url`.
    pub async fn connect(&self, id: &str, peer_url: &str) -> Result<PeerLink> {
        let repo = self.repository(id).await?;
        let scheduler = self.registry.get_or_create(peer_url);
        let link = PeerLink {
            url: peer_url.to_owned(),
            commits: SyncEngine::<Commit>::new(
                COMMITS,
                id,
                repo.commits.source(),
                scheduler.clone(),
                self.config.sync.clone(),
            ),
            entries: SyncEngine::<LogEntry>::new(
                ENTRIES,
                id,
                repo.entries.clone(),
                scheduler,
                self.config.sync.clone(),
            ),
        };
        if let Ok(mut peers) = repo.peers.lock() {
            peers.push(link.clone());
        }
        info!(repository = %id, peer = %peer_url, "connected");
        Ok(link)
    }

    /// Stop every engine, scheduler and log. The node cannot be reused.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, std::sync::atomic::Ordering::AcqRel) {
            return Ok(());
        }
        let repositories: Vec<_> = self.repositories.lock().await.drain().collect();
        for (id, repo) in repositories {
            self.router.unregister(COMMITS, &id);
            self.router.unregister(ENTRIES, &id);
            repo.close().await?;
        }
        self.registry.close_all();
        info!(data_dir = %self.config.data_dir.display(), "node closed");
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(std::sync::atomic::Ordering::Acquire) {
            return Err(NodeError::Closed);
        }
        Ok(())
    }
}

/// Repository ids are used as directory names.
pub fn validate_repository_id(id: &str) -> Result<()> {
    let plain = !id.is_empty()
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if plain {
        Ok(())
    } else {
        Err(NodeError::InvalidRepository(id.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftlog_sync::LoopbackTransport;
    use tempfile::TempDir;

    fn node(dir: &TempDir) -> Node {
        Node::new(NodeConfig::new(dir.path()), LoopbackTransport::new())
    }

    #[test]
    fn test_repository_ids() {
        assert!(validate_repository_id("main").is_ok());
        assert!(validate_repository_id("team-1_notes.v2").is_ok());
        for bad in ["", ".", "..", "a/b", "a\\b", "naïve", "with space"] {
            assert!(validate_repository_id(bad).is_err(), "{:?}", bad);
        }
    }

    #[tokio::test]
    async fn test_repository_opened_once() {
        let dir = TempDir::new().unwrap();
        let node = node(&dir);

        let a = node.repository("main").await.unwrap();
        let b = node.repository("main").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(node.router().resolve(COMMITS, "main").is_some());
        assert!(node.router().resolve(ENTRIES, "main").is_some());
    }

    #[tokio::test]
    async fn test_commits_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let id = {
            let node = node(&dir);
            let repo = node.repository("main").await.unwrap();
            let commit = repo.commit(b"first".to_vec()).await.unwrap();
            node.close().await.unwrap();
            commit.id().clone()
        };

        let node = node(&dir);
        let repo = node.repository("main").await.unwrap();
        let commits = repo.commits().await.unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].id(), &id);
        assert_eq!(&commits[0].body()[..], b"first");
    }

    #[tokio::test]
    async fn test_closed_node_rejects_use() {
        let dir = TempDir::new().unwrap();
        let node = node(&dir);
        let repo = node.repository("main").await.unwrap();
        let link = node.connect("main", "mem://nowhere").await.unwrap();

        node.close().await.unwrap();
        assert!(matches!(node.repository("main").await, Err(NodeError::Closed)));
        assert!(link.commits().is_closed());
        assert!(repo.peers().is_empty());
        assert!(node.router().is_empty());
    }
}
