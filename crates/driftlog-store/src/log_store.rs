//! Commit store backed by an [`AppendOnlyLog`].
//!
//! Each commit is one log record in its payload encoding
//! (`{"id","ts","body"}`). The full set is loaded into an in-memory index when
//! the store opens; the log is the source of truth across restarts.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use driftlog_core::{Commit, CommitId, SyncValue};

use crate::error::{Result, StoreError};
use crate::log::{AppendOnlyLog, LogRecord, OpenMode};
use crate::traits::{CommitStore, InsertResult};

/// Durable commit store: an append-only log plus an id index.
pub struct LogCommitStore {
    log: AppendOnlyLog,
    index: RwLock<CommitIndex>,
    /// Serializes check-then-append so concurrent inserts of the same commit
    /// write it once.
    write_lock: Mutex<()>,
}

#[derive(Default)]
struct CommitIndex {
    order: Vec<CommitId>,
    commits: HashMap<CommitId, Commit>,
}

impl CommitIndex {
    fn contains(&self, id: &CommitId) -> bool {
        self.commits.contains_key(id)
    }

    fn push(&mut self, commit: Commit) -> bool {
        if self.contains(commit.id()) {
            return false;
        }
        self.order.push(commit.id().clone());
        self.commits.insert(commit.id().clone(), commit);
        true
    }
}

impl LogCommitStore {
    /// Open (or create) the commit log at `path` and load its contents.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_mode(path, OpenMode::Write).await
    }

    /// Open an existing commit log without ever modifying it.
    pub async fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_mode(path, OpenMode::Read).await
    }

    async fn open_with_mode(path: impl AsRef<Path>, mode: OpenMode) -> Result<Self> {
        let log = AppendOnlyLog::new(path, mode);
        let records = log.open().await?;

        let mut index = CommitIndex::default();
        let mut skipped = 0usize;
        for record in records {
            match Commit::from_payload(&Value::Object(record)) {
                Ok(commit) => {
                    index.push(commit);
                }
                Err(e) => {
                    skipped += 1;
                    warn!(path = %log.path().display(), error = %e, "skipping undecodable commit record");
                }
            }
        }
        info!(
            path = %log.path().display(),
            commits = index.order.len(),
            skipped,
            "loaded commit log"
        );

        Ok(Self {
            log,
            index: RwLock::new(index),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        self.log.path()
    }

    /// Close the underlying log. Further inserts fail.
    pub async fn close(&self) -> Result<()> {
        self.log.close().await
    }
}

fn to_record(commit: &Commit) -> Result<LogRecord> {
    match commit.to_payload() {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::InvalidData(format!(
            "commit payload is not an object: {}",
            other
        ))),
    }
}

#[async_trait]
impl CommitStore for LogCommitStore {
    async fn insert_commit(&self, commit: &Commit) -> Result<InsertResult> {
        let inserted = self.insert_commits(std::slice::from_ref(commit)).await?;
        Ok(if inserted == 0 {
            InsertResult::AlreadyExists
        } else {
            InsertResult::Inserted
        })
    }

    async fn insert_commits(&self, commits: &[Commit]) -> Result<usize> {
        let _write = self.write_lock.lock().await;

        let fresh: Vec<&Commit> = {
            let index = self.index.read().await;
            let mut seen = std::collections::HashSet::new();
            commits
                .iter()
                .filter(|c| !index.contains(c.id()) && seen.insert(c.id().clone()))
                .collect()
        };
        if fresh.is_empty() {
            return Ok(0);
        }

        let records = fresh
            .iter()
            .map(|c| to_record(c))
            .collect::<Result<Vec<_>>>()?;
        self.log.append(records).await?;

        let mut index = self.index.write().await;
        for commit in &fresh {
            index.push((*commit).clone());
        }
        Ok(fresh.len())
    }

    async fn get_commit(&self, id: &CommitId) -> Result<Option<Commit>> {
        Ok(self.index.read().await.commits.get(id).cloned())
    }

    async fn has_commit(&self, id: &CommitId) -> Result<bool> {
        Ok(self.index.read().await.contains(id))
    }

    async fn commit_ids(&self) -> Result<Vec<CommitId>> {
        Ok(self.index.read().await.order.clone())
    }

    async fn commits(&self) -> Result<Vec<Commit>> {
        let index = self.index.read().await;
        Ok(index
            .order
            .iter()
            .filter_map(|id| index.commits.get(id).cloned())
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.index.read().await.order.len())
    }
}
