//! In-memory implementation of the CommitStore trait.
//!
//! This is primarily for testing. It has the same semantics as the log and
//! SQLite stores but keeps everything in memory with no persistence.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use driftlog_core::{Commit, CommitId};

use crate::error::{Result, StoreError};
use crate::traits::{CommitStore, InsertResult};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
#[derive(Default)]
pub struct MemoryCommitStore {
    inner: RwLock<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    /// Insertion order.
    order: Vec<CommitId>,
    commits: HashMap<CommitId, Commit>,
}

impl MemoryCommitStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `commits`.
    pub fn with_commits(commits: impl IntoIterator<Item = Commit>) -> Self {
        let store = Self::new();
        if let Ok(mut inner) = store.inner.write() {
            for commit in commits {
                inner.insert(commit);
            }
        }
        store
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, MemoryInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::InvalidData(format!("lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, MemoryInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::InvalidData(format!("lock poisoned: {}", e)))
    }
}

impl MemoryInner {
    fn insert(&mut self, commit: Commit) -> InsertResult {
        if self.commits.contains_key(commit.id()) {
            return InsertResult::AlreadyExists;
        }
        self.order.push(commit.id().clone());
        self.commits.insert(commit.id().clone(), commit);
        InsertResult::Inserted
    }
}

#[async_trait]
impl CommitStore for MemoryCommitStore {
    async fn insert_commit(&self, commit: &Commit) -> Result<InsertResult> {
        Ok(self.write()?.insert(commit.clone()))
    }

    async fn insert_commits(&self, commits: &[Commit]) -> Result<usize> {
        let mut inner = self.write()?;
        Ok(commits
            .iter()
            .filter(|c| inner.insert((*c).clone()) == InsertResult::Inserted)
            .count())
    }

    async fn get_commit(&self, id: &CommitId) -> Result<Option<Commit>> {
        Ok(self.read()?.commits.get(id).cloned())
    }

    async fn has_commit(&self, id: &CommitId) -> Result<bool> {
        Ok(self.read()?.commits.contains_key(id))
    }

    async fn commit_ids(&self) -> Result<Vec<CommitId>> {
        Ok(self.read()?.order.clone())
    }

    async fn commits(&self) -> Result<Vec<Commit>> {
        let inner = self.read()?;
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.commits.get(id).cloned())
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.read()?.order.len())
    }
}
