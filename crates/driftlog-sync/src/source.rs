//! The local collection a sync engine reconciles.
//!
//! Engines and endpoints only need set semantics: list ids, list values,
//! count, and add values received from a peer. Any [`CommitStore`] is a
//! source of commits, and an [`EntryLog`] is a source of log entries.

use async_trait::async_trait;
use driftlog_core::{Commit, LogEntry, SyncValue};
use driftlog_store::{CommitStore, EntryLog};

use crate::error::Result;

#[async_trait]
pub trait SyncSource<T: SyncValue>: Send + Sync {
    /// Every value held locally.
    async fn values(&self) -> Result<Vec<T>>;

    /// Ids of every value held locally.
    async fn ids(&self) -> Result<Vec<String>>;

    async fn size(&self) -> Result<usize>;

    /// Store values received from a peer. Returns how many were new.
    async fn persist(&self, values: Vec<T>) -> Result<usize>;
}

#[async_trait]
impl<S: CommitStore> SyncSource<Commit> for S {
    async fn values(&self) -> Result<Vec<Commit>> {
        Ok(self.commits().await?)
    }

    async fn ids(&self) -> Result<Vec<String>> {
        Ok(self
            .commit_ids()
            .await?
            .into_iter()
            .map(|id| id.as_str().to_owned())
            .collect())
    }

    async fn size(&self) -> Result<usize> {
        Ok(self.count().await?)
    }

    async fn persist(&self, values: Vec<Commit>) -> Result<usize> {
        if values.is_empty() {
            return Ok(0);
        }
        Ok(self.insert_commits(&values).await?)
    }
}

#[async_trait]
impl SyncSource<LogEntry> for EntryLog {
    async fn values(&self) -> Result<Vec<LogEntry>> {
        Ok(self.entries().await?)
    }

    async fn ids(&self) -> Result<Vec<String>> {
        Ok(EntryLog::ids(self).await)
    }

    async fn size(&self) -> Result<usize> {
        Ok(self.len().await)
    }

    async fn persist(&self, values: Vec<LogEntry>) -> Result<usize> {
        if values.is_empty() {
            return Ok(0);
        }
        Ok(self.append(&values).await?)
    }
}
