//! Node configuration.
//!
//! Loaded from JSON, with every timing field optional:
//!
//! ```json
//! {
//!   "data_dir": "/var/lib/driftlog",
//!   "sync": { "min_sync_freq_ms": 300, "max_sync_freq_ms": 3000 },
//!   "scheduler": { "tick_ms": 200, "batch_cap": 50 },
//!   "commit_backend": "sqlite"
//! }
//! ```

use std::path::{Path, PathBuf};

use driftlog_sync::{SchedulerConfig, SyncConfig};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Where a repository keeps its commits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitBackend {
    /// `commits.jsonl`, an append-only log.
    #[default]
    Log,
    /// `commits.db`, a SQLite database. Suits long-lived server nodes.
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Each repository gets a subdirectory holding its logs.
    pub data_dir: PathBuf,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub commit_backend: CommitBackend,
}

impl NodeConfig {
    /// Client defaults rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            sync: SyncConfig::client(),
            scheduler: SchedulerConfig::default(),
            commit_backend: CommitBackend::default(),
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_commit_backend(mut self, backend: CommitBackend) -> Self {
        self.commit_backend = backend;
        self
    }

    pub fn repository_dir(&self, id: &str) -> PathBuf {
        self.data_dir.join(id)
    }

    pub(crate) fn commits_path(&self, id: &str) -> PathBuf {
        match self.commit_backend {
            CommitBackend::Log => self.repository_dir(id).join("commits.jsonl"),
            CommitBackend::Sqlite => self.repository_dir(id).join("commits.db"),
        }
    }

    pub(crate) fn entries_path(&self, id: &str) -> PathBuf {
        self.repository_dir(id).join("entries.jsonl")
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}
