//! CommitStore trait: the abstract interface for commit persistence.
//!
//! The sync engine only needs set semantics over commits: add, look up, list.
//! Implementations include the append-only log (primary), SQLite, and memory
//! (for tests).

use async_trait::async_trait;
use driftlog_core::{Commit, CommitId};

use crate::error::Result;

/// Result of inserting a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// Commit was inserted.
    Inserted,
    /// A commit with the same id already exists (idempotent, not an error).
    AlreadyExists,
}

/// Async interface for commit persistence.
///
/// Commits are immutable and identified by id, so inserts are idempotent.
/// Listing order is insertion order.
#[async_trait]
pub trait CommitStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a single commit.
    async fn insert_commit(&self, commit: &Commit) -> Result<InsertResult>;

    /// Insert many commits, skipping those already present.
    ///
    /// Returns how many were new.
    async fn insert_commits(&self, commits: &[Commit]) -> Result<usize> {
        let mut inserted = 0;
        for commit in commits {
            if self.insert_commit(commit).await? == InsertResult::Inserted {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Get a commit by id.
    async fn get_commit(&self, id: &CommitId) -> Result<Option<Commit>>;

    /// Check if a commit exists.
    async fn has_commit(&self, id: &CommitId) -> Result<bool> {
        Ok(self.get_commit(id).await?.is_some())
    }

    /// Ids of all commits, in insertion order.
    async fn commit_ids(&self) -> Result<Vec<CommitId>>;

    /// All commits, in insertion order.
    async fn commits(&self) -> Result<Vec<Commit>>;

    /// Number of stored commits.
    async fn count(&self) -> Result<usize>;
}
