//! SQLite implementation of the CommitStore trait.
//!
//! Uses rusqlite with bundled SQLite, wrapped in async via
//! `tokio::task::spawn_blocking`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use driftlog_core::{now_millis, Commit, CommitId};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{CommitStore, InsertResult};

/// SQLite-backed commit store.
///
/// Thread-safe via an internal Mutex. All operations run on the blocking pool.
#[derive(Clone)]
pub struct SqliteCommitStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCommitStore {
    /// Open a database at the given path, creating and migrating it if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|e| {
                StoreError::Database(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
                    Some(format!("mutex poisoned: {}", e)),
                ))
            })?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
    }
}

fn row_to_commit(row: &rusqlite::Row<'_>) -> rusqlite::Result<Commit> {
    let id: String = row.get("commit_id")?;
    let timestamp: i64 = row.get("timestamp")?;
    let body: Vec<u8> = row.get("body")?;
    Ok(Commit::from_parts(id, timestamp, body))
}

fn insert_one(conn: &Connection, commit: &Commit, now: i64) -> Result<InsertResult> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO commits (commit_id, timestamp, body, ingested_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            commit.id().as_str(),
            commit.timestamp(),
            commit.body().as_ref(),
            now
        ],
    )?;
    Ok(if changed == 0 {
        InsertResult::AlreadyExists
    } else {
        InsertResult::Inserted
    })
}

#[async_trait]
impl CommitStore for SqliteCommitStore {
    async fn insert_commit(&self, commit: &Commit) -> Result<InsertResult> {
        let commit = commit.clone();
        self.with_conn(move |conn| insert_one(conn, &commit, now_millis()))
            .await
    }

    async fn insert_commits(&self, commits: &[Commit]) -> Result<usize> {
        let commits = commits.to_vec();
        self.with_conn(move |conn| {
            let now = now_millis();
            let tx = conn.transaction()?;
            let mut inserted = 0;
            for commit in &commits {
                if insert_one(&tx, commit, now)? == InsertResult::Inserted {
                    inserted += 1;
                }
            }
            tx.commit()?;
            Ok(inserted)
        })
        .await
    }

    async fn get_commit(&self, id: &CommitId) -> Result<Option<Commit>> {
        let id = id.clone();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT commit_id, timestamp, body FROM commits WHERE commit_id = ?1",
                    params![id.as_str()],
                    row_to_commit,
                )
                .optional()?)
        })
        .await
    }

    async fn has_commit(&self, id: &CommitId) -> Result<bool> {
        let id = id.clone();
        self.with_conn(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM commits WHERE commit_id = ?1",
                    params![id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn commit_ids(&self) -> Result<Vec<CommitId>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT commit_id FROM commits ORDER BY seq")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .map(|r| r.map(CommitId::from))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(ids)
        })
        .await
    }

    async fn commits(&self) -> Result<Vec<Commit>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT commit_id, timestamp, body FROM commits ORDER BY seq")?;
            let commits = stmt
                .query_map([], row_to_commit)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(commits)
        })
        .await
    }

    async fn count(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM commits", [], |row| row.get(0))?;
            usize::try_from(n).map_err(|_| StoreError::InvalidData(format!("bad count {}", n)))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_insert_idempotent() {
        let store = SqliteCommitStore::open_memory().unwrap();
        let commit = Commit::from_parts("c1", 10, &b"body"[..]);

        assert_eq!(store.insert_commit(&commit).await.unwrap(), InsertResult::Inserted);
        assert_eq!(
            store.insert_commit(&commit).await.unwrap(),
            InsertResult::AlreadyExists
        );
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.get_commit(commit.id()).await.unwrap(), Some(commit));
    }

    #[tokio::test]
    async fn test_batch_insert_preserves_order() {
        let store = SqliteCommitStore::open_memory().unwrap();
        let commits: Vec<_> = ["z", "a", "m"]
            .iter()
            .enumerate()
            .map(|(i, id)| Commit::from_parts(*id, i as i64, vec![i as u8; 3]))
            .collect();

        assert_eq!(store.insert_commits(&commits).await.unwrap(), 3);
        assert_eq!(store.insert_commits(&commits).await.unwrap(), 0);
        assert_eq!(store.commits().await.unwrap(), commits);
        let ids: Vec<String> = store
            .commit_ids()
            .await
            .unwrap()
            .into_iter()
            .map(|id| id.to_string())
            .collect();
        assert_eq!(ids, vec!["z", "a", "m"]);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("commits.db");
        let commit = Commit::new(&b"durable"[..]);
        {
            let store = SqliteCommitStore::open(&path).unwrap();
            store.insert_commit(&commit).await.unwrap();
        }
        let store = SqliteCommitStore::open(&path).unwrap();
        assert!(store.has_commit(commit.id()).await.unwrap());
        assert!(!store.has_commit(&CommitId::from("nope")).await.unwrap());
    }
}
