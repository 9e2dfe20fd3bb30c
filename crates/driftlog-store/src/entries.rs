//! Durable collection of [`LogEntry`] values.
//!
//! Entries are written to an [`AppendOnlyLog`] as their own JSON object, so the
//! file is a plain line-delimited stream any log tooling can read.

use std::collections::HashSet;
use std::path::Path;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::warn;

use driftlog_core::{LogEntry, SyncValue};

use crate::error::{Result, StoreError};
use crate::log::{AppendOnlyLog, LogRecord, OpenMode};

pub struct EntryLog {
    log: AppendOnlyLog,
    ids: RwLock<EntryIds>,
}

#[derive(Default)]
struct EntryIds {
    order: Vec<String>,
    seen: HashSet<String>,
}

impl EntryLog {
    /// Open (or create) an entry log and index the ids it holds.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let log = AppendOnlyLog::new(path, OpenMode::Write);
        let mut ids = EntryIds::default();
        for record in log.open().await? {
            if let Some(entry) = decode(record) {
                if ids.seen.insert(entry.id.clone()) {
                    ids.order.push(entry.id);
                }
            }
        }
        Ok(Self {
            log,
            ids: RwLock::new(ids),
        })
    }

    /// Append entries whose ids are not yet present. Returns how many were new.
    pub async fn append(&self, entries: &[LogEntry]) -> Result<usize> {
        let mut ids = self.ids.write().await;
        let mut fresh = Vec::new();
        let mut fresh_ids: Vec<&str> = Vec::new();
        let mut batch: HashSet<&str> = HashSet::new();
        for entry in entries {
            if ids.seen.contains(&entry.id) || !batch.insert(entry.id.as_str()) {
                continue;
            }
            fresh.push(encode(entry)?);
            fresh_ids.push(entry.id.as_str());
        }
        if fresh.is_empty() {
            return Ok(0);
        }
        self.log.append(fresh).await?;
        for id in &fresh_ids {
            ids.seen.insert((*id).to_owned());
            ids.order.push((*id).to_owned());
        }
        Ok(fresh_ids.len())
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.ids.read().await.seen.contains(id)
    }

    /// Ids in append order.
    pub async fn ids(&self) -> Vec<String> {
        self.ids.read().await.order.clone()
    }

    pub async fn len(&self) -> usize {
        self.ids.read().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Every entry, in append order, read back from disk.
    pub async fn entries(&self) -> Result<Vec<LogEntry>> {
        Ok(dedupe(self.log.scan().await?.into_iter().filter_map(decode)))
    }

    /// Up to `limit` entries matching `predicate`, in append order.
    pub async fn query<P>(&self, mut predicate: P, limit: usize) -> Result<Vec<LogEntry>>
    where
        P: FnMut(&LogEntry) -> bool + Send + 'static,
    {
        let records = self
            .log
            .query(
                move |record| match decode(record.clone()) {
                    Some(entry) => predicate(&entry),
                    None => false,
                },
                limit,
            )
            .await?;
        Ok(records.into_iter().filter_map(decode).collect())
    }

    /// The `n` most recently appended entries, newest first.
    ///
    /// Reads backwards from the end of the file and stops after `n` entries.
    pub async fn tail(&self, n: usize) -> Result<Vec<LogEntry>> {
        let records = self
            .log
            .reverse_query(|record| LogEntry::from_payload(&Value::Object(record.clone())).is_ok(), n)
            .await?;
        Ok(records.into_iter().filter_map(decode).collect())
    }

    pub async fn close(&self) -> Result<()> {
        self.log.close().await
    }
}

fn encode(entry: &LogEntry) -> Result<LogRecord> {
    match entry.to_payload() {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::InvalidData(format!(
            "entry payload is not an object: {}",
            other
        ))),
    }
}

fn decode(record: LogRecord) -> Option<LogEntry> {
    match LogEntry::from_payload(&Value::Object(record)) {
        Ok(entry) => Some(entry),
        Err(e) => {
            warn!(error = %e, "skipping undecodable entry record");
            None
        }
    }
}

fn dedupe(entries: impl Iterator<Item = LogEntry>) -> Vec<LogEntry> {
    let mut seen = HashSet::new();
    entries.filter(|e| seen.insert(e.id.clone())).collect()
}
