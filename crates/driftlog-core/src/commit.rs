//! Values carried by the sync protocol.
//!
//! The engine treats values as opaque. All it needs is a stable string id and
//! a codec to and from the JSON payload encoding, expressed by [`SyncValue`].

use std::borrow::Borrow;
use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{CoreError, Result};

/// How a batch of values is laid out in a sync message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Raw JSON objects, sent under the `v` key.
    Object,
    /// Commits, sent under the `c` key.
    Commit,
}

/// A value that can be reconciled between peers.
pub trait SyncValue: Clone + Send + Sync + 'static {
    /// Wire layout for batches of this type.
    const KIND: ValueKind;

    /// Unique, stable id. This is what goes into Bloom filters.
    fn sync_id(&self) -> &str;

    /// Encode for a sync message.
    fn to_payload(&self) -> Value;

    /// Decode a single entry of a sync message.
    fn from_payload(payload: &Value) -> Result<Self>;
}

/// Identifier of a commit.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(String);

impl CommitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive a content-addressed id from a commit's timestamp, a nonce, and
    /// its body.
    pub fn derive(timestamp: i64, nonce: u64, body: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"driftlog-commit-v0:");
        hasher.update(&timestamp.to_le_bytes());
        hasher.update(&nonce.to_le_bytes());
        hasher.update(body);
        Self(hex::encode(&hasher.finalize().as_bytes()[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommitId({})", self.0)
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CommitId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for CommitId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CommitId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for CommitId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// An immutable, uniquely identified record with an opaque body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    id: CommitId,
    timestamp: i64,
    body: Bytes,
}

impl Commit {
    /// Create a commit stamped with the current time and a derived id.
    pub fn new(body: impl Into<Bytes>) -> Self {
        let body = body.into();
        let timestamp = now_millis();
        let nonce: u64 = rand::thread_rng().gen();
        Self {
            id: CommitId::derive(timestamp, nonce, &body),
            timestamp,
            body,
        }
    }

    /// Assemble a commit from known parts.
    pub fn from_parts(id: impl Into<CommitId>, timestamp: i64, body: impl Into<Bytes>) -> Self {
        Self {
            id: id.into(),
            timestamp,
            body: body.into(),
        }
    }

    pub fn id(&self) -> &CommitId {
        &self.id
    }

    /// Creation time, Unix milliseconds.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

#[derive(Deserialize)]
struct CommitPayload {
    id: String,
    ts: i64,
    body: String,
}

impl SyncValue for Commit {
    const KIND: ValueKind = ValueKind::Commit;

    fn sync_id(&self) -> &str {
        self.id.as_str()
    }

    fn to_payload(&self) -> Value {
        json!({
            "id": self.id.as_str(),
            "ts": self.timestamp,
            "body": BASE64.encode(&self.body),
        })
    }

    fn from_payload(payload: &Value) -> Result<Self> {
        let raw = CommitPayload::deserialize(payload)
            .map_err(|e| CoreError::InvalidPayload(e.to_string()))?;
        if raw.id.is_empty() {
            return Err(CoreError::InvalidPayload("empty commit id".into()));
        }
        let body = BASE64
            .decode(raw.body.as_bytes())
            .map_err(|e| CoreError::InvalidPayload(format!("commit body: {}", e)))?;
        Ok(Self::from_parts(raw.id, raw.ts, body))
    }
}

/// A normalized application log entry, synchronized as a raw JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub ts: i64,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl LogEntry {
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            ts: now_millis(),
            fields,
        }
    }
}

impl SyncValue for LogEntry {
    const KIND: ValueKind = ValueKind::Object;

    fn sync_id(&self) -> &str {
        &self.id
    }

    fn to_payload(&self) -> Value {
        json!({ "id": self.id, "ts": self.ts, "fields": self.fields })
    }

    fn from_payload(payload: &Value) -> Result<Self> {
        let entry = LogEntry::deserialize(payload)
            .map_err(|e| CoreError::InvalidPayload(e.to_string()))?;
        if entry.id.is_empty() {
            return Err(CoreError::InvalidPayload("empty entry id".into()));
        }
        Ok(entry)
    }
}

/// Current time in Unix milliseconds.
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
