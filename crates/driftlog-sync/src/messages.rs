//! Sync protocol messages.
//!
//! The protocol is stateless and symmetric. Each round, a peer scans its local
//! collection once, records every id in a fresh Bloom filter, and sends the
//! filter along with every value the other side's last filter proves missing
//! (Bloom filters have no false negatives). The other side answers with the
//! same shape. Seeds are random per filter, so a value hidden by a false
//! positive in one round is very likely exposed in the next.
//!
//! ## Accuracy
//!
//! Filter accuracy is the cost/latency knob. With `N` the larger collection
//! size and `C` the number of rounds we expect to run, we target
//! `2 * log_fpr(N) = C`, i.e. `fpr = 1 / N^(1 / (0.5 * C))`, capped at 0.5.
//! Fewer rounds means a more accurate, larger filter.
//!
//! ## Wire format
//!
//! ```text
//! { "ver": 1,
//!   "f":   { "d": "<base64 bits>", "s": [seed, ...] },
//!   "s":   <sender collection size>,
//!   "c":   [<commit>, ...]        // or "v": [<object>, ...]
//!   "ad":  ["<denied id>", ...] }  // optional
//! ```

use driftlog_core::{BloomFilter, BufferPool, EncodedBloomFilter, SyncValue, ValueKind, MAX_FPR};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::Result;

/// Current protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Filter false-positive rate for a round.
///
/// `low_accuracy` pins the rate at 0.5, the cheapest useful filter.
pub fn target_fpr(local_size: usize, peer_size: usize, expected_cycles: usize, low_accuracy: bool) -> f64 {
    if low_accuracy {
        return MAX_FPR;
    }
    let n = local_size.max(peer_size).max(1) as f64;
    let c = expected_cycles.max(1) as f64;
    MAX_FPR.min(1.0 / n.powf(1.0 / (0.5 * c)))
}

/// Rounds needed for two collections of at most `max_entries` to converge at
/// the given false-positive rate. Inverse of [`target_fpr`].
pub fn expected_cycles(fpr: f64, max_entries: usize) -> usize {
    if max_entries <= 1 || fpr <= 0.0 || fpr >= 1.0 {
        return 0;
    }
    ((2.0 * (max_entries as f64).ln()) / (1.0 / fpr).ln()).ceil() as usize
}

/// True if no peer filter is known yet, or any local id is absent from it.
pub fn needs_replication<'a, I>(peer_filter: Option<&BloomFilter>, local_ids: I) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    match peer_filter {
        None => true,
        Some(filter) => local_ids.into_iter().any(|id| !filter.has(id)),
    }
}

/// Serialized form of a [`SyncMessage`], independent of the value type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub ver: u32,
    pub f: EncodedBloomFilter,
    pub s: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub c: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ad: Vec<String>,
}

impl WireMessage {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// One entry of a batched request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub storage: String,
    pub id: String,
    pub msg: WireMessage,
}

/// One entry of a batched response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub storage: String,
    pub id: String,
    pub res: WireMessage,
}

/// Inputs to [`SyncMessage::build`].
#[derive(Debug, Clone, Copy)]
pub struct BuildParams<'a> {
    /// Most recent filter received from the peer, if any.
    pub peer_filter: Option<&'a BloomFilter>,
    /// Local collection size, used for sizing before the scan recounts it.
    pub local_size: usize,
    /// Peer collection size from its last message.
    pub peer_size: usize,
    /// Rounds we expect to run within the sync window.
    pub expected_cycles: usize,
    /// Queue values the peer filter proves missing.
    pub include_missing: bool,
    /// Use the cheapest filter regardless of sizes.
    pub low_accuracy: bool,
}

impl Default for BuildParams<'_> {
    fn default() -> Self {
        Self {
            peer_filter: None,
            local_size: 0,
            peer_size: 0,
            expected_cycles: 1,
            include_missing: true,
            low_accuracy: false,
        }
    }
}

/// One message of the sync protocol. Built, sent once, dropped.
#[derive(Debug, Clone)]
pub struct SyncMessage<T> {
    build_version: u32,
    filter: BloomFilter,
    size: usize,
    values: Vec<T>,
    access_denied: Vec<String>,
}

impl<T: SyncValue> SyncMessage<T> {
    pub fn new(filter: BloomFilter, size: usize, values: Vec<T>) -> Self {
        Self {
            build_version: PROTOCOL_VERSION,
            filter,
            size,
            values,
            access_denied: Vec::new(),
        }
    }

    /// Build this side's message for one round.
    ///
    /// Every local value goes into a fresh filter. If a peer filter is known
    /// and `include_missing` is set, values absent from it are attached.
    pub fn build<I>(params: BuildParams<'_>, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
    {
        let (n, fpr) = sizing(&params);
        Self::scan(params, BloomFilter::new(n, fpr), values)
    }

    /// Like [`build`](Self::build), drawing the filter buffer from `pool`.
    pub fn build_in<I>(params: BuildParams<'_>, values: I, pool: &mut BufferPool) -> Self
    where
        I: IntoIterator<Item = T>,
    {
        let (n, fpr) = sizing(&params);
        Self::scan(params, BloomFilter::from_pool(n, fpr, pool), values)
    }

    fn scan<I>(params: BuildParams<'_>, mut filter: BloomFilter, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
    {
        let send_missing = params.include_missing;
        let mut size = 0;
        let mut missing = Vec::new();
        for value in values {
            let id = value.sync_id();
            filter.add(id);
            size += 1;
            if send_missing {
                if let Some(peer) = params.peer_filter {
                    if !peer.has(id) {
                        missing.push(value);
                    }
                }
            }
        }
        Self::new(filter, size, missing)
    }

    pub fn with_access_denied(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        self.access_denied = ids.into_iter().collect();
        self
    }

    pub fn with_build_version(mut self, version: u32) -> Self {
        self.build_version = version;
        self
    }

    pub fn build_version(&self) -> u32 {
        self.build_version
    }

    /// Filter of every id the sender held when building the message.
    pub fn filter(&self) -> &BloomFilter {
        &self.filter
    }

    /// Sender's collection size.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Values the sender believes the receiver is missing.
    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn access_denied(&self) -> &[String] {
        &self.access_denied
    }

    /// Split into filter, size and values.
    pub fn into_parts(self) -> (BloomFilter, usize, Vec<T>) {
        (self.filter, self.size, self.values)
    }

    pub fn to_wire(&self) -> WireMessage {
        let payloads = || self.values.iter().map(SyncValue::to_payload).collect::<Vec<_>>();
        let (c, v) = match T::KIND {
            ValueKind::Commit => (Some(payloads()), None),
            ValueKind::Object => (None, Some(payloads())),
        };
        WireMessage {
            ver: self.build_version,
            f: self.filter.encode(),
            s: self.size as u64,
            c,
            v,
            ad: self.access_denied.clone(),
        }
    }

    /// Restore a message. A malformed filter fails the whole message;
    /// individual values that do not decode are skipped.
    pub fn from_wire(wire: &WireMessage) -> Result<Self> {
        let filter = BloomFilter::decode(&wire.f)?;
        let entries = match (&wire.c, &wire.v) {
            (Some(c), _) => c.as_slice(),
            (None, Some(v)) => v.as_slice(),
            (None, None) => &[],
        };
        let mut values = Vec::with_capacity(entries.len());
        let mut skipped = 0usize;
        for entry in entries {
            match T::from_payload(entry) {
                Ok(value) => values.push(value),
                Err(e) => {
                    skipped += 1;
                    debug!(error = %e, "skipping undecodable sync value");
                }
            }
        }
        if skipped > 0 {
            debug!(skipped, kept = values.len(), "decoded sync message with bad entries");
        }
        Ok(Self {
            build_version: wire.ver,
            filter,
            size: usize::try_from(wire.s).unwrap_or(usize::MAX),
            values,
            access_denied: wire.ad.clone(),
        })
    }

    pub fn encode(&self) -> Result<String> {
        self.to_wire().to_json()
    }

    pub fn decode(text: &str) -> Result<Self> {
        Self::from_wire(&WireMessage::from_json(text)?)
    }
}

fn sizing(params: &BuildParams<'_>) -> (usize, f64) {
    let n = params.local_size.max(params.peer_size).max(1);
    let fpr = target_fpr(
        params.local_size,
        params.peer_size,
        params.expected_cycles,
        params.low_accuracy,
    );
    (n, fpr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use driftlog_core::{Commit, LogEntry};
    use serde_json::{json, Map};

    fn commits(prefix: &str, n: usize) -> Vec<Commit> {
        (0..n)
            .map(|i| Commit::from_parts(format!("{}-{}", prefix, i), i as i64, vec![i as u8]))
            .collect()
    }

    fn filter_of(values: &[Commit]) -> BloomFilter {
        let mut f = BloomFilter::new(values.len().max(1), 0.001);
        for c in values {
            f.add(c.sync_id());
        }
        f
    }

    #[test]
    fn test_target_fpr() {
        assert_eq!(target_fpr(0, 0, 2, false), 0.5);
        assert_eq!(target_fpr(5000, 0, 2, true), 0.5);
        // C = 2: fpr = 1 / N
        assert!((target_fpr(100, 10, 2, false) - 0.01).abs() < 1e-12);
        assert!((target_fpr(10, 100, 2, false) - 0.01).abs() < 1e-12);
        // C = 1: fpr = 1 / N^2
        assert!((target_fpr(100, 0, 1, false) - 1e-4).abs() < 1e-12);
        // C = 0 behaves like 1.
        assert_eq!(target_fpr(100, 0, 0, false), target_fpr(100, 0, 1, false));
        // More cycles, cheaper filter.
        assert!(target_fpr(1000, 0, 8, false) > target_fpr(1000, 0, 4, false));
    }

    #[test]
    fn test_expected_cycles() {
        assert_eq!(expected_cycles(0.4, 100), 11);
        assert_eq!(expected_cycles(0.44, 1000), 17);
        assert_eq!(expected_cycles(0.04, 1000), 5);
        assert_eq!(expected_cycles(0.4, 0), 0);
    }

    #[test]
    fn test_build_without_peer_filter() {
        let local = commits("a", 20);
        let msg = SyncMessage::build(
            BuildParams {
                local_size: local.len(),
                ..Default::default()
            },
            local.clone(),
        );

        assert_eq!(msg.size(), 20);
        assert!(msg.values().is_empty());
        for c in &local {
            assert!(msg.filter().has(c.sync_id()));
        }
    }

    #[test]
    fn test_build_sends_missing() {
        let shared = commits("shared", 30);
        let extra = commits("extra", 5);
        let peer = filter_of(&shared);
        let mut local = shared.clone();
        local.extend(extra.iter().cloned());

        let msg = SyncMessage::build(
            BuildParams {
                peer_filter: Some(&peer),
                local_size: 0,
                peer_size: shared.len(),
                expected_cycles: 2,
                ..Default::default()
            },
            local,
        );

        // The scan recounts the local size.
        assert_eq!(msg.size(), 35);
        // Every missing value is sent (no false negatives).
        for c in &extra {
            assert!(msg.values().iter().any(|v| v.id() == c.id()));
        }
        // Shared ones are never sent: no false negatives in the peer filter.
        assert!(msg
            .values()
            .iter()
            .all(|v| !peer.has(v.sync_id())));
    }

    #[test]
    fn test_build_include_missing_off() {
        let local = commits("a", 10);
        let peer = BloomFilter::new(1, 0.01);
        let msg = SyncMessage::build(
            BuildParams {
                peer_filter: Some(&peer),
                include_missing: false,
                ..Default::default()
            },
            local.clone(),
        );
        assert!(msg.values().is_empty());
        assert_eq!(msg.size(), 10);
        assert!(msg.filter().has(local[3].sync_id()));
    }

    #[test]
    fn test_build_in_pool() {
        let mut pool = BufferPool::new();
        pool.release(vec![0xff; 4096]);
        let local = commits("p", 10);
        let msg = SyncMessage::build_in(BuildParams::default(), local.clone(), &mut pool);
        assert_eq!(pool.idle(), 0);
        // The recycled buffer was zeroed before the scan.
        let (filter, size, _) = msg.into_parts();
        assert_eq!(size, 10);
        assert!(filter.fill_rate() < 0.9);
        filter.reuse(&mut pool);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_wire_shape_commits() {
        let local = commits("w", 3);
        let peer = BloomFilter::new(1, 0.01);
        let msg = SyncMessage::build(
            BuildParams {
                peer_filter: Some(&peer),
                ..Default::default()
            },
            local,
        )
        .with_access_denied(vec!["secret".to_string()]);

        let json: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(json["ver"], PROTOCOL_VERSION);
        assert_eq!(json["s"], 3);
        assert!(json["f"]["d"].is_string());
        assert!(json["f"]["s"].is_array());
        assert_eq!(json["c"].as_array().unwrap().len(), 3);
        assert!(json.get("v").is_none());
        assert_eq!(json["ad"], json!(["secret"]));
    }

    #[test]
    fn test_wire_shape_objects() {
        let entry = LogEntry::new("e1", Map::new());
        let msg = SyncMessage::new(BloomFilter::new(1, 0.5), 1, vec![entry.clone()]);
        let json: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert!(json.get("c").is_none());
        assert!(json.get("ad").is_none());
        assert_eq!(json["v"][0]["id"], "e1");

        let decoded = SyncMessage::<LogEntry>::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded.values(), &[entry]);
    }

    #[test]
    fn test_decode_restores_filter() {
        let local = commits("r", 50);
        let msg = SyncMessage::build(BuildParams::default(), local.clone());
        let decoded = SyncMessage::<Commit>::decode(&msg.encode().unwrap()).unwrap();

        assert_eq!(decoded.size(), 50);
        assert_eq!(decoded.build_version(), PROTOCOL_VERSION);
        assert_eq!(decoded.filter().seeds(), msg.filter().seeds());
        assert_eq!(decoded.filter().fill_rate(), msg.filter().fill_rate());
        for c in &local {
            assert!(decoded.filter().has(c.sync_id()));
        }
    }

    #[test]
    fn test_decode_skips_bad_entries() {
        let good = Commit::from_parts("good", 1, &b"x"[..]);
        let mut wire = SyncMessage::new(BloomFilter::new(1, 0.5), 2, vec![good.clone()]).to_wire();
        wire.c
            .as_mut()
            .unwrap()
            .extend([json!({"id": 7}), json!("garbage"), json!({"id": "x", "ts": 1, "body": "@@"})]);

        let decoded = SyncMessage::<Commit>::from_wire(&wire).unwrap();
        assert_eq!(decoded.values(), &[good]);
    }

    #[test]
    fn test_decode_rejects_bad_filter() {
        let mut wire = SyncMessage::<Commit>::new(BloomFilter::new(1, 0.5), 0, vec![]).to_wire();
        wire.f.s.clear();
        let err = SyncMessage::<Commit>::from_wire(&wire).unwrap_err();
        assert!(matches!(err, SyncError::Core(_)));
        assert!(!err.is_retryable());

        let err = SyncMessage::<Commit>::decode("{\"ver\":1}").unwrap_err();
        assert!(matches!(err, SyncError::InvalidMessage(_)));
    }

    #[test]
    fn test_needs_replication() {
        let local = commits("n", 10);
        let ids = || local.iter().map(|c| c.sync_id());

        assert!(needs_replication(None, ids()));
        assert!(!needs_replication(Some(&filter_of(&local)), ids()));
        assert!(needs_replication(Some(&filter_of(&local[..5])), ids()));
        let empty: Vec<&str> = Vec::new();
        assert!(!needs_replication(Some(&filter_of(&[])), empty));
    }

    proptest::proptest! {
        #[test]
        fn sends_exactly_what_peer_filter_lacks(
            local_ids in proptest::collection::hash_set("[a-z0-9]{1,10}", 0..60),
            peer_ids in proptest::collection::hash_set("[a-z0-9]{1,10}", 0..60),
            fpr in 0.01f64..=0.5,
        ) {
            let mut peer = BloomFilter::new(peer_ids.len(), fpr);
            peer.extend(peer_ids.iter());
            let local: Vec<Commit> = local_ids
                .iter()
                .map(|id| Commit::from_parts(id.as_str(), 0, Vec::new()))
                .collect();

            let msg = SyncMessage::build(
                BuildParams {
                    peer_filter: Some(&peer),
                    local_size: local.len(),
                    peer_size: peer_ids.len(),
                    ..Default::default()
                },
                local.clone(),
            );

            let expected: Vec<&str> = local
                .iter()
                .map(|c| c.sync_id())
                .filter(|id| !peer.has(id))
                .collect();
            let sent: Vec<&str> = msg.values().iter().map(|c| c.sync_id()).collect();
            proptest::prop_assert_eq!(sent, expected);
            for id in &peer_ids {
                proptest::prop_assert!(!msg.values().iter().any(|c| c.sync_id() == id.as_str()));
            }
            for id in &local_ids {
                proptest::prop_assert!(msg.filter().has(id));
            }
        }

        #[test]
        fn fpr_stays_in_range(local in 0usize..1_000_000, peer in 0usize..1_000_000, cycles in 0usize..64) {
            let fpr = target_fpr(local, peer, cycles, false);
            proptest::prop_assert!(fpr > 0.0 && fpr <= MAX_FPR);
        }
    }
}
