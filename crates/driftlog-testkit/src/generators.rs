//! Proptest generators for property-based testing.

use std::collections::HashSet;

use driftlog_core::{Commit, CommitId, LogEntry};
use proptest::prelude::*;
use serde_json::{Map, Value};

/// A sync id: short lowercase alphanumeric, like generated record ids.
pub fn sync_id() -> impl Strategy<Value = String> {
    "[a-z0-9]{1,16}".prop_map(String::from)
}

/// A set of up to `max` distinct ids.
pub fn id_set(max: usize) -> impl Strategy<Value = HashSet<String>> {
    prop::collection::hash_set(sync_id(), 0..=max)
}

/// Two id sets that share some ids and each hold some of their own.
pub fn overlapping_sets(max: usize) -> impl Strategy<Value = (HashSet<String>, HashSet<String>)> {
    (id_set(max), id_set(max), id_set(max)).prop_map(|(shared, left, right)| {
        let a = shared.union(&left).cloned().collect();
        let b = shared.union(&right).cloned().collect();
        (a, b)
    })
}

/// A false-positive rate in the range filters are built with.
pub fn fpr() -> impl Strategy<Value = f64> {
    0.001f64..=0.5
}

/// Generate a reasonable timestamp.
pub fn timestamp() -> impl Strategy<Value = i64> {
    0i64..=i64::MAX / 2
}

/// Generate body bytes of at most `max_len`.
pub fn body(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// A commit with an arbitrary id, timestamp and body.
pub fn commit() -> impl Strategy<Value = Commit> {
    (sync_id(), timestamp(), body(256))
        .prop_map(|(id, ts, body)| Commit::from_parts(CommitId::new(id), ts, body))
}

fn field_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::from),
        any::<i32>().prop_map(Value::from),
        "[ -~]{0,32}".prop_map(Value::from),
    ]
}

/// A log entry with a few scalar fields.
pub fn log_entry() -> impl Strategy<Value = LogEntry> {
    (
        sync_id(),
        prop::collection::btree_map("[a-z]{1,8}", field_value(), 0..6),
    )
        .prop_map(|(id, fields)| {
            let fields: Map<String, Value> = fields.into_iter().collect();
            LogEntry::new(id, fields)
        })
}
