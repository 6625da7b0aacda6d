//! Ordered, mergeable state container for accumulated facts.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Default byte bound for [`Workspace::summarize`].
pub const DEFAULT_SUMMARY_BYTES: usize = 4_000;

/// Ordered mapping from symbolic keys to structured values.
///
/// Insertion order is kept for stable summaries only: equality and
/// [`Workspace::fingerprint`] ignore it. A workspace handed out by the
/// controller is never mutated in place; steps return a delta that the
/// controller folds in with [`Workspace::merge`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Workspace {
    entries: Map<String, Value>,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a workspace from `(key, value)` pairs, later pairs winning.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut ws = Self::new();
        for (key, value) in pairs {
            ws.insert(key, value);
        }
        ws
    }

    /// Set `key` to `value`. Intended for building deltas inside a step.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Key union with `delta`; on collision the delta's value wins.
    ///
    /// Keys already present keep their position, new keys are appended in the
    /// delta's order.
    pub fn merge(&self, delta: &Workspace) -> Workspace {
        let mut merged = self.clone();
        for (key, value) in &delta.entries {
            merged.entries.insert(key.clone(), value.clone());
        }
        merged
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Bounded, deterministic digest suitable for prompts.
    pub fn summarize(&self) -> String {
        self.summarize_within(DEFAULT_SUMMARY_BYTES)
    }

    /// One `key: value` line per entry (compact JSON) in insertion order,
    /// cut off once `max_bytes` would be exceeded.
    pub fn summarize_within(&self, max_bytes: usize) -> String {
        if self.entries.is_empty() {
            return "(empty)".to_string();
        }
        let mut out = String::new();
        let mut written = 0usize;
        for (key, value) in &self.entries {
            let line = format!("{key}: {value}\n");
            if out.len() + line.len() > max_bytes {
                break;
            }
            out.push_str(&line);
            written += 1;
        }
        let remaining = self.entries.len() - written;
        if remaining > 0 {
            let _ = writeln!(out, "[... {remaining} more entries]");
        }
        out.trim_end().to_string()
    }

    /// SHA-256 hex digest of the canonical (recursively key-sorted) JSON form.
    pub fn fingerprint(&self) -> String {
        let canonical: BTreeMap<&str, Value> = self
            .entries
            .iter()
            .map(|(k, v)| (k.as_str(), canonicalize(v)))
            .collect();
        let encoded = serde_json::to_vec(&canonical).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(encoded);
        hex::encode(hasher.finalize())
    }
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonicalize(v))).collect();
            let mut out = Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_is_right_biased() {
        let base = Workspace::from_pairs([("a", json!(1)), ("b", json!(2))]);
        let delta = Workspace::from_pairs([("b", json!(20)), ("c", json!(3))]);

        let merged = base.merge(&delta);

        assert_eq!(merged.get("a"), Some(&json!(1)));
        assert_eq!(merged.get("b"), Some(&json!(20)));
        assert_eq!(merged.get("c"), Some(&json!(3)));
        // Inputs are untouched.
        assert_eq!(base.get("b"), Some(&json!(2)));
        assert_eq!(base.len(), 2);
    }

    #[test]
    fn merge_is_associative_with_most_recent_writer_winning() {
        let w = Workspace::from_pairs([("x", json!("w")), ("y", json!("w"))]);
        let d1 = Workspace::from_pairs([("y", json!("d1")), ("z", json!("d1"))]);
        let d2 = Workspace::from_pairs([("z", json!("d2")), ("x", json!("d2"))]);

        let left = w.merge(&d1).merge(&d2);
        let right = w.merge(&d1.merge(&d2));

        assert_eq!(left, right);
        assert_eq!(left.get("x"), Some(&json!("d2")));
        assert_eq!(left.get("y"), Some(&json!("d1")));
        assert_eq!(left.get("z"), Some(&json!("d2")));
    }

    #[test]
    fn merge_keeps_insertion_order_of_existing_keys() {
        let base = Workspace::from_pairs([("a", json!(1)), ("b", json!(2))]);
        let delta = Workspace::from_pairs([("c", json!(3)), ("a", json!(10))]);

        let merged = base.merge(&delta);
        let keys: Vec<&str> = merged.keys().collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn summarize_is_deterministic_and_bounded() {
        let ws = Workspace::from_pairs((0..50).map(|i| (format!("key_{i}"), json!(i))));

        let first = ws.summarize_within(64);
        let second = ws.summarize_within(64);

        assert_eq!(first, second);
        assert!(first.starts_with("key_0: 0"));
        assert!(first.contains("more entries]"));
        assert!(first.len() < 64 + 32);
    }

    #[test]
    fn summarize_empty_workspace() {
        assert_eq!(Workspace::new().summarize(), "(empty)");
    }

    #[test]
    fn fingerprint_ignores_insertion_order() {
        let a = Workspace::from_pairs([("a", json!({"p": 1, "q": 2})), ("b", json!(2))]);
        let b = Workspace::from_pairs([("b", json!(2)), ("a", json!({"q": 2, "p": 1}))]);
        let c = Workspace::from_pairs([("a", json!(1))]);

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }
}
