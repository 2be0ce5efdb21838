use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::Result;
use crate::models::Level;

/// A value as held by the same-day store. List items are kept as text;
/// anything that is neither a list nor a string lands in `Other`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredValue {
    List(Vec<String>),
    Text(String),
    Other(Value),
}

impl From<Value> for StoredValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(items) => StoredValue::List(
                items
                    .into_iter()
                    .map(|item| match item {
                        Value::String(text) => text,
                        other => other.to_string(),
                    })
                    .collect(),
            ),
            Value::String(text) => StoredValue::Text(text),
            other => StoredValue::Other(other),
        }
    }
}

impl<'de> Deserialize<'de> for StoredValue {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Value::deserialize(deserializer).map(StoredValue::from)
    }
}

/// Implementations report connection and timeout failures as
/// `ReportError::Store`; a missing key is `Ok(None)`.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>>;
    async fn get(&self, key: &str) -> Result<Option<StoredValue>>;
}

/// Same-day attendance is split into one key space per education level.
pub trait PartitionedStore: Send + Sync {
    fn partition(&self, level: Level) -> &dyn KeyValueStore;
}

/// `*` matches any run of characters; everything else is literal.
pub fn glob_matches(pattern: &str, key: &str) -> bool {
    let mut parts = pattern.split('*');
    let Some(first) = parts.next() else {
        return key.is_empty();
    };
    let Some(mut rest) = key.strip_prefix(first) else {
        return false;
    };

    let tail: Vec<&str> = parts.collect();
    let Some((last, middle)) = tail.split_last() else {
        return rest.is_empty();
    };
    for piece in middle {
        match rest.find(piece) {
            Some(index) => rest = &rest[index + piece.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}

/// In-memory key space, loaded from a JSON dump.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct MemoryStore {
    entries: BTreeMap<String, StoredValue>,
}

impl MemoryStore {
    #[cfg(test)]
    pub fn insert(&mut self, key: impl Into<String>, value: StoredValue) {
        self.entries.insert(key.into(), value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .keys()
            .filter(|key| glob_matches(pattern, key))
            .cloned()
            .collect())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredValue>> {
        Ok(self.entries.get(key).cloned())
    }
}

/// Both level partitions as dumped to a snapshot file:
/// `{"primary": {key: value, ...}, "secondary": {...}}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SnapshotStore {
    #[serde(default)]
    pub primary: MemoryStore,
    #[serde(default)]
    pub secondary: MemoryStore,
}

impl SnapshotStore {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read snapshot {}", path.display()))?;
        let store: SnapshotStore = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse snapshot {}", path.display()))?;
        tracing::debug!(
            primary = store.primary.len(),
            secondary = store.secondary.len(),
            "Loaded key-value snapshot"
        );
        Ok(store)
    }
}

impl PartitionedStore for SnapshotStore {
    fn partition(&self, level: Level) -> &dyn KeyValueStore {
        match level {
            Level::Primary => &self.primary,
            Level::Secondary => &self.secondary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn glob_patterns() {
        assert!(glob_matches("*", "anything"));
        assert!(glob_matches("*", ""));
        assert!(glob_matches("2025-08-29:*", "2025-08-29:E:E:P:3:A:1"));
        assert!(!glob_matches("2025-08-29:*", "2025-08-30:E:E:P:3:A:1"));
        assert!(glob_matches("*:P:*", "2025-08-29:E:E:P:3:A:1"));
        assert!(glob_matches("exact", "exact"));
        assert!(!glob_matches("exact", "exactly"));
        assert!(glob_matches("a*b*c", "aXbYc"));
        assert!(!glob_matches("ab*ba", "aba"));
    }

    #[tokio::test]
    async fn memory_store_scans_and_reads() {
        let mut store = MemoryStore::default();
        store.insert("2025-08-29:E:E:P:3:A:1", StoredValue::List(vec!["120".into()]));
        store.insert("2025-08-28:E:E:P:3:A:1", StoredValue::Text("oops".into()));

        let keys = store.keys_matching("2025-08-29:*").await.unwrap();
        assert_eq!(keys, vec!["2025-08-29:E:E:P:3:A:1".to_string()]);
        assert_eq!(
            store.get("2025-08-28:E:E:P:3:A:1").await.unwrap(),
            Some(StoredValue::Text("oops".into()))
        );
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[test]
    fn snapshot_loads_both_partitions() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"primary": {{"2025-08-29:E:E:P:3:A:1": ["120"]}},
                "secondary": {{"2025-08-29:S:E:S:1:B:2": "text"}}}}"#
        )
        .unwrap();

        let store = SnapshotStore::load(file.path()).unwrap();
        assert_eq!(store.primary.len(), 1);
        assert_eq!(store.secondary.len(), 1);
    }

    #[test]
    fn list_items_and_odd_values_are_kept_per_key() {
        let value: BTreeMap<String, StoredValue> = serde_json::from_str(
            r#"{"a": ["120"], "b": [90, "x"], "c": 42, "d": null, "e": {"k": 1}, "f": [null]}"#,
        )
        .unwrap();

        assert_eq!(value["a"], StoredValue::List(vec!["120".into()]));
        assert_eq!(value["b"], StoredValue::List(vec!["90".into(), "x".into()]));
        assert_eq!(value["c"], StoredValue::Other(serde_json::json!(42)));
        assert_eq!(value["d"], StoredValue::Other(Value::Null));
        assert!(matches!(value["e"], StoredValue::Other(_)));
        assert_eq!(value["f"], StoredValue::List(vec!["null".into()]));
    }

    #[tokio::test]
    async fn snapshot_with_mixed_values_still_decodes_good_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"primary": {{
                "2025-08-29:E:E:P:3:A:1": ["120"],
                "2025-08-29:E:E:P:3:A:2": [90],
                "2025-08-29:E:E:P:3:A:3": 42,
                "2025-08-29:E:E:P:3:A:4": null,
                "2025-08-29:E:E:P:3:A:5": ["9.5"]
            }}}}"#
        )
        .unwrap();

        let store = SnapshotStore::load(file.path()).unwrap();
        let date = chrono::NaiveDate::from_ymd_opt(2025, 8, 29).unwrap();
        let result = crate::live::decode_current_day(&store, Level::Primary, 3, date, 4).await;

        assert!(!result.degraded);
        assert_eq!(result.students.len(), 2);
        assert_eq!(result.students["1"].check_in.unwrap().offset_seconds, Some(120));
        assert_eq!(result.students["2"].check_in.unwrap().offset_seconds, Some(90));
        assert_eq!(result.skipped.invalid_values, 3);
    }

    #[test]
    fn snapshot_rejects_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(SnapshotStore::load(file.path()).is_err());
    }
}
