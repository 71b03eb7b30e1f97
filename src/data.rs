//! Per-pattern auxiliary data
//!
//! Data is keyed by the template reference exactly as it is written in an
//! include or embed tag. Stored maps are immutable snapshots: a compiled
//! template keeps the map it was bound to even if the store later changes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::warn;

use crate::parser::ast::BoundData;

/// Source of auxiliary data for literal include targets
pub trait PatternDataStore: Send + Sync {
    /// Data bound to `key`, if any. An empty map still counts as present.
    fn lookup(&self, key: &str) -> Option<BoundData>;
}

/// In-memory data store
#[derive(Debug, Clone, Default)]
pub struct MemoryDataStore {
    entries: HashMap<String, BoundData>,
}

impl MemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `data` under `key`, replacing any previous entry
    pub fn insert(&mut self, key: impl Into<String>, data: Map<String, Value>) {
        self.entries.insert(key.into(), Arc::new(data));
    }

    /// Store an already shared map under an additional key
    pub fn insert_shared(&mut self, key: impl Into<String>, data: BoundData) {
        self.entries.insert(key.into(), data);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read a JSON sidecar file, returning its top-level object
    ///
    /// Unreadable files and non-object documents are skipped with a warning.
    pub fn read_sidecar(path: &Path) -> Option<Map<String, Value>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read pattern data");
                return None;
            }
        };
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => Some(map),
            Ok(_) => {
                warn!(path = %path.display(), "pattern data is not a JSON object, skipping");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "invalid pattern data JSON, skipping");
                None
            }
        }
    }
}

impl PatternDataStore for MemoryDataStore {
    fn lookup(&self, key: &str) -> Option<BoundData> {
        self.entries.get(key).cloned()
    }
}

impl<S: PatternDataStore + ?Sized> PatternDataStore for Arc<S> {
    fn lookup(&self, key: &str) -> Option<BoundData> {
        (**self).lookup(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_lookup_present_absent_and_empty() {
        let mut store = MemoryDataStore::new();
        store.insert("atoms-button", object(json!({"label": "Go"})));
        store.insert("atoms-empty", Map::new());

        assert_eq!(
            store.lookup("atoms-button").unwrap().get("label"),
            Some(&json!("Go"))
        );
        assert!(store.lookup("atoms-empty").unwrap().is_empty());
        assert!(store.lookup("atoms-missing").is_none());
    }

    #[test]
    fn test_snapshot_survives_replacement() {
        let mut store = MemoryDataStore::new();
        store.insert("k", object(json!({"v": 1})));
        let snapshot = store.lookup("k").unwrap();
        store.insert("k", object(json!({"v": 2})));
        assert_eq!(snapshot.get("v"), Some(&json!(1)));
        assert_eq!(store.lookup("k").unwrap().get("v"), Some(&json!(2)));
    }

    #[test]
    fn test_read_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("button.json");
        let bad = dir.path().join("list.json");
        std::fs::write(&good, r#"{"label": "Go"}"#).unwrap();
        std::fs::write(&bad, "[1, 2]").unwrap();

        assert_eq!(
            MemoryDataStore::read_sidecar(&good).unwrap().get("label"),
            Some(&json!("Go"))
        );
        assert!(MemoryDataStore::read_sidecar(&bad).is_none());
        assert!(MemoryDataStore::read_sidecar(&dir.path().join("none.json")).is_none());
    }
}
