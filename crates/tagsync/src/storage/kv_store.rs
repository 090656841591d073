//! Generic key-value store trait and in-memory implementation.

use std::collections::HashMap;

use crate::error::SyncResult;

/// Durable key-value state. Values are JSON documents.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Option<serde_json::Value>;
    fn set(&mut self, key: &str, value: serde_json::Value) -> SyncResult<()>;
}

// --- Memory Implementation ---

#[derive(Debug, Default)]
pub struct MemoryKvStore {
    data: HashMap<String, serde_json::Value>,
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.data.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: serde_json::Value) -> SyncResult<()> {
        self.data.insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_missing_returns_none() {
        let kv = MemoryKvStore::default();
        assert!(kv.get("currentSearchQueryText").is_none());
    }

    #[test]
    fn set_and_get() {
        let mut kv = MemoryKvStore::default();
        kv.set("searchHistory", json!(["cat"])).expect("set");
        assert_eq!(kv.get("searchHistory"), Some(json!(["cat"])));
    }

    #[test]
    fn set_replaces_previous_value() {
        let mut kv = MemoryKvStore::default();
        kv.set("currentSearchQueryText", json!("cat")).expect("set");
        kv.set("currentSearchQueryText", json!("dog")).expect("set");
        assert_eq!(kv.get("currentSearchQueryText"), Some(json!("dog")));
    }
}
