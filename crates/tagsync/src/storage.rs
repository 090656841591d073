pub mod file;
pub mod kv_store;

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::ClientConfig;
use crate::error::SyncResult;
use crate::types::ImageId;

pub use file::FileKvStore;
pub use kv_store::{KvStore, MemoryKvStore};

pub const QUERY_TEXT_KEY: &str = "currentSearchQueryText";
pub const HISTORY_KEY: &str = "searchHistory";
pub const POSITIONS_KEY: &str = "currentEntityIdForQuery";

/// Typed access to the durable search session state.
pub struct SessionStore {
    kv: Mutex<Box<dyn KvStore>>,
}

impl SessionStore {
    pub fn new(kv: Box<dyn KvStore>) -> Self {
        Self { kv: Mutex::new(kv) }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryKvStore::default()))
    }

    /// File-backed when the config names a state file, in-memory otherwise.
    pub fn from_config(config: &ClientConfig) -> SyncResult<Self> {
        match &config.state_path {
            Some(path) => Ok(Self::new(Box::new(FileKvStore::open(path.clone())?))),
            None => Ok(Self::in_memory()),
        }
    }

    pub fn query_text(&self) -> Option<String> {
        self.read(QUERY_TEXT_KEY)
    }

    pub fn history(&self) -> Vec<String> {
        self.read(HISTORY_KEY).unwrap_or_default()
    }

    /// Persists the query text and history together.
    pub fn save_query(&self, text: &str, history: &[String]) -> SyncResult<()> {
        let mut kv = self.kv.lock();
        kv.set(QUERY_TEXT_KEY, Value::String(text.to_string()))?;
        kv.set(HISTORY_KEY, serde_json::to_value(history)?)
    }

    pub fn positions(&self) -> HashMap<String, ImageId> {
        self.read(POSITIONS_KEY).unwrap_or_default()
    }

    /// Last viewed entity for this exact query text.
    pub fn position_for(&self, query_text: &str) -> Option<ImageId> {
        self.positions().get(query_text).copied()
    }

    pub fn remember_position(&self, query_text: &str, image_id: ImageId) -> SyncResult<()> {
        let mut kv = self.kv.lock();
        let mut positions: HashMap<String, ImageId> = kv
            .get(POSITIONS_KEY)
            .and_then(|value| decode_value(POSITIONS_KEY, value))
            .unwrap_or_default();
        positions.insert(query_text.to_string(), image_id);
        kv.set(POSITIONS_KEY, serde_json::to_value(positions)?)
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.kv.lock().get(key)?;
        decode_value(key, value)
    }
}

fn decode_value<T: DeserializeOwned>(key: &str, value: Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(decoded) => Some(decoded),
        Err(error) => {
            tracing::warn!(key, %error, "ignoring corrupt stored value");
            None
        }
    }
}
