use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{SyncError, SyncResult};

pub const DEFAULT_API_URL: &str = "http://localhost:8086/api";
pub const DEFAULT_HISTORY_LIMIT: usize = 10;
pub const DEFAULT_UNANNOTATED_THRESHOLD: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL every API path is joined onto.
    pub api_url: String,
    pub request_timeout_secs: u64,
    /// Number of past queries kept in the search history.
    pub history_limit: usize,
    /// Entities hydrated on each side of the current position.
    pub prefetch_radius: usize,
    /// Images with fewer tags than this count as unannotated.
    pub unannotated_threshold: usize,
    pub bus_capacity: usize,
    /// JSON file backing durable session state. In-memory when unset.
    pub state_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout_secs: 30,
            history_limit: DEFAULT_HISTORY_LIMIT,
            prefetch_radius: 1,
            unannotated_threshold: DEFAULT_UNANNOTATED_THRESHOLD,
            bus_capacity: 64,
            state_path: None,
        }
    }
}

impl ClientConfig {
    /// Reads a JSON config file. Missing fields take their default values.
    pub fn load(path: &Path) -> SyncResult<Self> {
        let bytes = std::fs::read(path).map_err(|error| {
            SyncError::Storage(format!(
                "failed to read config file {}: {error}",
                path.display()
            ))
        })?;
        let config: Self = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.api_url.trim().is_empty() {
            return Err(SyncError::InvalidInput("api_url must not be empty".to_string()));
        }
        if self.bus_capacity == 0 {
            return Err(SyncError::InvalidInput(
                "bus_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
