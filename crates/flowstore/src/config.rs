//! # Configuration
//!
//! Store tuning is managed by [`confique`], layering environment variables over an
//! optional TOML file over compiled defaults.
//!
//! ## Resolution Order
//!
//! 1. **Environment variables**: `FLOWSTORE_FLUSH_INTERVAL_MS`, `FLOWSTORE_SYNC_MAX_ATTEMPTS`, ...
//! 2. **Config file**: `flowstore.toml`, when a path is given to [`FlowConfig::load`].
//! 3. **Compiled defaults**: `#[config(default = ...)]`.
//!
//! ## Available Settings
//!
//! | Key | Default | Description |
//! |-----|---------|-------------|
//! | `flush_interval_ms` | `500` | Window in which consecutive text edits on one node coalesce |
//! | `undo_limit` | `200` | Maximum transactions kept on the undo stack |
//! | `sync.max_attempts` | `5` | Transmissions before an entry is reported as failed |
//! | `sync.base_backoff_ms` | `250` | Delay after the first failure, doubled per attempt |
//! | `sync.max_backoff_ms` | `30000` | Upper bound on the retry delay |

use confique::Config;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;

/// Configuration for the store, stored in `flowstore.toml`.
#[derive(Config, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FlowConfig {
    /// Consecutive text edits on the same node closer than this merge into one
    /// undo step.
    #[config(default = 500, env = "FLOWSTORE_FLUSH_INTERVAL_MS")]
    pub flush_interval_ms: u64,

    /// Undo history depth. Older transactions are dropped.
    #[config(default = 200, env = "FLOWSTORE_UNDO_LIMIT")]
    pub undo_limit: usize,

    #[config(nested)]
    pub sync: SyncConfig,
}

#[derive(Config, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    #[config(default = 5, env = "FLOWSTORE_SYNC_MAX_ATTEMPTS")]
    pub max_attempts: u32,

    #[config(default = 250, env = "FLOWSTORE_SYNC_BASE_BACKOFF_MS")]
    pub base_backoff_ms: u64,

    #[config(default = 30000, env = "FLOWSTORE_SYNC_MAX_BACKOFF_MS")]
    pub max_backoff_ms: u64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 500,
            undo_limit: 200,
            sync: SyncConfig::default(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff_ms: 250,
            max_backoff_ms: 30000,
        }
    }
}

impl FlowConfig {
    /// Loads from the environment, then `file` if given and present, then defaults.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = FlowConfig::builder().env();
        if let Some(path) = file {
            builder = builder.file(path);
        }
        Ok(builder.load()?)
    }

    pub fn flush_interval(&self) -> chrono::Duration {
        millis(self.flush_interval_ms)
    }
}

/// Milliseconds as a duration, saturating at the largest representable one.
pub(crate) fn millis(ms: u64) -> chrono::Duration {
    i64::try_from(ms)
        .ok()
        .and_then(chrono::Duration::try_milliseconds)
        .unwrap_or(chrono::Duration::MAX)
}
