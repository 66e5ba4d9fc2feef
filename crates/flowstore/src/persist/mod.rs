//! # Persistence
//!
//! A [`PersistedState`] is everything needed to resume after a restart: the graph
//! records and the unacknowledged part of the sync queue. Undo history is not
//! persisted.
//!
//! ## Storage Backends
//!
//! [`SnapshotStore`] abstracts where the state lives:
//!
//! - [`FsSnapshotStore`]: a JSON file, written atomically (tmp file then rename).
//! - [`MemSnapshotStore`]: in memory, for tests.
//!
//! On resume, queue entries at or below `acked_watermark` are dropped, so a request
//! the backend already acknowledged is never sent again.

mod fs;
mod mem;

pub use fs::FsSnapshotStore;
pub use mem::MemSnapshotStore;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{EntityRecord, Flow, Node};
use crate::sync::QueueEntry;

pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub version: u32,
    /// Idempotency-key prefix of the queue that wrote this state.
    pub instance: String,
    pub flows: Vec<Flow>,
    pub nodes: Vec<Node>,
    pub acked_watermark: u64,
    pub next_seq: u64,
    /// Next local transaction number. Absent in older states.
    #[serde(default)]
    pub next_tx: u64,
    pub pending: Vec<QueueEntry>,
}

impl PersistedState {
    pub fn records(&self) -> Vec<EntityRecord> {
        self.flows
            .iter()
            .cloned()
            .map(EntityRecord::Flow)
            .chain(self.nodes.iter().cloned().map(EntityRecord::Node))
            .collect()
    }
}

pub trait SnapshotStore {
    /// The last saved state, `None` when nothing was saved yet.
    fn load(&self) -> Result<Option<PersistedState>>;

    /// Replaces the saved state. MUST be atomic.
    fn save(&self, state: &PersistedState) -> Result<()>;
}
