use std::cell::RefCell;
use std::io;

use super::{PersistedState, SnapshotStore};
use crate::error::{FlowError, Result};

/// In-memory snapshot store for testing.
///
/// The state is kept serialized, so a save/load cycle goes through the same
/// encoding as the file store.
#[derive(Default)]
pub struct MemSnapshotStore {
    saved: RefCell<Option<String>>,
    simulate_write_error: RefCell<bool>,
}

impl MemSnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable write error simulation for testing error handling.
    pub fn set_simulate_write_error(&self, simulate: bool) {
        *self.simulate_write_error.borrow_mut() = simulate;
    }

    pub fn is_saved(&self) -> bool {
        self.saved.borrow().is_some()
    }
}

impl SnapshotStore for MemSnapshotStore {
    fn load(&self) -> Result<Option<PersistedState>> {
        match self.saved.borrow().as_deref() {
            Some(json) => Ok(Some(serde_json::from_str(json)?)),
            None => Ok(None),
        }
    }

    fn save(&self, state: &PersistedState) -> Result<()> {
        if *self.simulate_write_error.borrow() {
            return Err(FlowError::Io(io::Error::other("simulated write error")));
        }
        let json = serde_json::to_string(state)?;
        *self.saved.borrow_mut() = Some(json);
        Ok(())
    }
}
