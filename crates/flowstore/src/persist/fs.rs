use directories::ProjectDirs;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use super::{PersistedState, SnapshotStore};
use crate::error::{FlowError, Result};

const STATE_FILE: &str = "state.json";

/// Stores the state as `state.json` under a directory.
pub struct FsSnapshotStore {
    root: PathBuf,
}

impl FsSnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The platform data directory for flowstore.
    pub fn default_location() -> Result<Self> {
        let dirs = ProjectDirs::from("com", "flowstore", "flowstore").ok_or_else(|| {
            FlowError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                "Could not determine data dir",
            ))
        })?;
        Ok(Self::new(dirs.data_dir()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state_path(&self) -> PathBuf {
        self.root.join(STATE_FILE)
    }

    fn ensure_dir(&self) -> Result<()> {
        if !self.root.exists() {
            fs::create_dir_all(&self.root).map_err(FlowError::Io)?;
        }
        Ok(())
    }
}

impl SnapshotStore for FsSnapshotStore {
    fn load(&self) -> Result<Option<PersistedState>> {
        let path = self.state_path();
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(FlowError::Io)?;
        let state: PersistedState =
            serde_json::from_str(&content).map_err(FlowError::Serialization)?;
        debug!(path = %path.display(), pending = state.pending.len(), "loaded state");
        Ok(Some(state))
    }

    fn save(&self, state: &PersistedState) -> Result<()> {
        self.ensure_dir()?;
        let content = serde_json::to_string_pretty(state).map_err(FlowError::Serialization)?;

        // Atomic write
        let tmp_file = self.root.join(format!(".state-{}.tmp", Uuid::new_v4()));
        fs::write(&tmp_file, content).map_err(FlowError::Io)?;
        fs::rename(&tmp_file, self.state_path()).map_err(FlowError::Io)?;

        debug!(root = %self.root.display(), "saved state");
        Ok(())
    }
}
