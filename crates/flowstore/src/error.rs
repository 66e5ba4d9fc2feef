use crate::model::{EntityId, FlowId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Invalid parent: {0}")]
    InvalidParent(String),

    #[error("Unsupported node type: {0}")]
    UnsupportedType(String),

    #[error("Cycle detected: flow {flow} cannot be placed under {target}")]
    CycleDetected { flow: FlowId, target: FlowId },

    #[error("Editor is read-only")]
    ReadOnlyViolation,

    #[error("Entity already exists: {0}")]
    AlreadyExists(EntityId),

    #[error("Entity not found: {0}")]
    NotFound(EntityId),

    #[error("Entity is not trashed: {0}")]
    NotTrashed(EntityId),

    #[error("Entity is trashed: {0}")]
    Trashed(EntityId),

    #[error("Invalid edit: {0}")]
    InvalidEdit(String),

    #[error("Sync failed for entry {seq}: {reason}")]
    SyncFailed { seq: u64, reason: String },

    #[error("Unsupported state version: {0}")]
    UnsupportedVersion(u32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] confique::Error),
}

pub type Result<T> = std::result::Result<T, FlowError>;
