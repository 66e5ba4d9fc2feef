use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

use crate::graph::Mutation;
use crate::model::{EntityId, RecordImage};

/// Why a request exists relative to the local history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Undo,
    Redo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiAction {
    Create,
    Update,
    Delete,
}

impl ApiAction {
    /// The action that takes the backend from `before` to `after` for one record.
    pub fn between(before: Option<&RecordImage>, after: Option<&RecordImage>) -> ApiAction {
        let existed = before.map(|i| i.record.is_some()).unwrap_or(false);
        let exists = after.map(|i| i.record.is_some()).unwrap_or(false);
        match (existed, exists) {
            (false, true) => ApiAction::Create,
            (true, false) => ApiAction::Delete,
            _ => ApiAction::Update,
        }
    }
}

/// One unit of work for the backend.
///
/// `records` holds the full image of every affected record after the change, so
/// the backend can apply a request without knowing the mutation semantics.
/// `mutations` describes what the user did and is informational.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    /// Stable across retries. The backend must apply a key at most once.
    pub idempotency_key: String,
    pub seq: u64,
    /// Local transaction this request reconciles.
    pub tx_seq: u64,
    pub direction: Direction,
    pub action: ApiAction,
    pub target: EntityId,
    pub mutations: Vec<Mutation>,
    pub records: Vec<RecordImage>,
}

impl ApiRequest {
    /// Every entity the request touches; its lineage in the queue.
    pub fn entities(&self) -> BTreeSet<EntityId> {
        self.records
            .iter()
            .map(|image| image.id)
            .chain(std::iter::once(self.target))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncAck {
    pub idempotency_key: String,
    /// True when the backend had already applied this key.
    pub replayed: bool,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Rejected by backend: {0}")]
    Rejected(String),
}
