use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;

use super::request::{ApiRequest, SyncAck, SyncError};
use crate::model::{EntityId, EntityRecord};

/// The remote persistence service, as seen from the queue.
#[async_trait]
pub trait SyncBackend: Send + Sync {
    async fn transmit(&self, request: &ApiRequest) -> Result<SyncAck, SyncError>;
}

/// In-memory backend that applies record images, honours idempotency keys, and
/// fails on demand.
#[derive(Debug, Default)]
pub struct MemSyncBackend {
    inner: Mutex<MemServer>,
}

#[derive(Debug, Default)]
struct MemServer {
    records: HashMap<EntityId, EntityRecord>,
    applied: HashSet<String>,
    received: Vec<ApiRequest>,
    scripted: VecDeque<SyncError>,
    rejected: HashSet<EntityId>,
}

impl MemSyncBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `times` transmissions fail with `error`, whatever they carry.
    pub fn fail_next(&self, times: usize, error: SyncError) {
        let mut inner = self.inner.lock();
        for _ in 0..times {
            inner.scripted.push_back(error.clone());
        }
    }

    /// Rejects every request touching `entity` until [`Self::accept`] is called.
    pub fn reject(&self, entity: EntityId) {
        self.inner.lock().rejected.insert(entity);
    }

    pub fn accept(&self, entity: EntityId) {
        self.inner.lock().rejected.remove(&entity);
    }

    /// Every transmission attempt in arrival order, retries included.
    pub fn received(&self) -> Vec<ApiRequest> {
        self.inner.lock().received.clone()
    }

    pub fn applied_count(&self) -> usize {
        self.inner.lock().applied.len()
    }

    pub fn record(&self, id: EntityId) -> Option<EntityRecord> {
        self.inner.lock().records.get(&id).cloned()
    }

    /// Backend-side records, keyed by entity.
    pub fn records(&self) -> HashMap<EntityId, EntityRecord> {
        self.inner.lock().records.clone()
    }
}

#[async_trait]
impl SyncBackend for MemSyncBackend {
    async fn transmit(&self, request: &ApiRequest) -> Result<SyncAck, SyncError> {
        let mut inner = self.inner.lock();
        inner.received.push(request.clone());

        if let Some(error) = inner.scripted.pop_front() {
            return Err(error);
        }
        if let Some(entity) = request
            .entities()
            .into_iter()
            .find(|e| inner.rejected.contains(e))
        {
            return Err(SyncError::Rejected(format!("{} is locked", entity)));
        }
        if inner.applied.contains(&request.idempotency_key) {
            debug!(key = %request.idempotency_key, "replayed request");
            return Ok(SyncAck {
                idempotency_key: request.idempotency_key.clone(),
                replayed: true,
            });
        }

        for image in &request.records {
            match &image.record {
                Some(record) => {
                    inner.records.insert(image.id, record.clone());
                }
                None => {
                    inner.records.remove(&image.id);
                }
            }
        }
        inner.applied.insert(request.idempotency_key.clone());
        Ok(SyncAck {
            idempotency_key: request.idempotency_key.clone(),
            replayed: false,
        })
    }
}
