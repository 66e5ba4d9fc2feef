//! # Root Store
//!
//! [`RootStore`] is the composition root and the single surface for the
//! presentation layer. It owns the [`TransactionManager`] (and through it the
//! graph and the sync queue), the [`SyncBackend`], the [`Clock`], the
//! configuration and the [`Notifier`].
//!
//! ```text
//! UI ──dispatch/undo/redo──> RootStore ──> TransactionManager ──> GraphStore
//!  ^                            │                    │
//!  └──── subscribe ◄── Notifier │                    └──> ApiQueue ──sync()──> SyncBackend
//! ```
//!
//! Mutations are synchronous and return before any network work. Call
//! [`RootStore::sync`] for one drain pass, or [`RootStore::run_until_idle`] to keep
//! draining, sleeping through backoff, until nothing more can be sent.

use std::sync::Arc;
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::config::FlowConfig;
use crate::editor::EditorState;
use crate::error::{FlowError, Result};
use crate::graph::{GraphStore, Mutation, Outcome};
use crate::model::{
    EntityId, EntityRecord, Flow, FlowAttrs, FlowId, Node, NodeAttrs, NodeId,
};
use crate::notify::{ChangeEvent, Notifier, SubscriptionId};
use crate::persist::{PersistedState, SnapshotStore, STATE_VERSION};
use crate::sync::{ApiQueue, PumpReport, RetryPolicy, SyncBackend};
use crate::transaction::TransactionManager;

pub struct RootStore<B: SyncBackend> {
    transactions: TransactionManager,
    backend: Arc<B>,
    clock: Arc<dyn Clock>,
    config: FlowConfig,
    notifier: Notifier,
}

impl<B: SyncBackend> RootStore<B> {
    pub fn new(config: FlowConfig, backend: Arc<B>) -> Self {
        Self::with_clock(config, backend, Arc::new(SystemClock))
    }

    pub fn with_clock(config: FlowConfig, backend: Arc<B>, clock: Arc<dyn Clock>) -> Self {
        let notifier = Notifier::new();
        let transactions = TransactionManager::new(&config, notifier.clone());
        Self {
            transactions,
            backend,
            clock,
            config,
            notifier,
        }
    }

    /// Resumes from the last saved state, or starts empty when there is none.
    pub fn load(
        snapshots: &dyn SnapshotStore,
        config: FlowConfig,
        backend: Arc<B>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let Some(state) = snapshots.load()? else {
            return Ok(Self::with_clock(config, backend, clock));
        };
        if state.version > STATE_VERSION {
            return Err(FlowError::UnsupportedVersion(state.version));
        }

        let graph = GraphStore::from_records(state.records())?;
        let notifier = Notifier::new();
        let queue = ApiQueue::resume(
            state.instance,
            state.next_seq,
            state.acked_watermark,
            state.pending,
            RetryPolicy::from(&config.sync),
            notifier.clone(),
            clock.now(),
        );
        info!(
            flows = graph.flow_count(),
            nodes = graph.node_count(),
            pending = queue.len(),
            "resumed store"
        );
        let transactions =
            TransactionManager::with_parts(graph, queue, state.next_tx, &config, notifier.clone());
        Ok(Self {
            transactions,
            backend,
            clock,
            config,
            notifier,
        })
    }

    pub fn save(&self, snapshots: &dyn SnapshotStore) -> Result<()> {
        let mut flows = Vec::new();
        let mut nodes = Vec::new();
        for record in self.graph().records() {
            match record {
                EntityRecord::Flow(flow) => flows.push(flow),
                EntityRecord::Node(node) => nodes.push(node),
            }
        }
        let queue = self.transactions.queue();
        let state = PersistedState {
            version: STATE_VERSION,
            instance: queue.instance().to_string(),
            flows,
            nodes,
            acked_watermark: queue.acked_watermark(),
            next_seq: queue.next_seq(),
            next_tx: self.transactions.next_tx(),
            pending: queue.entries().to_vec(),
        };
        snapshots.save(&state)?;
        debug!(pending = state.pending.len(), "saved store");
        Ok(())
    }

    // --- Reads ---

    pub fn graph(&self) -> &GraphStore {
        self.transactions.graph()
    }

    pub fn get_flow_by_id(&self, id: &FlowId) -> Option<&Flow> {
        self.graph().get_flow_by_id(id)
    }

    pub fn get_node_by_id(&self, id: &NodeId) -> Option<&Node> {
        self.graph().get_node_by_id(id)
    }

    pub fn root_flows(&self) -> Vec<&Flow> {
        self.graph().root_flows()
    }

    pub fn children(&self, flow: &FlowId) -> Vec<EntityId> {
        self.graph().children(flow)
    }

    pub fn trashed(&self) -> Vec<EntityId> {
        self.graph().trashed()
    }

    pub fn editor_state(&self, node: &NodeId) -> Option<EditorState> {
        self.graph().editor_state(node)
    }

    pub fn can_undo(&self) -> bool {
        self.transactions.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.transactions.can_redo()
    }

    pub fn transactions(&self) -> &TransactionManager {
        &self.transactions
    }

    pub fn queue(&self) -> &ApiQueue {
        self.transactions.queue()
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    // --- Writes ---

    pub fn dispatch(&mut self, mutation: Mutation) -> Result<Outcome> {
        let now = self.clock.now();
        self.transactions.dispatch(mutation, now)
    }

    pub fn dispatch_batch(&mut self, mutations: Vec<Mutation>) -> Result<Outcome> {
        let now = self.clock.now();
        self.transactions.dispatch_batch(mutations, now)
    }

    pub fn undo(&mut self) -> Option<u64> {
        let now = self.clock.now();
        self.transactions.undo(now)
    }

    pub fn redo(&mut self) -> Option<u64> {
        let now = self.clock.now();
        self.transactions.redo(now)
    }

    pub fn close_coalescing(&mut self) {
        self.transactions.close_coalescing();
    }

    pub fn create_flow(&mut self, parent: Option<FlowId>, attrs: FlowAttrs) -> Result<Flow> {
        match self.dispatch(Mutation::create_flow(parent, attrs))? {
            Outcome::Flow(flow) => Ok(flow),
            other => Err(unexpected(other)),
        }
    }

    pub fn create_node(&mut self, parent: FlowId, node_type: &str, attrs: NodeAttrs) -> Result<Node> {
        match self.dispatch(Mutation::create_node(parent, node_type, attrs))? {
            Outcome::Node(node) => Ok(node),
            other => Err(unexpected(other)),
        }
    }

    /// Types `text` at the caret of a text-bearing node.
    pub fn type_text(&mut self, node: NodeId, text: &str) -> Result<EditorState> {
        let state = self
            .editor_state(&node)
            .ok_or_else(|| FlowError::UnsupportedType(format!("node {} holds no text", node)))?;
        match self.dispatch(Mutation::edit_text(node, state.plan_insert_text(text)))? {
            Outcome::Editor(state) => Ok(state),
            other => Err(unexpected(other)),
        }
    }

    // --- Notifications ---

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.notifier.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.notifier.unsubscribe(id)
    }

    // --- Sync ---

    /// One pass over the queue.
    pub async fn sync(&mut self) -> PumpReport {
        let now = self.clock.now();
        let backend = self.backend.clone();
        self.transactions.queue_mut().pump(&*backend, now).await
    }

    /// Drains the queue, sleeping through backoff delays, until it is empty or only
    /// entries needing [`Self::retry_exhausted`] remain. Returns early when the
    /// clock does not follow real time.
    pub async fn run_until_idle(&mut self) -> PumpReport {
        let mut report = PumpReport::default();
        loop {
            report.merge(self.sync().await);
            let Some(due) = self.queue().next_due() else {
                break;
            };
            let now = self.clock.now();
            if due > now {
                let wait = (due - now).to_std().unwrap_or_default();
                tokio::time::sleep(wait).await;
                if self.clock.now() < due {
                    break;
                }
            }
        }
        report
    }

    pub fn retry_exhausted(&mut self) -> usize {
        let now = self.clock.now();
        self.transactions.queue_mut().retry_exhausted(now)
    }
}

fn unexpected(outcome: Outcome) -> FlowError {
    FlowError::InvalidEdit(format!("unexpected outcome {:?}", outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::persist::MemSnapshotStore;
    use crate::sync::{MemSyncBackend, SyncError};

    fn store() -> (RootStore<MemSyncBackend>, ManualClock) {
        let clock = ManualClock::new();
        let store = RootStore::with_clock(
            FlowConfig::default(),
            Arc::new(MemSyncBackend::new()),
            Arc::new(clock.clone()),
        );
        (store, clock)
    }

    #[test]
    fn dispatch_returns_before_any_transmission() {
        let (mut store, _) = store();
        store.create_flow(None, FlowAttrs::titled("Inbox")).unwrap();

        assert_eq!(store.queue().len(), 1);
        assert!(store.backend().received().is_empty());
    }

    #[tokio::test]
    async fn sync_mirrors_graph_on_backend() {
        let (mut store, _) = store();
        let flow = store.create_flow(None, FlowAttrs::titled("Inbox")).unwrap();
        let node = store.create_node(flow.id, "note", NodeAttrs::default()).unwrap();
        store.type_text(node.id, "hello").unwrap();

        let report = store.sync().await;

        assert_eq!(report.acknowledged.len(), 3);
        assert!(store.queue().is_empty());
        assert_eq!(
            store.backend().record(EntityId::Node(node.id)),
            Some(EntityRecord::Node(store.get_node_by_id(&node.id).unwrap().clone()))
        );
    }

    #[tokio::test]
    async fn undo_after_sync_is_sent_as_new_request() {
        let (mut store, _) = store();
        let flow = store.create_flow(None, FlowAttrs::titled("Inbox")).unwrap();
        store.sync().await;

        store.undo();
        store.sync().await;

        assert!(store.backend().record(EntityId::Flow(flow.id)).is_none());
        assert_eq!(store.backend().applied_count(), 2);
    }

    #[tokio::test]
    async fn retry_waits_for_backoff_on_manual_clock() {
        let (mut store, clock) = store();
        store.backend().fail_next(1, SyncError::Transport("offline".into()));
        store.create_flow(None, FlowAttrs::titled("Inbox")).unwrap();

        let report = store.run_until_idle().await;
        assert_eq!(report.failed.len(), 1);
        assert_eq!(store.queue().len(), 1);

        clock.advance_ms(250);
        let report = store.sync().await;
        assert_eq!(report.acknowledged.len(), 1);
    }

    #[test]
    fn save_and_load_resume_pending_requests() {
        let (mut store, clock) = store();
        let flow = store.create_flow(None, FlowAttrs::titled("Inbox")).unwrap();
        let snapshots = MemSnapshotStore::new();
        store.save(&snapshots).unwrap();

        let resumed = RootStore::load(
            &snapshots,
            FlowConfig::default(),
            Arc::new(MemSyncBackend::new()),
            Arc::new(clock),
        )
        .unwrap();

        assert_eq!(resumed.graph(), store.graph());
        assert_eq!(resumed.queue().len(), 1);
        assert_eq!(resumed.queue().instance(), store.queue().instance());
        assert!(!resumed.can_undo());
        assert!(resumed.get_flow_by_id(&flow.id).is_some());
    }

    #[test]
    fn load_without_saved_state_starts_empty() {
        let snapshots = MemSnapshotStore::new();
        let store = RootStore::load(
            &snapshots,
            FlowConfig::default(),
            Arc::new(MemSyncBackend::new()),
            Arc::new(ManualClock::new()),
        )
        .unwrap();
        assert_eq!(store.graph().flow_count(), 0);
    }

    #[test]
    fn type_text_on_table_is_unsupported() {
        let (mut store, _) = store();
        let flow = store.create_flow(None, FlowAttrs::default()).unwrap();
        let table = store.create_node(flow.id, "table", NodeAttrs::default()).unwrap();
        assert!(matches!(
            store.type_text(table.id, "x"),
            Err(FlowError::UnsupportedType(_))
        ));
    }
}
