use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use tracing::{debug, info};

use super::record::Transaction;
use crate::config::FlowConfig;
use crate::error::Result;
use crate::graph::{GraphStore, Mutation, Outcome};
use crate::model::EntityId;
use crate::notify::{ChangeEvent, Notifier};
use crate::sync::{ApiQueue, Direction, RetryPolicy};

/// Sequences mutations against the [`GraphStore`], keeps the undo timeline and
/// feeds the [`ApiQueue`].
#[derive(Debug)]
pub struct TransactionManager {
    graph: GraphStore,
    undo: VecDeque<Transaction>,
    redo: Vec<Transaction>,
    queue: ApiQueue,
    notifier: Notifier,
    next_tx: u64,
    coalescing: bool,
    flush_interval: Duration,
    undo_limit: usize,
}

impl TransactionManager {
    pub fn new(config: &FlowConfig, notifier: Notifier) -> Self {
        let queue = ApiQueue::new(RetryPolicy::from(&config.sync), notifier.clone());
        Self::with_parts(GraphStore::new(), queue, 1, config, notifier)
    }

    /// Builds a manager over an existing graph and queue, with empty history.
    /// Transaction numbers continue from `next_tx`, and always past every
    /// transaction the queue still references.
    pub fn with_parts(
        graph: GraphStore,
        queue: ApiQueue,
        next_tx: u64,
        config: &FlowConfig,
        notifier: Notifier,
    ) -> Self {
        let next_tx = queue
            .entries()
            .iter()
            .map(|entry| entry.request.tx_seq + 1)
            .fold(next_tx.max(1), u64::max);
        Self {
            graph,
            undo: VecDeque::new(),
            redo: Vec::new(),
            queue,
            notifier,
            next_tx,
            coalescing: false,
            flush_interval: config.flush_interval(),
            undo_limit: config.undo_limit,
        }
    }

    pub fn graph(&self) -> &GraphStore {
        &self.graph
    }

    pub fn next_tx(&self) -> u64 {
        self.next_tx
    }

    pub fn queue(&self) -> &ApiQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut ApiQueue {
        &mut self.queue
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.redo.len()
    }

    /// Undo stack, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &Transaction> {
        self.undo.iter()
    }

    /// Executes `mutation` as one transaction, or folds it into the open text-edit
    /// burst. On error nothing changes: no graph write, no history, no request.
    pub fn dispatch(&mut self, mutation: Mutation, now: DateTime<Utc>) -> Result<Outcome> {
        let applied = self.graph.apply(&mutation, now)?;
        let target = mutation.target();
        let keep_open = mutation.is_text_edit();

        let window = self.flush_interval;
        let coalesce = self.coalescing
            && self
                .undo
                .back()
                .map(|top| top.accepts(&mutation, now, window))
                .unwrap_or(false);

        if let (true, Some(top)) = (coalesce, self.undo.back_mut()) {
            top.absorb(mutation.clone(), &applied, now);
            let superseded = top
                .queue_seq
                .map(|seq| self.queue.supersede(seq, vec![mutation.clone()], top.after.clone()))
                .unwrap_or(false);
            if !superseded {
                let seq = self.queue.enqueue(
                    top.seq,
                    Direction::Forward,
                    target,
                    vec![mutation],
                    &applied.before,
                    applied.after.clone(),
                    now,
                );
                top.queue_seq = Some(seq);
            }
            debug!(tx = top.seq, superseded, "coalesced text edit");
        } else {
            let seq = self.next_tx;
            self.next_tx += 1;
            debug!(tx = seq, mutation = mutation.name(), target = %target, "dispatched");

            let mut tx = Transaction::new(seq, vec![mutation.clone()], &applied, now);
            tx.queue_seq = Some(self.queue.enqueue(
                seq,
                Direction::Forward,
                target,
                vec![mutation],
                &applied.before,
                applied.after.clone(),
                now,
            ));
            self.push_undo(tx);
            self.redo.clear();
        }
        self.coalescing = keep_open;

        self.publish_change(applied.touched());
        Ok(applied.outcome)
    }

    /// Executes `mutations` as a single all-or-nothing transaction.
    pub fn dispatch_batch(&mut self, mutations: Vec<Mutation>, now: DateTime<Utc>) -> Result<Outcome> {
        let Some(target) = mutations.first().map(|m| m.target()) else {
            return Ok(Outcome::Batch(Vec::new()));
        };
        let applied = self.graph.apply_all(&mutations, now)?;

        let seq = self.next_tx;
        self.next_tx += 1;
        debug!(tx = seq, count = mutations.len(), "dispatched batch");

        let mut tx = Transaction::new(seq, mutations.clone(), &applied, now);
        tx.queue_seq = Some(self.queue.enqueue(
            seq,
            Direction::Forward,
            target,
            mutations,
            &applied.before,
            applied.after.clone(),
            now,
        ));
        self.push_undo(tx);
        self.redo.clear();
        self.coalescing = false;

        self.publish_change(applied.touched());
        Ok(applied.outcome)
    }

    /// Reverts the latest transaction. Returns its seq, or `None` when there is
    /// nothing to undo.
    pub fn undo(&mut self, now: DateTime<Utc>) -> Option<u64> {
        let tx = self.undo.pop_back()?;
        self.coalescing = false;
        self.graph.restore_images(&tx.before);
        if let Some(target) = tx.target() {
            self.queue.enqueue(
                tx.seq,
                Direction::Undo,
                target,
                tx.forward.clone(),
                &tx.after,
                tx.before.clone(),
                now,
            );
        }
        info!(tx = tx.seq, records = tx.before.len(), "undo");

        let seq = tx.seq;
        let touched = tx.touched();
        self.redo.push(tx);
        self.publish_change(touched);
        Some(seq)
    }

    /// Re-applies the latest undone transaction.
    pub fn redo(&mut self, now: DateTime<Utc>) -> Option<u64> {
        let tx = self.redo.pop()?;
        self.coalescing = false;
        self.graph.restore_images(&tx.after);
        if let Some(target) = tx.target() {
            self.queue.enqueue(
                tx.seq,
                Direction::Redo,
                target,
                tx.forward.clone(),
                &tx.before,
                tx.after.clone(),
                now,
            );
        }
        info!(tx = tx.seq, records = tx.after.len(), "redo");

        let seq = tx.seq;
        let touched = tx.touched();
        self.push_undo(tx);
        self.publish_change(touched);
        Some(seq)
    }

    /// Ends the current typing burst; the next text edit starts a new transaction.
    pub fn close_coalescing(&mut self) {
        self.coalescing = false;
    }

    fn push_undo(&mut self, tx: Transaction) {
        self.undo.push_back(tx);
        while self.undo.len() > self.undo_limit {
            if let Some(dropped) = self.undo.pop_front() {
                debug!(tx = dropped.seq, "dropped from undo horizon");
            }
        }
    }

    fn publish_change(&self, entities: Vec<EntityId>) {
        self.notifier.publish(ChangeEvent::GraphChanged { entities });
        self.notifier.publish(ChangeEvent::HistoryChanged {
            can_undo: self.can_undo(),
            can_redo: self.can_redo(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::EditorState;
    use crate::error::FlowError;
    use crate::model::{FlowAttrs, FlowId, NodeAttrs, NodeId};
    use crate::sync::{ApiAction, MemSyncBackend};
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn manager() -> TransactionManager {
        TransactionManager::new(&FlowConfig::default(), Notifier::new())
    }

    fn create_flow(tm: &mut TransactionManager, now: DateTime<Utc>) -> FlowId {
        match tm
            .dispatch(Mutation::create_flow(None, FlowAttrs::titled("F")), now)
            .unwrap()
        {
            Outcome::Flow(flow) => flow.id,
            other => panic!("Expected flow, got {:?}", other),
        }
    }

    fn create_text(tm: &mut TransactionManager, parent: FlowId, now: DateTime<Utc>) -> NodeId {
        match tm
            .dispatch(Mutation::create_node(parent, "text", NodeAttrs::default()), now)
            .unwrap()
        {
            Outcome::Node(node) => node.id,
            other => panic!("Expected node, got {:?}", other),
        }
    }

    fn type_text(tm: &mut TransactionManager, node: NodeId, text: &str, now: DateTime<Utc>) {
        let state = tm.graph().editor_state(&node).unwrap();
        tm.dispatch(Mutation::edit_text(node, state.plan_insert_text(text)), now)
            .unwrap();
    }

    #[test]
    fn undo_and_redo_restore_exact_snapshots() {
        let mut tm = manager();
        let now = Utc::now();
        let f = create_flow(&mut tm, now);
        let after_create = tm.graph().clone();

        tm.dispatch(
            Mutation::create_node(f, "kanban", NodeAttrs::default()),
            now,
        )
        .unwrap();
        let after_node = tm.graph().clone();

        assert!(tm.undo(now).is_some());
        assert_eq!(*tm.graph(), after_create);
        assert!(tm.redo(now).is_some());
        assert_eq!(*tm.graph(), after_node);
    }

    #[test]
    fn undo_on_empty_stack_is_a_noop() {
        let mut tm = manager();
        assert_eq!(tm.undo(Utc::now()), None);
        assert_eq!(tm.redo(Utc::now()), None);
        assert!(tm.queue().is_empty());
    }

    #[test]
    fn failed_dispatch_changes_nothing() {
        let mut tm = manager();
        let now = Utc::now();
        let f = create_flow(&mut tm, now);
        let graph = tm.graph().clone();
        let queued = tm.queue().len();

        let result = tm.dispatch(Mutation::create_node(f, "video", NodeAttrs::default()), now);

        assert!(matches!(result, Err(FlowError::UnsupportedType(_))));
        assert_eq!(*tm.graph(), graph);
        assert_eq!(tm.undo_depth(), 1);
        assert_eq!(tm.queue().len(), queued);
    }

    #[test]
    fn new_dispatch_clears_redo() {
        let mut tm = manager();
        let now = Utc::now();
        create_flow(&mut tm, now);
        tm.undo(now);
        assert!(tm.can_redo());

        create_flow(&mut tm, now);
        assert!(!tm.can_redo());
    }

    #[test]
    fn text_edits_inside_window_coalesce() {
        let mut tm = manager();
        let now = Utc::now();
        let f = create_flow(&mut tm, now);
        let n = create_text(&mut tm, f, now);
        let before_typing = tm.graph().clone();
        let depth = tm.undo_depth();

        type_text(&mut tm, n, "h", now);
        type_text(&mut tm, n, "i", now + Duration::milliseconds(200));

        assert_eq!(tm.undo_depth(), depth + 1);
        assert_eq!(tm.graph().editor_state(&n).unwrap().text_content(), "hi");

        tm.undo(now);
        assert_eq!(*tm.graph(), before_typing);
        assert_eq!(tm.graph().editor_state(&n), Some(EditorState::create_empty()));
    }

    #[test]
    fn text_edits_outside_window_do_not_coalesce() {
        let mut tm = manager();
        let now = Utc::now();
        let f = create_flow(&mut tm, now);
        let n = create_text(&mut tm, f, now);
        let depth = tm.undo_depth();

        type_text(&mut tm, n, "h", now);
        type_text(&mut tm, n, "i", now + Duration::milliseconds(501));

        assert_eq!(tm.undo_depth(), depth + 2);
        tm.undo(now);
        assert_eq!(tm.graph().editor_state(&n).unwrap().text_content(), "h");
    }

    #[test]
    fn other_dispatch_closes_coalescing_window() {
        let mut tm = manager();
        let now = Utc::now();
        let f = create_flow(&mut tm, now);
        let n = create_text(&mut tm, f, now);
        let depth = tm.undo_depth();

        type_text(&mut tm, n, "h", now);
        tm.dispatch(
            Mutation::UpdateFlow {
                id: f,
                patch: crate::model::FlowPatch {
                    title: Some("G".into()),
                    ..Default::default()
                },
            },
            now,
        )
        .unwrap();
        type_text(&mut tm, n, "i", now);

        assert_eq!(tm.undo_depth(), depth + 3);
    }

    #[test]
    fn coalesced_edit_supersedes_unsent_request() {
        let mut tm = manager();
        let now = Utc::now();
        let f = create_flow(&mut tm, now);
        let n = create_text(&mut tm, f, now);
        let queued = tm.queue().len();

        type_text(&mut tm, n, "h", now);
        type_text(&mut tm, n, "i", now);

        assert_eq!(tm.queue().len(), queued + 1);
        let entry = tm.queue().entries().last().unwrap();
        assert_eq!(entry.request.mutations.len(), 2);
        assert_eq!(entry.request.action, ApiAction::Update);
    }

    #[tokio::test]
    async fn coalesced_edit_after_transmission_gets_its_own_request() {
        let mut tm = manager();
        let backend = MemSyncBackend::new();
        let now = Utc::now();
        let f = create_flow(&mut tm, now);
        let n = create_text(&mut tm, f, now);
        let depth = tm.undo_depth();

        type_text(&mut tm, n, "h", now);
        let sent = tm.queue().entries().last().unwrap().request.clone();
        tm.queue_mut().pump(&backend, now).await;
        assert!(tm.queue().is_empty());

        type_text(&mut tm, n, "i", now + Duration::milliseconds(100));

        assert_eq!(tm.undo_depth(), depth + 1);
        assert_eq!(tm.queue().len(), 1);
        let follow_up = &tm.queue().entries()[0].request;
        assert_eq!(follow_up.tx_seq, sent.tx_seq);
        assert_ne!(follow_up.idempotency_key, sent.idempotency_key);
        assert_eq!(follow_up.mutations.len(), 1);

        let received = backend.received();
        let original = received.iter().find(|r| r.seq == sent.seq).unwrap();
        assert_eq!(original.idempotency_key, sent.idempotency_key);
        assert_eq!(original.mutations, sent.mutations);

        tm.undo(now);
        assert_eq!(tm.graph().editor_state(&n), Some(EditorState::create_empty()));
    }

    #[test]
    fn undo_enqueues_compensating_request() {
        let mut tm = manager();
        let now = Utc::now();
        create_flow(&mut tm, now);
        tm.undo(now);
        tm.redo(now);

        let entries = tm.queue().entries();
        let directions: Vec<Direction> = entries.iter().map(|e| e.request.direction).collect();
        let actions: Vec<ApiAction> = entries.iter().map(|e| e.request.action).collect();
        assert_eq!(directions, vec![Direction::Forward, Direction::Undo, Direction::Redo]);
        assert_eq!(actions, vec![ApiAction::Create, ApiAction::Delete, ApiAction::Create]);
        assert!(entries.iter().all(|e| e.request.tx_seq == entries[0].request.tx_seq));
    }

    #[test]
    fn undo_limit_drops_oldest() {
        let config = FlowConfig {
            undo_limit: 2,
            ..Default::default()
        };
        let mut tm = TransactionManager::new(&config, Notifier::new());
        let now = Utc::now();
        for _ in 0..4 {
            create_flow(&mut tm, now);
        }

        assert_eq!(tm.undo_depth(), 2);
        assert!(tm.undo(now).is_some());
        assert!(tm.undo(now).is_some());
        assert!(tm.undo(now).is_none());
        assert_eq!(tm.graph().flow_count(), 2);
    }

    #[test]
    fn batch_is_one_undo_step() {
        let mut tm = manager();
        let now = Utc::now();
        let f = create_flow(&mut tm, now);
        let snapshot = tm.graph().clone();

        tm.dispatch_batch(
            vec![
                Mutation::create_node(f, "note", NodeAttrs::default()),
                Mutation::create_node(f, "table", NodeAttrs::default()),
            ],
            now,
        )
        .unwrap();
        assert_eq!(tm.graph().node_count(), 2);

        tm.undo(now);
        assert_eq!(*tm.graph(), snapshot);
    }

    #[test]
    fn history_changes_are_published() {
        let notifier = Notifier::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        notifier.subscribe(move |e| {
            if let ChangeEvent::HistoryChanged { can_undo, can_redo } = e {
                sink.lock().push((*can_undo, *can_redo));
            }
        });
        let mut tm = TransactionManager::new(&FlowConfig::default(), notifier);
        let now = Utc::now();

        create_flow(&mut tm, now);
        tm.undo(now);

        assert_eq!(*seen.lock(), vec![(true, false), (false, true)]);
    }
}
