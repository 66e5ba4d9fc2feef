use flowstore::clock::ManualClock;
use flowstore::config::FlowConfig;
use flowstore::graph::Mutation;
use flowstore::model::{EntityId, FieldPatch, FlowAttrs, FlowPatch, KanbanData, NodeAttrs};
use flowstore::persist::{FsSnapshotStore, SnapshotStore};
use flowstore::sync::MemSyncBackend;
use flowstore::{FlowError, RootStore};
use std::sync::Arc;
use tempfile::tempdir;

fn open(
    snapshots: &FsSnapshotStore,
    backend: Arc<MemSyncBackend>,
) -> RootStore<MemSyncBackend> {
    RootStore::load(
        snapshots,
        FlowConfig::default(),
        backend,
        Arc::new(ManualClock::new()),
    )
    .unwrap()
}

#[tokio::test]
async fn test_restart_sends_only_unacknowledged_requests() {
    let dir = tempdir().unwrap();
    let snapshots = FsSnapshotStore::new(dir.path());
    let backend = Arc::new(MemSyncBackend::new());

    let mut store = open(&snapshots, backend.clone());
    let flow = store.create_flow(None, FlowAttrs::titled("Inbox")).unwrap();
    store.sync().await;
    let node = store.create_node(flow.id, "note", NodeAttrs::default()).unwrap();
    store.type_text(node.id, "draft").unwrap();
    store.save(&snapshots).unwrap();
    assert!(snapshots.state_path().exists());

    let mut resumed = open(&snapshots, backend.clone());
    assert_eq!(resumed.graph(), store.graph());
    assert_eq!(resumed.queue().acked_watermark(), 1);
    assert_eq!(resumed.queue().len(), 2);

    let report = resumed.sync().await;

    assert_eq!(report.acknowledged.len(), 2);
    let seqs: Vec<u64> = backend.received().iter().map(|r| r.seq).collect();
    assert_eq!(seqs, vec![1, 2, 3]);
    assert_eq!(
        resumed
            .editor_state(&node.id)
            .unwrap()
            .text_content(),
        "draft"
    );
}

#[tokio::test]
async fn test_seqs_continue_after_restart() {
    let dir = tempdir().unwrap();
    let snapshots = FsSnapshotStore::new(dir.path());
    let backend = Arc::new(MemSyncBackend::new());

    let mut store = open(&snapshots, backend.clone());
    store.create_flow(None, FlowAttrs::titled("One")).unwrap();
    store.sync().await;
    store.save(&snapshots).unwrap();

    let mut resumed = open(&snapshots, backend.clone());
    assert!(resumed.queue().is_empty());
    resumed.create_flow(None, FlowAttrs::titled("Two")).unwrap();
    resumed.sync().await;

    let keys: Vec<String> = backend
        .received()
        .into_iter()
        .map(|r| r.idempotency_key)
        .collect();
    assert_eq!(keys.len(), 2);
    assert_ne!(keys[0], keys[1]);
    assert_eq!(backend.applied_count(), 2);
}

#[tokio::test]
async fn test_transaction_numbers_continue_after_restart() {
    let dir = tempdir().unwrap();
    let snapshots = FsSnapshotStore::new(dir.path());
    let backend = Arc::new(MemSyncBackend::new());

    let mut store = open(&snapshots, backend.clone());
    store.create_flow(None, FlowAttrs::titled("One")).unwrap();
    store.create_flow(None, FlowAttrs::titled("Two")).unwrap();
    store.sync().await;
    store.save(&snapshots).unwrap();

    let mut resumed = open(&snapshots, backend);
    resumed.create_flow(None, FlowAttrs::titled("Three")).unwrap();
    assert_eq!(resumed.queue().entries()[0].request.tx_seq, 3);
}

#[test]
fn test_state_without_transaction_counter_skips_queued_numbers() {
    let dir = tempdir().unwrap();
    let snapshots = FsSnapshotStore::new(dir.path());
    let backend = Arc::new(MemSyncBackend::new());

    let mut store = open(&snapshots, backend.clone());
    store.create_flow(None, FlowAttrs::titled("One")).unwrap();
    store.create_flow(None, FlowAttrs::titled("Two")).unwrap();
    store.save(&snapshots).unwrap();
    let mut state = snapshots.load().unwrap().unwrap();
    state.next_tx = 0;
    snapshots.save(&state).unwrap();

    let mut resumed = open(&snapshots, backend);
    resumed.create_flow(None, FlowAttrs::titled("Three")).unwrap();
    let tx_seqs: Vec<u64> = resumed
        .queue()
        .entries()
        .iter()
        .map(|e| e.request.tx_seq)
        .collect();
    assert_eq!(tx_seqs, vec![1, 2, 3]);
}

#[test]
fn test_trash_state_survives_restart() {
    let dir = tempdir().unwrap();
    let snapshots = FsSnapshotStore::new(dir.path());
    let backend = Arc::new(MemSyncBackend::new());

    let mut store = open(&snapshots, backend.clone());
    let flow = store.create_flow(None, FlowAttrs::titled("Old")).unwrap();
    store.create_node(flow.id, "table", NodeAttrs::default()).unwrap();
    store
        .dispatch(Mutation::Trash {
            entity: EntityId::Flow(flow.id),
        })
        .unwrap();
    store.save(&snapshots).unwrap();

    let mut resumed = open(&snapshots, backend);
    assert!(resumed.root_flows().is_empty());
    assert_eq!(resumed.trashed(), vec![EntityId::Flow(flow.id)]);
    assert!(!resumed.can_undo());

    resumed
        .dispatch(Mutation::Restore {
            entity: EntityId::Flow(flow.id),
        })
        .unwrap();
    assert_eq!(resumed.children(&flow.id).len(), 1);
}

#[test]
fn test_cleared_field_survives_restart() {
    let dir = tempdir().unwrap();
    let snapshots = FsSnapshotStore::new(dir.path());
    let backend = Arc::new(MemSyncBackend::new());

    let mut store = open(&snapshots, backend.clone());
    let flow = store.create_flow(None, FlowAttrs::titled("Board")).unwrap();
    store
        .dispatch(Mutation::UpdateFlow {
            id: flow.id,
            patch: FlowPatch {
                kanban_data: FieldPatch::Set(KanbanData::default()),
                ..Default::default()
            },
        })
        .unwrap();
    let clear = Mutation::UpdateFlow {
        id: flow.id,
        patch: FlowPatch {
            kanban_data: FieldPatch::Clear,
            ..Default::default()
        },
    };
    store.dispatch(clear.clone()).unwrap();
    store.save(&snapshots).unwrap();

    let resumed = open(&snapshots, backend);
    assert_eq!(resumed.get_flow_by_id(&flow.id).unwrap().kanban_data, None);
    let queued = resumed.queue().entries().last().unwrap();
    assert_eq!(queued.request.mutations, vec![clear]);
}

#[test]
fn test_newer_state_version_is_refused() {
    let dir = tempdir().unwrap();
    let snapshots = FsSnapshotStore::new(dir.path());
    let store = open(&snapshots, Arc::new(MemSyncBackend::new()));
    store.save(&snapshots).unwrap();

    let mut state = snapshots.load().unwrap().unwrap();
    state.version += 1;
    snapshots.save(&state).unwrap();

    let result = RootStore::load(
        &snapshots,
        FlowConfig::default(),
        Arc::new(MemSyncBackend::new()),
        Arc::new(ManualClock::new()),
    );
    assert!(matches!(result, Err(FlowError::UnsupportedVersion(_))));
}
