use chrono::{DateTime, Utc};
use tracing::debug;

use super::GraphStore;
use crate::editor::{EditOperation, EditorState};
use crate::error::{FlowError, Result};
use crate::model::{EntityId, Flow, FlowId, FlowPatch, Node, NodeId, NodePatch};

impl GraphStore {
    pub fn update_flow(&mut self, id: FlowId, patch: FlowPatch, now: DateTime<Utc>) -> Result<Flow> {
        let entity = EntityId::Flow(id);
        match self.get_flow_by_id(&id) {
            None => return Err(FlowError::NotFound(entity)),
            Some(flow) if flow.is_trashed() => return Err(FlowError::Trashed(entity)),
            Some(_) => {}
        }

        let flow = self.flow_mut(&id)?;
        if let Some(title) = patch.title {
            flow.title = title;
        }
        patch.kanban_data.apply_to(&mut flow.kanban_data);
        if let Some(position) = patch.position {
            flow.position = position;
        }
        flow.updated_at = now;
        let updated = flow.clone();

        debug!(flow = %id, "updated flow");
        Ok(updated)
    }

    /// Patches position, style, or the payload of a non-text node. A payload patch
    /// must keep the node type.
    pub fn update_node(&mut self, id: NodeId, patch: NodePatch, now: DateTime<Utc>) -> Result<Node> {
        let node = self.live_node(id)?;
        if let Some(payload) = &patch.payload {
            if payload.node_type() != node.node_type() {
                return Err(FlowError::InvalidEdit(format!(
                    "cannot change node {} from {} to {}",
                    id,
                    node.node_type(),
                    payload.node_type()
                )));
            }
            if node.node_type().is_text_bearing() {
                return Err(FlowError::InvalidEdit(format!(
                    "{} content of node {} changes through editor edits",
                    node.node_type(),
                    id
                )));
            }
        }

        let node = self.node_mut(&id)?;
        if let Some(position) = patch.position {
            node.position = position;
        }
        patch.style.apply_to(&mut node.style);
        if let Some(payload) = patch.payload {
            node.payload = payload;
        }
        node.updated_at = now;
        let updated = node.clone();

        debug!(node = %id, "updated node");
        Ok(updated)
    }

    /// Applies editor operations to a text-bearing node, creating its editor state
    /// on first edit. Returns the new state.
    pub fn edit_text(
        &mut self,
        id: NodeId,
        ops: &[EditOperation],
        now: DateTime<Utc>,
    ) -> Result<EditorState> {
        let node = self.live_node(id)?;
        let node_type = node.node_type();
        if !node_type.is_text_bearing() {
            return Err(FlowError::UnsupportedType(format!(
                "{} nodes hold no text",
                node_type
            )));
        }
        let current = node.editor().cloned().unwrap_or_default();
        let next = current.apply_edits(ops)?;

        self.store_editor(id, next.clone(), now)?;
        debug!(node = %id, ops = ops.len(), "edited text");
        Ok(next)
    }

    pub fn set_read_only(
        &mut self,
        id: NodeId,
        read_only: bool,
        now: DateTime<Utc>,
    ) -> Result<EditorState> {
        let node = self.live_node(id)?;
        if !node.node_type().is_text_bearing() {
            return Err(FlowError::UnsupportedType(format!(
                "{} nodes hold no text",
                node.node_type()
            )));
        }
        let next = node
            .editor()
            .cloned()
            .unwrap_or_default()
            .with_read_only(read_only);

        self.store_editor(id, next.clone(), now)?;
        debug!(node = %id, read_only, "set read-only");
        Ok(next)
    }

    /// The stored editor state, or an empty one for a text node never edited.
    /// `None` for unknown or non-text nodes.
    pub fn editor_state(&self, id: &NodeId) -> Option<EditorState> {
        let node = self.get_node_by_id(id)?;
        if !node.node_type().is_text_bearing() {
            return None;
        }
        Some(node.editor().cloned().unwrap_or_default())
    }

    fn live_node(&self, id: NodeId) -> Result<&Node> {
        let entity = EntityId::Node(id);
        let node = self.get_node_by_id(&id).ok_or(FlowError::NotFound(entity))?;
        if node.is_trashed() {
            return Err(FlowError::Trashed(entity));
        }
        Ok(node)
    }

    fn store_editor(&mut self, id: NodeId, state: EditorState, now: DateTime<Utc>) -> Result<()> {
        let node = self.node_mut(&id)?;
        let node_type = node.node_type();
        let slot = node
            .payload
            .editor_slot_mut()
            .ok_or_else(|| FlowError::UnsupportedType(node_type.to_string()))?;
        *slot = Some(state);
        node.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::NodeKey;
    use crate::graph::fixtures::GraphFixture;
    use crate::model::{FieldPatch, KanbanColumn, KanbanData, NodePayload, NodeStyle, Position};

    #[test]
    fn patches_flow_fields() {
        let mut fx = GraphFixture::new().flow("F1", None);
        let f1 = fx.flow_id("F1");
        let board = KanbanData {
            columns: vec![KanbanColumn {
                title: "Todo".into(),
                cards: vec![],
            }],
        };

        let flow = fx
            .store
            .update_flow(
                f1,
                FlowPatch {
                    title: Some("Board".into()),
                    kanban_data: FieldPatch::Set(board.clone()),
                    position: None,
                },
                fx.now,
            )
            .unwrap();

        assert_eq!(flow.title, "Board");
        assert_eq!(flow.kanban_data, Some(board));
        assert_eq!(flow.position, Position::default());
    }

    #[test]
    fn clear_patch_removes_optional_fields() {
        let mut fx = GraphFixture::new().flow("F1", None).node("T", "F1", "table");
        let f1 = fx.flow_id("F1");
        let t = fx.node_id("T");
        let keep = FlowPatch {
            kanban_data: FieldPatch::Set(KanbanData::default()),
            ..Default::default()
        };
        fx.store.update_flow(f1, keep, fx.now).unwrap();
        let styled = NodePatch {
            style: FieldPatch::Set(NodeStyle::default()),
            ..Default::default()
        };
        fx.store.update_node(t, styled, fx.now).unwrap();

        let renamed = FlowPatch {
            title: Some("Renamed".into()),
            ..Default::default()
        };
        let flow = fx.store.update_flow(f1, renamed, fx.now).unwrap();
        assert!(flow.kanban_data.is_some());

        let cleared = FlowPatch {
            kanban_data: FieldPatch::Clear,
            ..Default::default()
        };
        let flow = fx.store.update_flow(f1, cleared, fx.now).unwrap();
        assert_eq!(flow.kanban_data, None);

        let unstyled = NodePatch {
            style: FieldPatch::Clear,
            ..Default::default()
        };
        let node = fx.store.update_node(t, unstyled, fx.now).unwrap();
        assert_eq!(node.style, None);
    }

    #[test]
    fn patches_node_style_and_payload() {
        let mut fx = GraphFixture::new().flow("F1", None).node("T", "F1", "table");
        let t = fx.node_id("T");
        let rows = vec![vec!["a".to_string(), "b".to_string()]];

        let node = fx
            .store
            .update_node(
                t,
                NodePatch {
                    position: Some(Position::new(10.0, 20.0)),
                    style: FieldPatch::Set(NodeStyle {
                        width: Some(200.0),
                        ..Default::default()
                    }),
                    payload: Some(NodePayload::Table { rows: rows.clone() }),
                },
                fx.now,
            )
            .unwrap();

        assert_eq!(node.payload, NodePayload::Table { rows });
        assert_eq!(node.position, Position::new(10.0, 20.0));
    }

    #[test]
    fn payload_patch_cannot_change_type() {
        let mut fx = GraphFixture::new().flow("F1", None).node("T", "F1", "table");
        let t = fx.node_id("T");
        let before = fx.store.clone();

        let result = fx.store.update_node(
            t,
            NodePatch {
                payload: Some(NodePayload::Kanban {
                    title: "x".into(),
                    column: None,
                }),
                ..Default::default()
            },
            fx.now,
        );
        assert!(matches!(result, Err(FlowError::InvalidEdit(_))));
        assert_eq!(fx.store, before);
    }

    #[test]
    fn first_edit_creates_editor_state() {
        let mut fx = GraphFixture::new().flow("F1", None).node("N1", "F1", "text");
        let n1 = fx.node_id("N1");
        assert!(fx.store.get_node_by_id(&n1).unwrap().editor().is_none());
        assert_eq!(fx.store.editor_state(&n1), Some(EditorState::create_empty()));

        let ops = EditorState::create_empty().plan_insert_text("hi");
        let state = fx.store.edit_text(n1, &ops, fx.now).unwrap();

        assert_eq!(state.text_content(), "hi");
        assert_eq!(fx.store.get_node_by_id(&n1).unwrap().editor(), Some(&state));
    }

    #[test]
    fn editing_non_text_node_is_unsupported() {
        let mut fx = GraphFixture::new().flow("F1", None).node("K", "F1", "kanban");
        let k = fx.node_id("K");
        let result = fx
            .store
            .edit_text(k, &[EditOperation::insert_text(NodeKey(1), 0, "x")], fx.now);
        assert!(matches!(result, Err(FlowError::UnsupportedType(_))));
        assert!(fx.store.editor_state(&k).is_none());
    }

    #[test]
    fn failed_edit_leaves_node_untouched() {
        let mut fx = GraphFixture::new().flow("F1", None).node("N1", "F1", "note");
        let n1 = fx.node_id("N1");
        let before = fx.store.clone();

        let result = fx
            .store
            .edit_text(n1, &[EditOperation::insert_text(NodeKey(42), 0, "x")], fx.now);
        assert!(matches!(result, Err(FlowError::InvalidEdit(_))));
        assert_eq!(fx.store, before);
    }

    #[test]
    fn read_only_blocks_edits() {
        let mut fx = GraphFixture::new().flow("F1", None).node("N1", "F1", "text");
        let n1 = fx.node_id("N1");
        fx.store.set_read_only(n1, true, fx.now).unwrap();

        let ops = EditorState::create_empty().plan_insert_text("hi");
        assert!(matches!(
            fx.store.edit_text(n1, &ops, fx.now),
            Err(FlowError::ReadOnlyViolation)
        ));

        fx.store.set_read_only(n1, false, fx.now).unwrap();
        assert!(fx.store.edit_text(n1, &ops, fx.now).is_ok());
    }

    #[test]
    fn trashed_node_cannot_be_edited() {
        let mut fx = GraphFixture::new().flow("F1", None).node("N1", "F1", "text");
        let n1 = fx.node_id("N1");
        fx.store.trash(EntityId::Node(n1), fx.now).unwrap();

        let ops = EditorState::create_empty().plan_insert_text("hi");
        assert!(matches!(fx.store.edit_text(n1, &ops, fx.now), Err(FlowError::Trashed(_))));
    }
}
