use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::GraphStore;
use crate::editor::{EditOperation, EditorState};
use crate::error::Result;
use crate::model::{
    EntityId, Flow, FlowAttrs, FlowId, FlowPatch, Node, NodeAttrs, NodeId, NodePatch, RecordImage,
};

/// A description of one change to the graph.
///
/// Mutations carry every id they create, so applying the same mutation to the same
/// store at the same instant always yields the same records. This is what lets a dispatched mutation be
/// sent to the backend verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mutation", rename_all = "snake_case")]
pub enum Mutation {
    CreateFlow {
        id: FlowId,
        parent: Option<FlowId>,
        attrs: FlowAttrs,
    },
    CreateNode {
        id: NodeId,
        parent: FlowId,
        node_type: String,
        attrs: NodeAttrs,
    },
    Move {
        entity: EntityId,
        parent: Option<FlowId>,
        index: Option<usize>,
    },
    UpdateFlow {
        id: FlowId,
        patch: FlowPatch,
    },
    UpdateNode {
        id: NodeId,
        patch: NodePatch,
    },
    Trash {
        entity: EntityId,
    },
    Restore {
        entity: EntityId,
    },
    Purge {
        entity: EntityId,
    },
    EditText {
        node: NodeId,
        ops: Vec<EditOperation>,
    },
    SetReadOnly {
        node: NodeId,
        read_only: bool,
    },
}

impl Mutation {
    pub fn create_flow(parent: Option<FlowId>, attrs: FlowAttrs) -> Self {
        Mutation::CreateFlow {
            id: FlowId::new(),
            parent,
            attrs,
        }
    }

    pub fn create_node(parent: FlowId, node_type: impl Into<String>, attrs: NodeAttrs) -> Self {
        Mutation::CreateNode {
            id: NodeId::new(),
            parent,
            node_type: node_type.into(),
            attrs,
        }
    }

    pub fn edit_text(node: NodeId, ops: Vec<EditOperation>) -> Self {
        Mutation::EditText { node, ops }
    }

    /// The entity the mutation is addressed to.
    pub fn target(&self) -> EntityId {
        match self {
            Mutation::CreateFlow { id, .. } | Mutation::UpdateFlow { id, .. } => EntityId::Flow(*id),
            Mutation::CreateNode { id, .. } | Mutation::UpdateNode { id, .. } => EntityId::Node(*id),
            Mutation::Move { entity, .. }
            | Mutation::Trash { entity }
            | Mutation::Restore { entity }
            | Mutation::Purge { entity } => *entity,
            Mutation::EditText { node, .. } | Mutation::SetReadOnly { node, .. } => {
                EntityId::Node(*node)
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Mutation::CreateFlow { .. } => "create_flow",
            Mutation::CreateNode { .. } => "create_node",
            Mutation::Move { .. } => "move",
            Mutation::UpdateFlow { .. } => "update_flow",
            Mutation::UpdateNode { .. } => "update_node",
            Mutation::Trash { .. } => "trash",
            Mutation::Restore { .. } => "restore",
            Mutation::Purge { .. } => "purge",
            Mutation::EditText { .. } => "edit_text",
            Mutation::SetReadOnly { .. } => "set_read_only",
        }
    }

    pub fn is_text_edit(&self) -> bool {
        matches!(self, Mutation::EditText { .. })
    }
}

/// What a mutation produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Flow(Flow),
    Node(Node),
    Editor(EditorState),
    /// Entities whose trash state changed, or that were purged.
    Entities(Vec<EntityId>),
    Moved,
    Batch(Vec<Outcome>),
}

/// Result of [`GraphStore::apply`]: the outcome plus the before- and after-image of
/// every record the mutation touched, in the order they were first touched.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub outcome: Outcome,
    pub before: Vec<RecordImage>,
    pub after: Vec<RecordImage>,
}

impl Applied {
    pub fn touched(&self) -> Vec<EntityId> {
        self.before.iter().map(|image| image.id).collect()
    }
}

impl GraphStore {
    /// Applies one mutation under a journal. On failure every record it touched is
    /// written back, so the store is unchanged.
    pub fn apply(&mut self, mutation: &Mutation, now: DateTime<Utc>) -> Result<Applied> {
        self.journaled(|store| store.execute(mutation, now))
    }

    /// Applies `mutations` in order as one unit: either all succeed or none do.
    pub fn apply_all(&mut self, mutations: &[Mutation], now: DateTime<Utc>) -> Result<Applied> {
        self.journaled(|store| {
            let outcomes = mutations
                .iter()
                .map(|m| store.execute(m, now))
                .collect::<Result<Vec<_>>>()?;
            Ok(Outcome::Batch(outcomes))
        })
    }

    fn journaled<F>(&mut self, run: F) -> Result<Applied>
    where
        F: FnOnce(&mut GraphStore) -> Result<Outcome>,
    {
        self.begin_journal();
        let result = run(self);
        let before = self.end_journal();

        match result {
            Ok(outcome) => {
                let after = before.iter().map(|image| self.image(image.id)).collect();
                Ok(Applied {
                    outcome,
                    before,
                    after,
                })
            }
            Err(e) => {
                self.restore_images(&before);
                debug!(error = %e, rolled_back = before.len(), "mutation rejected");
                Err(e)
            }
        }
    }

    fn execute(&mut self, mutation: &Mutation, now: DateTime<Utc>) -> Result<Outcome> {
        let outcome = match mutation {
            Mutation::CreateFlow { id, parent, attrs } => {
                Outcome::Flow(self.insert_flow(*id, *parent, attrs.clone(), now)?)
            }
            Mutation::CreateNode {
                id,
                parent,
                node_type,
                attrs,
            } => Outcome::Node(self.insert_node(*id, *parent, node_type, attrs.clone(), now)?),
            Mutation::Move {
                entity,
                parent,
                index,
            } => {
                self.move_entity(*entity, *parent, *index, now)?;
                Outcome::Moved
            }
            Mutation::UpdateFlow { id, patch } => Outcome::Flow(self.update_flow(*id, patch.clone(), now)?),
            Mutation::UpdateNode { id, patch } => Outcome::Node(self.update_node(*id, patch.clone(), now)?),
            Mutation::Trash { entity } => Outcome::Entities(self.trash(*entity, now)?),
            Mutation::Restore { entity } => Outcome::Entities(self.restore(*entity, now)?),
            Mutation::Purge { entity } => Outcome::Entities(self.purge(*entity)?),
            Mutation::EditText { node, ops } => Outcome::Editor(self.edit_text(*node, ops, now)?),
            Mutation::SetReadOnly { node, read_only } => {
                Outcome::Editor(self.set_read_only(*node, *read_only, now)?)
            }
        };
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FlowError;
    use crate::graph::fixtures::GraphFixture;

    #[test]
    fn apply_reports_images_of_every_touched_record() {
        let mut fx = GraphFixture::new().flow("F1", None);
        let f1 = fx.flow_id("F1");

        let mutation = Mutation::create_node(f1, "text", NodeAttrs::default());
        let applied = fx.store.apply(&mutation, fx.now).unwrap();

        let touched = applied.touched();
        assert_eq!(touched.len(), 2);
        assert!(touched.contains(&EntityId::Flow(f1)));
        assert!(touched.contains(&mutation.target()));

        let node_before = applied.before.iter().find(|i| i.id == mutation.target()).unwrap();
        assert!(node_before.record.is_none());
        let node_after = applied.after.iter().find(|i| i.id == mutation.target()).unwrap();
        assert!(node_after.record.is_some());
    }

    #[test]
    fn restoring_before_images_undoes_the_mutation() {
        let mut fx = GraphFixture::new()
            .flow("F1", None)
            .flow("F2", Some("F1"))
            .node("N1", "F2", "text");
        let snapshot = fx.store.clone();
        let f2 = EntityId::Flow(fx.flow_id("F2"));

        let applied = fx.store.apply(&Mutation::Trash { entity: f2 }, fx.now).unwrap();
        assert_ne!(fx.store, snapshot);

        fx.store.restore_images(&applied.before);
        assert_eq!(fx.store, snapshot);

        fx.store.restore_images(&applied.after);
        assert_eq!(fx.store.is_trashed(f2), Some(true));
    }

    #[test]
    fn failed_batch_rolls_back_earlier_mutations() {
        let mut fx = GraphFixture::new().flow("F1", None);
        let f1 = fx.flow_id("F1");
        let before = fx.store.clone();

        let batch = [
            Mutation::create_node(f1, "text", NodeAttrs::default()),
            Mutation::create_node(f1, "video", NodeAttrs::default()),
        ];
        let result = fx.store.apply_all(&batch, fx.now);

        assert!(matches!(result, Err(FlowError::UnsupportedType(_))));
        assert_eq!(fx.store, before);
    }

    #[test]
    fn failed_move_rolls_back() {
        let mut fx = GraphFixture::new().flow("F1", None).flow("F2", Some("F1"));
        let before = fx.store.clone();

        let mutation = Mutation::Move {
            entity: EntityId::Flow(fx.flow_id("F1")),
            parent: Some(fx.flow_id("F2")),
            index: None,
        };
        let result = fx.store.apply(&mutation, fx.now);

        assert!(matches!(result, Err(FlowError::CycleDetected { .. })));
        assert_eq!(fx.store, before);
    }

    #[test]
    fn applying_same_create_twice_is_rejected() {
        let mut store = GraphStore::new();
        let mutation = Mutation::create_flow(None, FlowAttrs::titled("Inbox"));
        store.apply(&mutation, Utc::now()).unwrap();
        assert!(matches!(store.apply(&mutation, Utc::now()), Err(FlowError::AlreadyExists(_))));
        assert_eq!(store.flow_count(), 1);
    }

    #[test]
    fn mutation_serializes_with_tag() {
        let mutation = Mutation::Trash {
            entity: EntityId::Flow(FlowId::new()),
        };
        let json = serde_json::to_value(&mutation).unwrap();
        assert_eq!(json["mutation"], "trash");
        let back: Mutation = serde_json::from_value(json).unwrap();
        assert_eq!(back, mutation);
    }
}
