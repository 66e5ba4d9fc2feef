//! # Domain Model: Flows, Nodes and the Containment Edge
//!
//! This module defines the records stored by the [`GraphStore`](crate::graph::GraphStore):
//! [`Flow`], [`Node`], and the [`EntityId`] tagged union used wherever either
//! kind of entity can appear.
//!
//! ## Containment
//!
//! ```text
//! Flow (root, parent_flow_id = None)
//! ├── child_flow_ids ──> Flow (flow-as-node)
//! │                      └── child_node_ids ──> Node
//! └── child_node_ids ──> Node
//! ```
//!
//! A Flow appears inside its parent exactly like a Node does. Rather than an
//! inheritance relation, the child slot is an [`EntityId`]: both `Flow(FlowId)`
//! and `Node(NodeId)` resolve to the same shape, so traversal, trash and move
//! operations take an `EntityId` and branch only where the kinds differ.
//!
//! ## Trash State
//!
//! Trashing is a visibility flag. When a Flow is trashed its live descendants are
//! trashed too, with `trashed_via` naming the Flow that caused it. An entity trashed
//! directly has `trashed_via = None`. Restoring a Flow only brings back the
//! descendants it trashed, so each record keeps its own trash history.
//!
//! ## Records and Images
//!
//! [`EntityRecord`] wraps either record kind; [`RecordImage`] is the value of one
//! record at a point in time (`None` = absent). Images are what transactions keep
//! to undo and redo.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::editor::EditorState;
use crate::error::FlowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowId(pub Uuid);

impl FlowId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FlowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of any entity that can occupy a child slot of a Flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum EntityId {
    Flow(FlowId),
    Node(NodeId),
}

impl From<FlowId> for EntityId {
    fn from(id: FlowId) -> Self {
        EntityId::Flow(id)
    }
}

impl From<NodeId> for EntityId {
    fn from(id: NodeId) -> Self {
        EntityId::Node(id)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Flow(id) => write!(f, "flow:{}", id),
            EntityId::Node(id) => write!(f, "node:{}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Text,
    Note,
    Table,
    Kanban,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Text => "text",
            NodeType::Note => "note",
            NodeType::Table => "table",
            NodeType::Kanban => "kanban",
        }
    }

    /// Text-bearing nodes carry an [`EditorState`].
    pub fn is_text_bearing(&self) -> bool {
        matches!(self, NodeType::Text | NodeType::Note)
    }
}

impl FromStr for NodeType {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(NodeType::Text),
            "note" => Ok(NodeType::Note),
            "table" => Ok(NodeType::Table),
            "kanban" => Ok(NodeType::Kanban),
            _ => Err(FlowError::UnsupportedType(s.to_string())),
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeStyle {
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KanbanColumn {
    pub title: String,
    pub cards: Vec<NodeId>,
}

/// Column layout of a Flow used as a kanban board.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KanbanData {
    pub columns: Vec<KanbanColumn>,
}

/// Type-specific content of a [`Node`]. The variant determines the node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodePayload {
    Text {
        editor: Option<EditorState>,
    },
    Note {
        editor: Option<EditorState>,
        color: Option<String>,
    },
    Table {
        rows: Vec<Vec<String>>,
    },
    Kanban {
        title: String,
        column: Option<String>,
    },
}

impl NodePayload {
    pub fn empty(node_type: NodeType) -> Self {
        match node_type {
            NodeType::Text => NodePayload::Text { editor: None },
            NodeType::Note => NodePayload::Note {
                editor: None,
                color: None,
            },
            NodeType::Table => NodePayload::Table { rows: Vec::new() },
            NodeType::Kanban => NodePayload::Kanban {
                title: String::new(),
                column: None,
            },
        }
    }

    pub fn node_type(&self) -> NodeType {
        match self {
            NodePayload::Text { .. } => NodeType::Text,
            NodePayload::Note { .. } => NodeType::Note,
            NodePayload::Table { .. } => NodeType::Table,
            NodePayload::Kanban { .. } => NodeType::Kanban,
        }
    }

    pub fn editor(&self) -> Option<&EditorState> {
        match self {
            NodePayload::Text { editor } | NodePayload::Note { editor, .. } => editor.as_ref(),
            _ => None,
        }
    }

    /// Mutable access to the editor slot; `None` for nodes that hold no text.
    pub(crate) fn editor_slot_mut(&mut self) -> Option<&mut Option<EditorState>> {
        match self {
            NodePayload::Text { editor } | NodePayload::Note { editor, .. } => Some(editor),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrashState {
    pub is_trashed: bool,
    pub trashed_at: Option<DateTime<Utc>>,
    /// The Flow whose trash cascaded to this entity, `None` when trashed directly.
    pub trashed_via: Option<FlowId>,
}

impl TrashState {
    pub fn trashed(at: DateTime<Utc>, via: Option<FlowId>) -> Self {
        Self {
            is_trashed: true,
            trashed_at: Some(at),
            trashed_via: via,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FlowAttrs {
    pub title: String,
    pub kanban_data: Option<KanbanData>,
    pub position: Position,
}

impl FlowAttrs {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeAttrs {
    pub position: Position,
    pub style: Option<NodeStyle>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub id: FlowId,
    pub title: String,
    pub parent_flow_id: Option<FlowId>,
    pub child_node_ids: Vec<NodeId>,
    pub child_flow_ids: Vec<FlowId>,
    pub kanban_data: Option<KanbanData>,
    pub position: Position,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub trash: TrashState,
}

impl Flow {
    pub fn new(id: FlowId, parent: Option<FlowId>, attrs: FlowAttrs, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title: attrs.title,
            parent_flow_id: parent,
            child_node_ids: Vec::new(),
            child_flow_ids: Vec::new(),
            kanban_data: attrs.kanban_data,
            position: attrs.position,
            created_at: now,
            updated_at: now,
            trash: TrashState::default(),
        }
    }

    pub fn is_trashed(&self) -> bool {
        self.trash.is_trashed
    }

    pub fn is_root(&self) -> bool {
        self.parent_flow_id.is_none()
    }

    /// Child slots in display order: flows first, then nodes.
    pub fn children(&self) -> Vec<EntityId> {
        self.child_flow_ids
            .iter()
            .map(|id| EntityId::Flow(*id))
            .chain(self.child_node_ids.iter().map(|id| EntityId::Node(*id)))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub parent_flow_id: FlowId,
    pub payload: NodePayload,
    pub position: Position,
    pub style: Option<NodeStyle>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub trash: TrashState,
}

impl Node {
    pub fn new(
        id: NodeId,
        parent: FlowId,
        node_type: NodeType,
        attrs: NodeAttrs,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            parent_flow_id: parent,
            payload: NodePayload::empty(node_type),
            position: attrs.position,
            style: attrs.style,
            created_at: now,
            updated_at: now,
            trash: TrashState::default(),
        }
    }

    pub fn node_type(&self) -> NodeType {
        self.payload.node_type()
    }

    pub fn is_trashed(&self) -> bool {
        self.trash.is_trashed
    }

    pub fn editor(&self) -> Option<&EditorState> {
        self.payload.editor()
    }
}

/// Change to an optional field: leave it, clear it, or replace it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldPatch<T> {
    Keep,
    Clear,
    Set(T),
}

impl<T> Default for FieldPatch<T> {
    fn default() -> Self {
        FieldPatch::Keep
    }
}

impl<T> FieldPatch<T> {
    pub fn is_keep(&self) -> bool {
        matches!(self, FieldPatch::Keep)
    }

    pub fn apply_to(self, slot: &mut Option<T>) {
        match self {
            FieldPatch::Keep => {}
            FieldPatch::Clear => *slot = None,
            FieldPatch::Set(value) => *slot = Some(value),
        }
    }
}

/// Partial update of a Flow. `None` fields are left untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FlowPatch {
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "FieldPatch::is_keep")]
    pub kanban_data: FieldPatch<KanbanData>,
    pub position: Option<Position>,
}

/// Partial update of a Node. Text-bearing payloads only change through editor edits.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodePatch {
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "FieldPatch::is_keep")]
    pub style: FieldPatch<NodeStyle>,
    pub payload: Option<NodePayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EntityRecord {
    Flow(Flow),
    Node(Node),
}

impl EntityRecord {
    pub fn id(&self) -> EntityId {
        match self {
            EntityRecord::Flow(flow) => EntityId::Flow(flow.id),
            EntityRecord::Node(node) => EntityId::Node(node.id),
        }
    }
}

/// The value of one record at a point in time. `record = None` means absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordImage {
    pub id: EntityId,
    pub record: Option<EntityRecord>,
}
