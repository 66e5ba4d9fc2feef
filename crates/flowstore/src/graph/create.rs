use chrono::{DateTime, Utc};
use tracing::debug;

use super::GraphStore;
use crate::error::{FlowError, Result};
use crate::model::{EntityId, Flow, FlowAttrs, FlowId, Node, NodeAttrs, NodeId, NodeType};

impl GraphStore {
    /// Creates a Flow under `parent`, or a root Flow when `parent` is `None`.
    pub fn create_flow(
        &mut self,
        parent: Option<FlowId>,
        attrs: FlowAttrs,
        now: DateTime<Utc>,
    ) -> Result<Flow> {
        self.insert_flow(FlowId::new(), parent, attrs, now)
    }

    /// Creates a Node of `node_type` ("text", "note", "table", "kanban") under `parent`.
    pub fn create_node(
        &mut self,
        parent: FlowId,
        node_type: &str,
        attrs: NodeAttrs,
        now: DateTime<Utc>,
    ) -> Result<Node> {
        self.insert_node(NodeId::new(), parent, node_type, attrs, now)
    }

    pub(crate) fn insert_flow(
        &mut self,
        id: FlowId,
        parent: Option<FlowId>,
        attrs: FlowAttrs,
        now: DateTime<Utc>,
    ) -> Result<Flow> {
        if self.contains(EntityId::Flow(id)) {
            return Err(FlowError::AlreadyExists(EntityId::Flow(id)));
        }
        if let Some(parent_id) = parent {
            self.require_live_parent(&parent_id)?;
        }

        let flow = Flow::new(id, parent, attrs, now);
        self.put_flow(flow.clone());
        if let Some(parent_id) = parent {
            self.link(EntityId::Flow(id), parent_id, None)?;
        }
        debug!(flow = %id, parent = ?parent, "created flow");
        Ok(flow)
    }

    pub(crate) fn insert_node(
        &mut self,
        id: NodeId,
        parent: FlowId,
        node_type: &str,
        attrs: NodeAttrs,
        now: DateTime<Utc>,
    ) -> Result<Node> {
        let node_type: NodeType = node_type.parse()?;
        if self.contains(EntityId::Node(id)) {
            return Err(FlowError::AlreadyExists(EntityId::Node(id)));
        }
        self.require_live_parent(&parent)?;

        let node = Node::new(id, parent, node_type, attrs, now);
        self.put_node(node.clone());
        self.link(EntityId::Node(id), parent, None)?;
        debug!(node = %id, parent = %parent, node_type = %node_type, "created node");
        Ok(node)
    }

    pub(crate) fn require_live_parent(&self, parent: &FlowId) -> Result<()> {
        match self.get_flow_by_id(parent) {
            None => Err(FlowError::InvalidParent(format!("flow {} does not exist", parent))),
            Some(flow) if flow.is_trashed() => Err(FlowError::InvalidParent(format!(
                "flow {} is trashed",
                parent
            ))),
            Some(_) => Ok(()),
        }
    }
}
