use chrono::{DateTime, Utc};

use super::GraphStore;
use crate::model::{FlowAttrs, FlowId, NodeAttrs, NodeId};
use std::collections::HashMap;

/// Builds small graphs by name for tests.
pub struct GraphFixture {
    pub store: GraphStore,
    /// Timestamp used for every operation the fixture performs.
    pub now: DateTime<Utc>,
    flows: HashMap<String, FlowId>,
    nodes: HashMap<String, NodeId>,
}

impl Default for GraphFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphFixture {
    pub fn new() -> Self {
        Self {
            store: GraphStore::new(),
            now: Utc::now(),
            flows: HashMap::new(),
            nodes: HashMap::new(),
        }
    }

    pub fn flow(mut self, name: &str, parent: Option<&str>) -> Self {
        let parent = parent.map(|p| self.flow_id(p));
        let flow = self
            .store
            .create_flow(parent, FlowAttrs::titled(name), self.now)
            .unwrap();
        self.flows.insert(name.to_string(), flow.id);
        self
    }

    pub fn node(mut self, name: &str, parent: &str, node_type: &str) -> Self {
        let parent = self.flow_id(parent);
        let node = self
            .store
            .create_node(parent, node_type, NodeAttrs::default(), self.now)
            .unwrap();
        self.nodes.insert(name.to_string(), node.id);
        self
    }

    pub fn flow_id(&self, name: &str) -> FlowId {
        *self
            .flows
            .get(name)
            .unwrap_or_else(|| panic!("no fixture flow named {}", name))
    }

    pub fn node_id(&self, name: &str) -> NodeId {
        *self
            .nodes
            .get(name)
            .unwrap_or_else(|| panic!("no fixture node named {}", name))
    }
}
