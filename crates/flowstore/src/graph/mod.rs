//! # Graph Store
//!
//! The in-memory authoritative store of every [`Flow`] and [`Node`].
//!
//! ## Arena Storage
//!
//! Records live in two flat maps keyed by id. Containment is expressed by ids only:
//! a Flow lists its children (`child_flow_ids`, `child_node_ids`) and every child
//! points back through `parent_flow_id`. Moving or detaching an entity is an index
//! rewrite on at most three records; cycle detection is a walk up parent ids.
//!
//! ## Operations
//!
//! Each operation lives in its own submodule and is implemented as an
//! `impl GraphStore` block:
//!
//! - [`create`]: `create_flow`, `create_node`
//! - [`move_entity`]: re-parenting with cycle detection
//! - [`trash`]: `trash`, `restore`, `purge`
//! - [`update`]: attribute patches and rich-text edits
//! - [`mutation`]: the [`Mutation`] description and [`GraphStore::apply`]
//!
//! Every operation validates before it writes. A failed call leaves the store
//! exactly as it was.
//!
//! ## Journaling
//!
//! All writes go through a small set of accessors (`flow_mut`, `node_mut`,
//! `put_flow`, ...). While a journal is open they record the first before-image
//! of each record they touch. [`GraphStore::apply`] opens a journal around a
//! mutation and hands back before- and after-images, which is all the
//! transaction layer needs to undo and redo.

use std::collections::{HashMap, HashSet};

use crate::error::{FlowError, Result};
use crate::model::{EntityId, EntityRecord, Flow, FlowId, Node, NodeId, RecordImage};

pub mod create;
pub mod move_entity;
pub mod mutation;
pub mod trash;
pub mod update;

#[cfg(any(test, feature = "test_utils"))]
pub mod fixtures;

pub use mutation::{Applied, Mutation, Outcome};

#[derive(Debug, Default, Clone)]
struct Journal {
    before: Vec<RecordImage>,
    seen: HashSet<EntityId>,
}

#[derive(Debug, Default, Clone)]
pub struct GraphStore {
    flows: HashMap<FlowId, Flow>,
    nodes: HashMap<NodeId, Node>,
    journal: Option<Journal>,
}

impl PartialEq for GraphStore {
    fn eq(&self, other: &Self) -> bool {
        self.flows == other.flows && self.nodes == other.nodes
    }
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a store from persisted records, rejecting inconsistent graphs.
    pub fn from_records(records: Vec<EntityRecord>) -> Result<Self> {
        let mut store = Self::new();
        for record in records {
            match record {
                EntityRecord::Flow(flow) => {
                    store.flows.insert(flow.id, flow);
                }
                EntityRecord::Node(node) => {
                    store.nodes.insert(node.id, node);
                }
            }
        }
        let violations = store.check_invariants();
        if let Some(first) = violations.into_iter().next() {
            return Err(FlowError::InvalidParent(first));
        }
        Ok(store)
    }

    /// All records, flows first, each group ordered by creation time.
    pub fn records(&self) -> Vec<EntityRecord> {
        let mut flows: Vec<&Flow> = self.flows.values().collect();
        flows.sort_by_key(|f| (f.created_at, f.id));
        let mut nodes: Vec<&Node> = self.nodes.values().collect();
        nodes.sort_by_key(|n| (n.created_at, n.id));
        flows
            .into_iter()
            .map(|f| EntityRecord::Flow(f.clone()))
            .chain(nodes.into_iter().map(|n| EntityRecord::Node(n.clone())))
            .collect()
    }

    // --- Queries ---

    pub fn get_flow_by_id(&self, id: &FlowId) -> Option<&Flow> {
        self.flows.get(id)
    }

    pub fn get_node_by_id(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        match id {
            EntityId::Flow(f) => self.flows.contains_key(&f),
            EntityId::Node(n) => self.nodes.contains_key(&n),
        }
    }

    pub fn is_trashed(&self, id: EntityId) -> Option<bool> {
        match id {
            EntityId::Flow(f) => self.flows.get(&f).map(|f| f.is_trashed()),
            EntityId::Node(n) => self.nodes.get(&n).map(|n| n.is_trashed()),
        }
    }

    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// A Flow that exists and is not trashed.
    pub fn live_flow(&self, id: &FlowId) -> Option<&Flow> {
        self.flows.get(id).filter(|f| !f.is_trashed())
    }

    /// Live root flows, oldest first.
    pub fn root_flows(&self) -> Vec<&Flow> {
        let mut roots: Vec<&Flow> = self
            .flows
            .values()
            .filter(|f| f.is_root() && !f.is_trashed())
            .collect();
        roots.sort_by_key(|f| (f.created_at, f.id));
        roots
    }

    /// Live child slots of a Flow, flows first, in list order.
    pub fn children(&self, flow: &FlowId) -> Vec<EntityId> {
        let Some(flow) = self.flows.get(flow) else {
            return Vec::new();
        };
        flow.children()
            .into_iter()
            .filter(|id| self.is_trashed(*id) == Some(false))
            .collect()
    }

    /// Entities trashed directly, most recently trashed first. Entities trashed only
    /// because an ancestor was trashed are not listed on their own.
    pub fn trashed(&self) -> Vec<EntityId> {
        let mut items: Vec<(chrono::DateTime<chrono::Utc>, EntityId)> = self
            .flows
            .values()
            .filter(|f| f.is_trashed() && f.trash.trashed_via.is_none())
            .map(|f| (f.trash.trashed_at.unwrap_or(f.updated_at), EntityId::Flow(f.id)))
            .chain(
                self.nodes
                    .values()
                    .filter(|n| n.is_trashed() && n.trash.trashed_via.is_none())
                    .map(|n| (n.trash.trashed_at.unwrap_or(n.updated_at), EntityId::Node(n.id))),
            )
            .collect();
        items.sort_by(|a, b| b.cmp(a));
        items.into_iter().map(|(_, id)| id).collect()
    }

    /// Every entity below `flow`, trashed or not, in pre-order.
    pub fn descendants(&self, flow: &FlowId) -> Vec<EntityId> {
        let mut out = Vec::new();
        let mut stack: Vec<EntityId> = match self.flows.get(flow) {
            Some(f) => f.children().into_iter().rev().collect(),
            None => return out,
        };
        while let Some(id) = stack.pop() {
            if let EntityId::Flow(fid) = id {
                if let Some(f) = self.flows.get(&fid) {
                    stack.extend(f.children().into_iter().rev());
                }
            }
            out.push(id);
        }
        out
    }

    /// Parent chain of an entity, nearest first.
    pub fn ancestors(&self, id: EntityId) -> Vec<FlowId> {
        let mut out = Vec::new();
        let mut current = self.parent_of(id);
        while let Some(parent) = current {
            // A corrupt graph must not loop forever.
            if out.contains(&parent) || out.len() > self.flows.len() {
                break;
            }
            out.push(parent);
            current = self.flows.get(&parent).and_then(|f| f.parent_flow_id);
        }
        out
    }

    /// Whether `candidate` lies strictly below `ancestor`.
    pub fn is_descendant(&self, candidate: &FlowId, ancestor: &FlowId) -> bool {
        self.ancestors(EntityId::Flow(*candidate)).contains(ancestor)
    }

    pub fn parent_of(&self, id: EntityId) -> Option<FlowId> {
        match id {
            EntityId::Flow(f) => self.flows.get(&f).and_then(|f| f.parent_flow_id),
            EntityId::Node(n) => self.nodes.get(&n).map(|n| n.parent_flow_id),
        }
    }

    pub fn image(&self, id: EntityId) -> RecordImage {
        let record = match id {
            EntityId::Flow(f) => self.flows.get(&f).cloned().map(EntityRecord::Flow),
            EntityId::Node(n) => self.nodes.get(&n).cloned().map(EntityRecord::Node),
        };
        RecordImage { id, record }
    }

    /// Writes record images back verbatim; `record = None` removes the entity.
    pub fn restore_images(&mut self, images: &[RecordImage]) {
        for image in images {
            match (&image.record, image.id) {
                (Some(EntityRecord::Flow(flow)), _) => {
                    self.flows.insert(flow.id, flow.clone());
                }
                (Some(EntityRecord::Node(node)), _) => {
                    self.nodes.insert(node.id, node.clone());
                }
                (None, EntityId::Flow(id)) => {
                    self.flows.remove(&id);
                }
                (None, EntityId::Node(id)) => {
                    self.nodes.remove(&id);
                }
            }
        }
    }

    /// Lists structural violations; an empty list means the graph is a consistent forest.
    pub fn check_invariants(&self) -> Vec<String> {
        let mut violations = Vec::new();

        for flow in self.flows.values() {
            if let Some(parent_id) = flow.parent_flow_id {
                match self.flows.get(&parent_id) {
                    None => violations.push(format!("flow {} has missing parent {}", flow.id, parent_id)),
                    Some(parent) => {
                        if parent.child_flow_ids.iter().filter(|c| **c == flow.id).count() != 1 {
                            violations.push(format!("flow {} not listed once by parent {}", flow.id, parent_id));
                        }
                        if !flow.is_trashed() && parent.is_trashed() {
                            violations.push(format!("live flow {} under trashed {}", flow.id, parent_id));
                        }
                    }
                }
            }
            for child in &flow.child_flow_ids {
                if self.flows.get(child).and_then(|c| c.parent_flow_id) != Some(flow.id) {
                    violations.push(format!("flow {} lists foreign child flow {}", flow.id, child));
                }
            }
            for child in &flow.child_node_ids {
                if self.nodes.get(child).map(|c| c.parent_flow_id) != Some(flow.id) {
                    violations.push(format!("flow {} lists foreign child node {}", flow.id, child));
                }
            }
            let ancestors = self.ancestors(EntityId::Flow(flow.id));
            if ancestors.contains(&flow.id) || ancestors.len() > self.flows.len() {
                violations.push(format!("flow {} is its own ancestor", flow.id));
            }
        }

        for node in self.nodes.values() {
            match self.flows.get(&node.parent_flow_id) {
                None => violations.push(format!("node {} has missing parent {}", node.id, node.parent_flow_id)),
                Some(parent) => {
                    if parent.child_node_ids.iter().filter(|c| **c == node.id).count() != 1 {
                        violations.push(format!("node {} not listed once by parent {}", node.id, parent.id));
                    }
                    if !node.is_trashed() && parent.is_trashed() {
                        violations.push(format!("live node {} under trashed {}", node.id, parent.id));
                    }
                }
            }
        }

        violations
    }

    // --- Journaled writes ---

    fn record(&mut self, id: EntityId) {
        let image = match &self.journal {
            Some(journal) if !journal.seen.contains(&id) => self.image(id),
            _ => return,
        };
        if let Some(journal) = &mut self.journal {
            journal.seen.insert(id);
            journal.before.push(image);
        }
    }

    pub(crate) fn flow_mut(&mut self, id: &FlowId) -> Result<&mut Flow> {
        self.record(EntityId::Flow(*id));
        self.flows
            .get_mut(id)
            .ok_or(FlowError::NotFound(EntityId::Flow(*id)))
    }

    pub(crate) fn node_mut(&mut self, id: &NodeId) -> Result<&mut Node> {
        self.record(EntityId::Node(*id));
        self.nodes
            .get_mut(id)
            .ok_or(FlowError::NotFound(EntityId::Node(*id)))
    }

    pub(crate) fn put_flow(&mut self, flow: Flow) {
        self.record(EntityId::Flow(flow.id));
        self.flows.insert(flow.id, flow);
    }

    pub(crate) fn put_node(&mut self, node: Node) {
        self.record(EntityId::Node(node.id));
        self.nodes.insert(node.id, node);
    }

    pub(crate) fn take(&mut self, id: EntityId) {
        self.record(id);
        match id {
            EntityId::Flow(f) => {
                self.flows.remove(&f);
            }
            EntityId::Node(n) => {
                self.nodes.remove(&n);
            }
        }
    }

    pub(crate) fn begin_journal(&mut self) {
        self.journal = Some(Journal::default());
    }

    /// Closes the journal, returning the before-images it collected.
    pub(crate) fn end_journal(&mut self) -> Vec<RecordImage> {
        self.journal.take().map(|j| j.before).unwrap_or_default()
    }

    /// Detaches `child` from its parent's child list.
    pub(crate) fn unlink(&mut self, child: EntityId, parent: FlowId) -> Result<usize> {
        let flow = self.flow_mut(&parent)?;
        let position = match child {
            EntityId::Flow(id) => {
                let pos = flow.child_flow_ids.iter().position(|c| *c == id);
                if let Some(pos) = pos {
                    flow.child_flow_ids.remove(pos);
                }
                pos
            }
            EntityId::Node(id) => {
                let pos = flow.child_node_ids.iter().position(|c| *c == id);
                if let Some(pos) = pos {
                    flow.child_node_ids.remove(pos);
                }
                pos
            }
        };
        position.ok_or_else(|| {
            FlowError::InvalidParent(format!("{} is not listed under flow {}", child, parent))
        })
    }

    /// Inserts `child` into `parent`'s child list at `index` (clamped), or appends.
    pub(crate) fn link(&mut self, child: EntityId, parent: FlowId, index: Option<usize>) -> Result<()> {
        let flow = self.flow_mut(&parent)?;
        match child {
            EntityId::Flow(id) => {
                let at = index.unwrap_or(flow.child_flow_ids.len()).min(flow.child_flow_ids.len());
                flow.child_flow_ids.insert(at, id);
            }
            EntityId::Node(id) => {
                let at = index.unwrap_or(flow.child_node_ids.len()).min(flow.child_node_ids.len());
                flow.child_node_ids.insert(at, id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::GraphFixture;
    use super::*;

    #[test]
    fn lookups_return_none_when_absent() {
        let store = GraphStore::new();
        assert!(store.get_flow_by_id(&FlowId::new()).is_none());
        assert!(store.get_node_by_id(&NodeId::new()).is_none());
        assert!(store.root_flows().is_empty());
    }

    #[test]
    fn descendants_are_listed_in_pre_order() {
        let fx = GraphFixture::new()
            .flow("F1", None)
            .flow("F2", Some("F1"))
            .node("N2", "F2", "text")
            .node("N1", "F1", "note");
        let store = &fx.store;

        assert_eq!(
            store.descendants(&fx.flow_id("F1")),
            vec![
                EntityId::Flow(fx.flow_id("F2")),
                EntityId::Node(fx.node_id("N2")),
                EntityId::Node(fx.node_id("N1")),
            ]
        );
        assert_eq!(
            store.ancestors(EntityId::Node(fx.node_id("N2"))),
            vec![fx.flow_id("F2"), fx.flow_id("F1")]
        );
        assert!(store.is_descendant(&fx.flow_id("F2"), &fx.flow_id("F1")));
        assert!(!store.is_descendant(&fx.flow_id("F1"), &fx.flow_id("F2")));
    }

    #[test]
    fn records_round_trip_through_from_records() {
        let fx = GraphFixture::new()
            .flow("F1", None)
            .flow("F2", Some("F1"))
            .node("N1", "F2", "table");
        let rebuilt = GraphStore::from_records(fx.store.records()).unwrap();
        assert_eq!(rebuilt, fx.store);
    }

    #[test]
    fn from_records_rejects_dangling_children() {
        let fx = GraphFixture::new().flow("F1", None).node("N1", "F1", "text");
        let records: Vec<EntityRecord> = fx
            .store
            .records()
            .into_iter()
            .filter(|r| matches!(r, EntityRecord::Node(_)))
            .collect();
        assert!(GraphStore::from_records(records).is_err());
    }

    #[test]
    fn check_invariants_reports_broken_back_links() {
        let mut fx = GraphFixture::new().flow("F1", None).node("N1", "F1", "text");
        assert!(fx.store.check_invariants().is_empty());

        let f1 = fx.flow_id("F1");
        fx.store.flow_mut(&f1).unwrap().child_node_ids.clear();
        assert_eq!(fx.store.check_invariants().len(), 1);
    }

    #[test]
    fn journal_captures_first_image_only() {
        let mut fx = GraphFixture::new().flow("F1", None);
        let f1 = fx.flow_id("F1");
        let original = fx.store.image(EntityId::Flow(f1));

        fx.store.begin_journal();
        fx.store.flow_mut(&f1).unwrap().title = "one".into();
        fx.store.flow_mut(&f1).unwrap().title = "two".into();
        let before = fx.store.end_journal();

        assert_eq!(before, vec![original]);
    }

    #[test]
    fn restore_images_removes_absent_records() {
        let mut fx = GraphFixture::new().flow("F1", None);
        let f1 = fx.flow_id("F1");
        fx.store.restore_images(&[RecordImage {
            id: EntityId::Flow(f1),
            record: None,
        }]);
        assert!(fx.store.get_flow_by_id(&f1).is_none());
    }
}
