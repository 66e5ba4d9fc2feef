use chrono::{DateTime, Utc};
use tracing::debug;

use super::GraphStore;
use crate::error::{FlowError, Result};
use crate::model::{EntityId, FlowId};

impl GraphStore {
    /// Re-parents `entity` under `new_parent` at `index` (appended when `None`).
    ///
    /// Flows may move to the root (`new_parent = None`); Nodes always need a parent.
    /// Moving a Flow into itself or one of its descendants fails with
    /// [`FlowError::CycleDetected`]. Both child lists and the parent pointer are
    /// rewritten together or not at all.
    pub fn move_entity(
        &mut self,
        entity: EntityId,
        new_parent: Option<FlowId>,
        index: Option<usize>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        // 1. Validation
        let old_parent = match entity {
            EntityId::Flow(id) => {
                let flow = self.get_flow_by_id(&id).ok_or(FlowError::NotFound(entity))?;
                if flow.is_trashed() {
                    return Err(FlowError::Trashed(entity));
                }
                if let Some(target) = new_parent {
                    if target == id || self.is_descendant(&target, &id) {
                        return Err(FlowError::CycleDetected { flow: id, target });
                    }
                }
                flow.parent_flow_id
            }
            EntityId::Node(id) => {
                let node = self.get_node_by_id(&id).ok_or(FlowError::NotFound(entity))?;
                if node.is_trashed() {
                    return Err(FlowError::Trashed(entity));
                }
                if new_parent.is_none() {
                    return Err(FlowError::InvalidParent(format!(
                        "node {} needs a parent flow",
                        id
                    )));
                }
                Some(node.parent_flow_id)
            }
        };
        if let Some(target) = new_parent {
            self.require_live_parent(&target)?;
        }

        // 2. Re-link
        if let Some(old) = old_parent {
            self.unlink(entity, old)?;
        }
        if let Some(target) = new_parent {
            self.link(entity, target, index)?;
        }
        match entity {
            EntityId::Flow(id) => {
                let flow = self.flow_mut(&id)?;
                flow.parent_flow_id = new_parent;
                flow.updated_at = now;
            }
            EntityId::Node(id) => {
                let node = self.node_mut(&id)?;
                if let Some(target) = new_parent {
                    node.parent_flow_id = target;
                }
                node.updated_at = now;
            }
        }

        debug!(entity = %entity, from = ?old_parent, to = ?new_parent, "moved entity");
        Ok(())
    }
}
