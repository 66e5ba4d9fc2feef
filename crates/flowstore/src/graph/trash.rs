use chrono::{DateTime, Utc};
use tracing::debug;

use super::GraphStore;
use crate::error::{FlowError, Result};
use crate::model::{EntityId, FlowId, TrashState};

impl GraphStore {
    fn trash_state(&self, id: EntityId) -> Result<&TrashState> {
        match id {
            EntityId::Flow(f) => self.get_flow_by_id(&f).map(|f| &f.trash),
            EntityId::Node(n) => self.get_node_by_id(&n).map(|n| &n.trash),
        }
        .ok_or(FlowError::NotFound(id))
    }

    fn set_trash_state(&mut self, id: EntityId, state: TrashState, now: DateTime<Utc>) -> Result<()> {
        match id {
            EntityId::Flow(f) => {
                let flow = self.flow_mut(&f)?;
                flow.trash = state;
                flow.updated_at = now;
            }
            EntityId::Node(n) => {
                let node = self.node_mut(&n)?;
                node.trash = state;
                node.updated_at = now;
            }
        }
        Ok(())
    }

    /// Moves `entity` to the trash. Trashing a Flow also trashes its live
    /// descendants, remembering that they were trashed through it.
    ///
    /// Returns every entity whose state changed.
    pub fn trash(&mut self, entity: EntityId, now: DateTime<Utc>) -> Result<Vec<EntityId>> {
        if self.trash_state(entity)?.is_trashed {
            return Err(FlowError::Trashed(entity));
        }

        let mut affected = vec![entity];
        self.set_trash_state(entity, TrashState::trashed(now, None), now)?;

        if let EntityId::Flow(flow) = entity {
            for descendant in self.descendants(&flow) {
                if self.is_trashed(descendant) == Some(false) {
                    self.set_trash_state(descendant, TrashState::trashed(now, Some(flow)), now)?;
                    affected.push(descendant);
                }
            }
        }

        debug!(entity = %entity, cascaded = affected.len() - 1, "trashed entity");
        Ok(affected)
    }

    /// Brings `entity` back from the trash together with the descendants its own
    /// trash cascaded to. Descendants trashed on their own stay trashed.
    pub fn restore(&mut self, entity: EntityId, now: DateTime<Utc>) -> Result<Vec<EntityId>> {
        if !self.trash_state(entity)?.is_trashed {
            return Err(FlowError::NotTrashed(entity));
        }
        if let Some(parent) = self.parent_of(entity) {
            self.require_live_parent(&parent)?;
        }

        let mut affected = vec![entity];
        self.set_trash_state(entity, TrashState::default(), now)?;

        if let EntityId::Flow(flow) = entity {
            for descendant in self.descendants(&flow) {
                if self.trash_state(descendant)?.trashed_via == Some(flow) {
                    self.set_trash_state(descendant, TrashState::default(), now)?;
                    affected.push(descendant);
                }
            }
        }

        debug!(entity = %entity, restored = affected.len(), "restored entity");
        Ok(affected)
    }

    /// Permanently removes a trashed entity, its subtree, and its slot in the
    /// parent's child list. Returns the removed entities.
    pub fn purge(&mut self, entity: EntityId) -> Result<Vec<EntityId>> {
        if !self.trash_state(entity)?.is_trashed {
            return Err(FlowError::NotTrashed(entity));
        }
        let removed = self.remove_subtree(entity)?;
        debug!(entity = %entity, removed = removed.len(), "purged entity");
        Ok(removed)
    }

    /// Removes `entity` and everything below it, detaching it from its parent.
    pub(crate) fn remove_subtree(&mut self, entity: EntityId) -> Result<Vec<EntityId>> {
        if !self.contains(entity) {
            return Err(FlowError::NotFound(entity));
        }

        let parent: Option<FlowId> = self
            .parent_of(entity)
            .filter(|p| self.get_flow_by_id(p).is_some());
        if let Some(parent) = parent {
            self.unlink(entity, parent)?;
        }

        let mut removed = vec![entity];
        if let EntityId::Flow(flow) = entity {
            removed.extend(self.descendants(&flow));
        }
        for id in &removed {
            self.take(*id);
        }
        Ok(removed)
    }
}
