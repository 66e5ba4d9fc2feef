use chrono::{DateTime, Duration, Utc};

use crate::graph::{Applied, Mutation};
use crate::model::{EntityId, RecordImage};

/// A reversible record of one dispatched mutation (or batch).
///
/// `before` and `after` hold one image per touched record, in the same order.
/// Undo writes `before` back, redo writes `after`.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    /// Local transaction number; persisted with the store so it never repeats.
    pub seq: u64,
    pub forward: Vec<Mutation>,
    pub before: Vec<RecordImage>,
    pub after: Vec<RecordImage>,
    /// Time of the latest mutation folded into this transaction.
    pub at: DateTime<Utc>,
    /// Queue entry that last reported this transaction to the backend.
    pub(crate) queue_seq: Option<u64>,
}

impl Transaction {
    pub(crate) fn new(seq: u64, forward: Vec<Mutation>, applied: &Applied, at: DateTime<Utc>) -> Self {
        Self {
            seq,
            forward,
            before: applied.before.clone(),
            after: applied.after.clone(),
            at,
            queue_seq: None,
        }
    }

    pub fn touched(&self) -> Vec<EntityId> {
        self.before.iter().map(|image| image.id).collect()
    }

    /// The entity the transaction is addressed to.
    pub fn target(&self) -> Option<EntityId> {
        self.forward.first().map(|m| m.target())
    }

    /// Whether `mutation` at `now` continues this transaction's typing burst.
    pub(crate) fn accepts(&self, mutation: &Mutation, now: DateTime<Utc>, window: Duration) -> bool {
        let Mutation::EditText { node, .. } = mutation else {
            return false;
        };
        let same_node = self
            .forward
            .iter()
            .all(|m| matches!(m, Mutation::EditText { node: n, .. } if n == node));
        let elapsed = now - self.at;
        same_node && elapsed >= Duration::zero() && elapsed <= window
    }

    /// Folds a later mutation in: the earliest before-image and the latest
    /// after-image of each record are kept.
    pub(crate) fn absorb(&mut self, mutation: Mutation, applied: &Applied, at: DateTime<Utc>) {
        for image in &applied.before {
            if !self.before.iter().any(|b| b.id == image.id) {
                self.before.push(image.clone());
            }
        }
        self.after = self
            .before
            .iter()
            .map(|b| {
                applied
                    .after
                    .iter()
                    .chain(self.after.iter())
                    .find(|a| a.id == b.id)
                    .cloned()
                    .unwrap_or_else(|| b.clone())
            })
            .collect();
        self.forward.push(mutation);
        self.at = at;
    }
}
