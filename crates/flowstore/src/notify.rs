//! Change notification for the presentation layer.
//!
//! Subscribers register a callback and receive every [`ChangeEvent`] in the order
//! it was published. Callbacks run synchronously on the publishing thread, after
//! the state they describe is already visible.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::model::EntityId;
use crate::sync::EntryState;

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// Records were created, changed or removed.
    GraphChanged { entities: Vec<EntityId> },
    HistoryChanged { can_undo: bool, can_redo: bool },
    SyncStateChanged { seq: u64, state: EntryState },
    /// An entry exhausted its retries. Published once per exhaustion.
    SyncFailed {
        seq: u64,
        entities: Vec<EntityId>,
        error: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

#[derive(Default, Clone)]
pub struct Notifier {
    subscribers: Arc<Mutex<BTreeMap<SubscriptionId, Callback>>>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("subscribers", &self.subscribers.lock().len())
            .finish()
    }
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.lock().insert(id, Arc::new(callback));
        id
    }

    /// Returns false when `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.lock().remove(&id).is_some()
    }

    pub fn publish(&self, event: ChangeEvent) {
        // Snapshot so callbacks may subscribe or unsubscribe.
        let callbacks: Vec<Callback> = self.subscribers.lock().values().cloned().collect();
        for callback in callbacks {
            callback(&event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_receive_events_until_unsubscribed() {
        let notifier = Notifier::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let id = notifier.subscribe(move |e| sink.lock().push(e.clone()));

        let event = ChangeEvent::HistoryChanged {
            can_undo: true,
            can_redo: false,
        };
        notifier.publish(event.clone());
        assert!(notifier.unsubscribe(id));
        notifier.publish(event.clone());

        assert_eq!(*seen.lock(), vec![event]);
        assert!(!notifier.unsubscribe(id));
    }

    #[test]
    fn callback_may_unsubscribe_itself() {
        let notifier = Notifier::new();
        let inner = notifier.clone();
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let slot_in = slot.clone();
        let id = notifier.subscribe(move |_| {
            if let Some(id) = *slot_in.lock() {
                inner.unsubscribe(id);
            }
        });
        *slot.lock() = Some(id);

        notifier.publish(ChangeEvent::GraphChanged { entities: vec![] });
        assert_eq!(notifier.subscriber_count(), 0);
    }
}
