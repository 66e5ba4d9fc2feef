use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::backend::SyncBackend;
use super::request::{ApiAction, ApiRequest, Direction};
use crate::config::{millis, SyncConfig};
use crate::graph::Mutation;
use crate::model::{EntityId, RecordImage};
use crate::notify::{ChangeEvent, Notifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Pending,
    InFlight,
    Acknowledged,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub state: EntryState,
    pub at: DateTime<Utc>,
    pub attempt: u32,
    pub error: Option<String>,
}

/// Retry schedule: `min(base * 2^(n-1), max)` after the n-th failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for RetryPolicy {
    fn from(config: &SyncConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_backoff_ms: config.base_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(32);
        let ms = self
            .base_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        millis(ms)
    }
}

/// Transitions kept per entry; older ones are dropped first.
pub const HISTORY_LIMIT: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub request: ApiRequest,
    pub state: EntryState,
    /// Attempts since the entry was enqueued or last re-armed.
    pub attempts: u32,
    /// Every transmission ever made, re-arms included.
    #[serde(default)]
    pub transmissions: u32,
    pub not_before: Option<DateTime<Utc>>,
    /// Retries are used up; the entry waits for [`ApiQueue::retry_exhausted`].
    pub exhausted: bool,
    pub history: Vec<Transition>,
}

impl QueueEntry {
    fn new(request: ApiRequest, now: DateTime<Utc>) -> Self {
        Self {
            request,
            state: EntryState::Pending,
            attempts: 0,
            transmissions: 0,
            not_before: None,
            exhausted: false,
            history: vec![Transition {
                state: EntryState::Pending,
                at: now,
                attempt: 0,
                error: None,
            }],
        }
    }

    pub fn seq(&self) -> u64 {
        self.request.seq
    }

    /// Never transmitted, so its payload may still be replaced.
    pub fn is_unsent(&self) -> bool {
        self.transmissions == 0
    }

    pub fn states(&self) -> Vec<EntryState> {
        self.history.iter().map(|t| t.state).collect()
    }

    fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.exhausted && self.not_before.map_or(true, |at| at <= now)
    }

    fn transition(&mut self, state: EntryState, now: DateTime<Utc>, error: Option<String>) {
        self.state = state;
        self.history.push(Transition {
            state,
            at: now,
            attempt: self.attempts,
            error,
        });
        let excess = self.history.len().saturating_sub(HISTORY_LIMIT);
        self.history.drain(..excess);
    }
}

/// What one pump pass did.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PumpReport {
    pub sent: usize,
    /// Entries acknowledged in this pass, with their final history.
    pub acknowledged: Vec<QueueEntry>,
    pub failed: Vec<u64>,
    pub exhausted: Vec<u64>,
}

impl PumpReport {
    pub fn merge(&mut self, other: PumpReport) {
        self.sent += other.sent;
        self.acknowledged.extend(other.acknowledged);
        self.failed.extend(other.failed);
        self.exhausted.extend(other.exhausted);
    }
}

/// Ordered outbound queue of requests awaiting acknowledgment.
///
/// Entries are visited in enqueue order. An entry is held back while an earlier
/// unacknowledged entry touches one of its entities, so requests on one lineage
/// reach the backend in order while unrelated lineages keep flowing past a
/// failing one.
#[derive(Debug)]
pub struct ApiQueue {
    instance: String,
    next_seq: u64,
    acked_watermark: u64,
    entries: Vec<QueueEntry>,
    policy: RetryPolicy,
    notifier: Notifier,
}

impl ApiQueue {
    pub fn new(policy: RetryPolicy, notifier: Notifier) -> Self {
        Self {
            instance: Uuid::new_v4().simple().to_string(),
            next_seq: 1,
            acked_watermark: 0,
            entries: Vec::new(),
            policy,
            notifier,
        }
    }

    /// Rebuilds a queue from persisted parts. Entries at or below `acked_watermark`
    /// were already acknowledged and are dropped; interrupted transmissions go back
    /// to pending.
    pub fn resume(
        instance: String,
        next_seq: u64,
        acked_watermark: u64,
        entries: Vec<QueueEntry>,
        policy: RetryPolicy,
        notifier: Notifier,
        now: DateTime<Utc>,
    ) -> Self {
        let entries = entries
            .into_iter()
            .filter(|e| e.seq() > acked_watermark)
            .map(|mut e| {
                if e.state == EntryState::InFlight {
                    e.transition(EntryState::Pending, now, Some("interrupted".into()));
                }
                e
            })
            .collect::<Vec<_>>();
        let next_seq = entries
            .iter()
            .map(|e| e.seq() + 1)
            .chain([next_seq, acked_watermark + 1])
            .max()
            .unwrap_or(1);
        Self {
            instance,
            next_seq,
            acked_watermark,
            entries,
            policy,
            notifier,
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Every seq at or below this value has been acknowledged.
    pub fn acked_watermark(&self) -> u64 {
        self.acked_watermark
    }

    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    pub fn entry(&self, seq: u64) -> Option<&QueueEntry> {
        self.entries.iter().find(|e| e.seq() == seq)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Appends a request describing transaction `tx_seq`. Returns its seq.
    pub fn enqueue(
        &mut self,
        tx_seq: u64,
        direction: Direction,
        target: EntityId,
        mutations: Vec<Mutation>,
        before: &[RecordImage],
        after: Vec<RecordImage>,
        now: DateTime<Utc>,
    ) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;

        let action = ApiAction::between(
            before.iter().find(|i| i.id == target),
            after.iter().find(|i| i.id == target),
        );
        let request = ApiRequest {
            idempotency_key: format!("{}-{}", self.instance, seq),
            seq,
            tx_seq,
            direction,
            action,
            target,
            mutations,
            records: after,
        };

        debug!(seq, tx_seq, ?direction, ?action, target = %target, "enqueued request");
        self.entries.push(QueueEntry::new(request, now));
        self.notifier.publish(ChangeEvent::SyncStateChanged {
            seq,
            state: EntryState::Pending,
        });
        seq
    }

    /// Replaces the payload of an entry that was never transmitted. Returns false
    /// when the entry is gone or already went out; the caller must enqueue instead.
    pub fn supersede(&mut self, seq: u64, extra: Vec<Mutation>, after: Vec<RecordImage>) -> bool {
        let Some(entry) = self.entries.iter_mut().find(|e| e.seq() == seq) else {
            return false;
        };
        if !entry.is_unsent() {
            return false;
        }
        entry.request.mutations.extend(extra);
        entry.request.records = after;
        debug!(seq, "superseded pending request");
        true
    }

    /// Re-arms entries that used up their retries. Returns how many.
    pub fn retry_exhausted(&mut self, now: DateTime<Utc>) -> usize {
        let mut count = 0;
        for entry in self.entries.iter_mut().filter(|e| e.exhausted) {
            entry.exhausted = false;
            entry.attempts = 0;
            entry.not_before = None;
            entry.transition(EntryState::Pending, now, None);
            count += 1;
        }
        if count > 0 {
            info!(count, "re-armed exhausted requests");
        }
        count
    }

    /// Seqs of entries that may be transmitted at `now`, in order.
    pub fn transmittable(&self, now: DateTime<Utc>) -> Vec<u64> {
        let mut blocked: BTreeSet<EntityId> = BTreeSet::new();
        let mut ready = Vec::new();
        for entry in &self.entries {
            let lineage = entry.request.entities();
            if lineage.is_disjoint(&blocked) && entry.is_due(now) {
                ready.push(entry.seq());
            }
            blocked.extend(lineage);
        }
        ready
    }

    /// Earliest time at which some entry could be sent, `None` when nothing can
    /// make progress without outside help.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        let mut blocked: BTreeSet<EntityId> = BTreeSet::new();
        let mut earliest: Option<DateTime<Utc>> = None;
        for entry in &self.entries {
            let lineage = entry.request.entities();
            if lineage.is_disjoint(&blocked) && !entry.exhausted {
                let due = entry.not_before.unwrap_or(DateTime::<Utc>::MIN_UTC);
                earliest = Some(earliest.map_or(due, |e| e.min(due)));
            }
            blocked.extend(lineage);
        }
        earliest
    }

    /// One pass over the queue: transmits every entry that is transmittable when
    /// reached, in order, and records the outcome.
    pub async fn pump(&mut self, backend: &dyn SyncBackend, now: DateTime<Utc>) -> PumpReport {
        let mut report = PumpReport::default();
        let mut blocked: BTreeSet<EntityId> = BTreeSet::new();
        let mut index = 0;

        while index < self.entries.len() {
            let lineage = self.entries[index].request.entities();
            if !lineage.is_disjoint(&blocked) || !self.entries[index].is_due(now) {
                blocked.extend(lineage);
                index += 1;
                continue;
            }

            let request = {
                let entry = &mut self.entries[index];
                entry.attempts += 1;
                entry.transmissions += 1;
                entry.transition(EntryState::InFlight, now, None);
                entry.request.clone()
            };
            self.notifier.publish(ChangeEvent::SyncStateChanged {
                seq: request.seq,
                state: EntryState::InFlight,
            });
            report.sent += 1;

            match backend.transmit(&request).await {
                Ok(ack) => {
                    let mut entry = self.entries.remove(index);
                    entry.transition(EntryState::Acknowledged, now, None);
                    entry.not_before = None;
                    debug!(seq = request.seq, replayed = ack.replayed, "request acknowledged");
                    self.advance_watermark();
                    self.notifier.publish(ChangeEvent::SyncStateChanged {
                        seq: request.seq,
                        state: EntryState::Acknowledged,
                    });
                    report.acknowledged.push(entry);
                }
                Err(error) => {
                    let policy = self.policy;
                    let entry = &mut self.entries[index];
                    entry.transition(EntryState::Failed, now, Some(error.to_string()));
                    entry.not_before = Some(
                        now.checked_add_signed(policy.backoff(entry.attempts))
                            .unwrap_or(DateTime::<Utc>::MAX_UTC),
                    );
                    let attempts = entry.attempts;
                    report.failed.push(request.seq);
                    self.notifier.publish(ChangeEvent::SyncStateChanged {
                        seq: request.seq,
                        state: EntryState::Failed,
                    });

                    if attempts >= policy.max_attempts {
                        let entry = &mut self.entries[index];
                        entry.exhausted = true;
                        entry.not_before = None;
                        warn!(seq = request.seq, attempts, error = %error, "request exhausted its retries");
                        report.exhausted.push(request.seq);
                        self.notifier.publish(ChangeEvent::SyncFailed {
                            seq: request.seq,
                            entities: lineage.iter().copied().collect(),
                            error: error.to_string(),
                        });
                    } else {
                        warn!(seq = request.seq, attempts, error = %error, "request failed, will retry");
                    }
                    blocked.extend(lineage);
                    index += 1;
                }
            }
        }
        report
    }

    fn advance_watermark(&mut self) {
        let watermark = self
            .entries
            .iter()
            .map(|e| e.seq())
            .min()
            .map(|lowest| lowest - 1)
            .unwrap_or(self.next_seq - 1);
        self.acked_watermark = self.acked_watermark.max(watermark);
    }
}
