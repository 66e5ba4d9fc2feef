//! # Sync: reconciling local transactions with the backend
//!
//! Every transaction, undo and redo enqueues an [`ApiRequest`] on the [`ApiQueue`].
//! The queue is drained by [`ApiQueue::pump`] against a [`SyncBackend`].
//!
//! ## Entry Lifecycle
//!
//! ```text
//! Pending ──> InFlight ──> Acknowledged (discarded, watermark advances)
//!    ^            │
//!    │            v
//!    └──────── Failed ──(max_attempts)──> exhausted, SyncFailed published
//! ```
//!
//! A failed entry waits `min(base * 2^(n-1), max)` before its next attempt. Its
//! idempotency key is fixed at enqueue time, so a request the backend applied but
//! failed to acknowledge is not applied twice.
//!
//! ## Ordering
//!
//! Entries are sent in enqueue order, except that an entry whose entities (its
//! lineage) overlap an earlier unacknowledged entry is held back. One failing
//! entity therefore stalls only the requests that depend on it.
//!
//! Undo and redo never cancel sent requests; they enqueue new ones carrying the
//! restored record images.

pub mod backend;
pub mod queue;
pub mod request;

pub use backend::{MemSyncBackend, SyncBackend};
pub use queue::{ApiQueue, EntryState, PumpReport, QueueEntry, RetryPolicy, Transition};
pub use request::{ApiAction, ApiRequest, Direction, SyncAck, SyncError};
