//! # Flowstore Architecture
//!
//! Flowstore is the **document graph core** of a note/whiteboard tool. Content is
//! organized into nested Flows (canvases) holding Nodes (text, note, table, kanban
//! items); text-bearing Nodes embed a rich-text document. The presentation layer
//! reads from the core and dispatches mutations into it. Rendering, gestures and
//! the backend wire format live elsewhere.
//!
//! ## Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  RootStore (root.rs)                                        │
//! │  - Single surface for the UI: reads, dispatch, undo, redo   │
//! │  - Owns clock, config, notifier and the sync backend        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  TransactionManager (transaction/)                          │
//! │  - One reversible Transaction per dispatched Mutation       │
//! │  - Undo/redo stacks, text-edit coalescing                   │
//! │  - Feeds the ApiQueue (sync/)                               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  GraphStore (graph/)                                        │
//! │  - Arena of Flow and Node records                           │
//! │  - Validated, journaled mutations                           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  EditorState (editor/)                                      │
//! │  - Immutable rich-text value stored in text/note payloads   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Principle: Sync Never Blocks Mutation
//!
//! Mutations run synchronously and are visible as soon as `dispatch` returns.
//! Reconciling them with the backend happens later, through the async
//! [`sync::ApiQueue`]. A backend failure never rolls back local state; it is
//! retried with backoff and finally reported through [`notify::ChangeEvent::SyncFailed`].
//!
//! ## Testing Strategy
//!
//! 1. **Graph operations** (`graph/*.rs`): unit tests built on
//!    `graph::fixtures::GraphFixture`. Every failing operation is checked to
//!    leave the store unchanged.
//! 2. **Transactions and queue**: unit tests with explicit timestamps and
//!    [`sync::MemSyncBackend`] with scripted failures.
//! 3. **End to end** (`tests/`): scenarios through [`RootStore`] with a
//!    [`clock::ManualClock`].
//!
//! ## Module Overview
//!
//! - [`root`]: The composition root
//! - [`transaction`]: Transactions, undo/redo, coalescing
//! - [`sync`]: Outbound request queue and backend contract
//! - [`graph`]: Graph storage and operations
//! - [`editor`]: Rich-text editor state and edit primitives
//! - [`model`]: Core data types (`Flow`, `Node`, `EntityId`)
//! - [`persist`]: Snapshot save/load
//! - [`notify`]: Change notification
//! - [`config`]: Configuration management
//! - [`clock`]: Time source
//! - [`error`]: Error types

pub mod clock;
pub mod config;
pub mod editor;
pub mod error;
pub mod graph;
pub mod model;
pub mod notify;
pub mod persist;
pub mod root;
pub mod sync;
pub mod transaction;

pub use error::{FlowError, Result};
pub use root::RootStore;
