//! # Transactions, Undo and Redo
//!
//! Every dispatched [`Mutation`](crate::graph::Mutation) becomes one [`Transaction`]
//! holding the before- and after-image of each record it touched. Undo writes the
//! before-images back, redo writes the after-images. Neither can fail: both are
//! plain record replacements, and the snapshot after redo is identical to the one
//! before undo.
//!
//! ```text
//!            dispatch                    undo
//!  graph ──────────────> undo stack ───────────> redo stack
//!    │                        ^                      │
//!    │ enqueue                └──────── redo ────────┘
//!    v
//!  ApiQueue (Forward / Undo / Redo entries)
//! ```
//!
//! ## Coalescing
//!
//! Text edits on the same node arriving within `flush_interval_ms` of the previous
//! one fold into the top transaction, so one undo step reverts a whole typing
//! burst. Any other dispatch, an undo or a redo closes the burst.

mod manager;
mod record;

pub use manager::TransactionManager;
pub use record::Transaction;
