//! Bounded, priority-aware query queue.
//!
//! Queries are admitted through the admission controller, ordered by
//! `(priority desc, submitted asc)`, and dispatched by a single background
//! worker to at most `max_concurrent` execution tasks. Per-user counts are
//! the queue's authoritative fairness state.

pub mod query;
pub mod queue;

pub use query::{QueryStatus, QueuedQuery};
pub use queue::{
    ExecutionMode, QueryExecutor, QueryQueue, QueueStats, QueueStatus, SubmitError,
};
