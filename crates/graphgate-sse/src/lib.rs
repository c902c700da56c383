//! Server-Sent-Events plumbing for long-running operations.
//!
//! Workers publish [`OperationEvent`]s to the [`OperationBus`]; HTTP handlers
//! subscribe by operation id and receive the persisted history followed by
//! live events. Publishing is fire-and-forget behind a failure-counting
//! breaker, and subscriptions are bounded per user.

pub mod bus;
pub mod events;
pub mod limits;

pub use bus::{OperationBus, OperationHandle, Subscription};
pub use events::{EventType, OperationEvent};
pub use limits::{ConnectionError, ConnectionGuard, ConnectionLimits};
