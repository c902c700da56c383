//! Robustness layer for the graphgate query gateway.
//!
//! Four guards sit in front of every query:
//! - a per-`(graph, operation)` [`CircuitBreakerManager`] that fails fast when
//!   an engine keeps erroring,
//! - a [`TimeoutCoordinator`] deriving the cascaded endpoint/queue/execution
//!   timeout budget,
//! - an [`AdmissionController`] shedding load before work is queued,
//! - a [`SlidingLogRateLimiter`] throttling included shared-repository reads.

pub mod admission;
pub mod circuit;
pub mod events;
pub mod ratelimit;
pub mod timeout;

pub use admission::{
    AdmissionController, AdmissionDecision, AdmissionHealth, RejectReason, StaticPressure,
    SystemPressureSource,
};
pub use circuit::{
    CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerManager, CircuitError,
    CircuitSnapshot,
};
pub use events::{AdmissionEvent, CircuitBreakerEvent};
pub use ratelimit::{RateLimitExceeded, SlidingLogRateLimiter};
pub use timeout::{TimeoutBudget, TimeoutContext, TimeoutCoordinator};
