//! Events emitted by the robustness layer.

use graphgate_core::GatewayEvent;
use std::time::Instant;

/// Circuit breaker lifecycle events, keyed by `"<graph>:<operation>"`.
#[derive(Debug, Clone)]
pub enum CircuitBreakerEvent {
    /// The circuit for a key changed state.
    StateTransition {
        source_name: String,
        key: String,
        timestamp: Instant,
        opened: bool,
    },
    /// A call was rejected because the circuit is open.
    CallRejected {
        source_name: String,
        key: String,
        timestamp: Instant,
        retry_after_seconds: u64,
    },
    /// A failure was recorded against a key.
    FailureRecorded {
        source_name: String,
        key: String,
        timestamp: Instant,
        failure_count: u32,
    },
    /// A success was recorded against a key.
    SuccessRecorded {
        source_name: String,
        key: String,
        timestamp: Instant,
    },
}

impl GatewayEvent for CircuitBreakerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CircuitBreakerEvent::StateTransition { .. } => "state_transition",
            CircuitBreakerEvent::CallRejected { .. } => "call_rejected",
            CircuitBreakerEvent::FailureRecorded { .. } => "failure_recorded",
            CircuitBreakerEvent::SuccessRecorded { .. } => "success_recorded",
        }
    }

    fn source_name(&self) -> &str {
        match self {
            CircuitBreakerEvent::StateTransition { source_name, .. }
            | CircuitBreakerEvent::CallRejected { source_name, .. }
            | CircuitBreakerEvent::FailureRecorded { source_name, .. }
            | CircuitBreakerEvent::SuccessRecorded { source_name, .. } => source_name,
        }
    }
}

impl CircuitBreakerEvent {
    /// When the event occurred.
    pub fn timestamp(&self) -> Instant {
        match self {
            CircuitBreakerEvent::StateTransition { timestamp, .. }
            | CircuitBreakerEvent::CallRejected { timestamp, .. }
            | CircuitBreakerEvent::FailureRecorded { timestamp, .. }
            | CircuitBreakerEvent::SuccessRecorded { timestamp, .. } => *timestamp,
        }
    }
}

/// Admission control decisions as observable events.
#[derive(Debug, Clone)]
pub enum AdmissionEvent {
    Accepted {
        source_name: String,
        timestamp: Instant,
    },
    Rejected {
        source_name: String,
        timestamp: Instant,
        reason: crate::admission::RejectReason,
    },
    SheddingChanged {
        source_name: String,
        timestamp: Instant,
        shedding: bool,
        pressure: f64,
    },
}

impl GatewayEvent for AdmissionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AdmissionEvent::Accepted { .. } => "admission_accepted",
            AdmissionEvent::Rejected { .. } => "admission_rejected",
            AdmissionEvent::SheddingChanged { .. } => "shedding_changed",
        }
    }

    fn source_name(&self) -> &str {
        match self {
            AdmissionEvent::Accepted { source_name, .. }
            | AdmissionEvent::Rejected { source_name, .. }
            | AdmissionEvent::SheddingChanged { source_name, .. } => source_name,
        }
    }
}

impl AdmissionEvent {
    /// When the event occurred.
    pub fn timestamp(&self) -> Instant {
        match self {
            AdmissionEvent::Accepted { timestamp, .. }
            | AdmissionEvent::Rejected { timestamp, .. }
            | AdmissionEvent::SheddingChanged { timestamp, .. } => *timestamp,
        }
    }
}
