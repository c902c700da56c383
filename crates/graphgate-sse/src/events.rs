//! Operation event records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle event kinds for a monitored operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Started,
    Progress,
    Completed,
    Error,
    Cancelled,
}

impl EventType {
    /// SSE event name on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Started => "operation_started",
            EventType::Progress => "operation_progress",
            EventType::Completed => "operation_completed",
            EventType::Error => "operation_error",
            EventType::Cancelled => "operation_cancelled",
        }
    }
}

/// One event in an operation's ordered log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationEvent {
    pub operation_id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

impl OperationEvent {
    pub fn new(operation_id: impl Into<String>, event_type: EventType, payload: Value) -> Self {
        Self {
            operation_id: operation_id.into(),
            event_type,
            timestamp: Utc::now(),
            payload,
        }
    }
}
