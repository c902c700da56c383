//! Queued query state machine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;

/// Lifecycle of a queued query. Observers see transitions monotonically:
/// `Pending -> Running -> (Completed | Failed)` or `Pending -> Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl QueryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStatus::Pending => "pending",
            QueryStatus::Running => "running",
            QueryStatus::Completed => "completed",
            QueryStatus::Failed => "failed",
            QueryStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueryStatus::Completed | QueryStatus::Failed | QueryStatus::Cancelled
        )
    }
}

/// A query owned by the queue, from submission to garbage collection.
#[derive(Debug, Clone)]
pub struct QueuedQuery {
    pub id: String,
    pub cypher: String,
    pub parameters: Option<serde_json::Map<String, Value>>,
    pub graph_id: String,
    pub user_id: String,
    pub priority: i32,
    pub credits_reserved: Decimal,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: QueryStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl QueuedQuery {
    /// Seconds spent waiting in the queue so far (or until start).
    pub fn wait_time_seconds(&self) -> f64 {
        let until = self.started_at.unwrap_or_else(Utc::now);
        (until - self.created_at).num_milliseconds() as f64 / 1000.0
    }

    /// Execution duration once the query has both started and finished.
    pub fn execution_time_seconds(&self) -> Option<f64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        }
    }
}
