//! Request and response bodies for the gateway surface.

use graphgate_core::Row;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `POST /v1/graphs/{graph_id}/query`.
#[derive(Debug, Clone, Deserialize)]
pub struct CypherQueryRequest {
    pub query: String,
    #[serde(default)]
    pub parameters: Option<serde_json::Map<String, Value>>,
    /// Requested timeout in seconds, clamped to `[1, 300]`.
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// Query-string options of the query endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryOptions {
    /// Response mode override: `auto`, `sync`, `async`, or `stream`.
    #[serde(default)]
    pub mode: Option<String>,
    /// Rows per chunk for streaming responses, clamped to `[10, 10000]`.
    #[serde(default)]
    pub chunk_size: Option<usize>,
    /// Forces interactive handling for debugging.
    #[serde(default)]
    pub test_mode: bool,
}

/// Successful synchronous query response.
#[derive(Debug, Clone, Serialize)]
pub struct CypherQueryResponse {
    pub success: bool,
    pub data: Vec<Row>,
    pub columns: Vec<String>,
    pub row_count: usize,
    pub execution_time_ms: f64,
    pub graph_id: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncated_at: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<Value>,
}

/// Filters of `GET /v1/graphs/{graph_id}/credits/transactions`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionQuery {
    #[serde(default)]
    pub transaction_type: Option<String>,
    #[serde(default)]
    pub operation_type: Option<String>,
    #[serde(default)]
    pub start_date: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub end_date: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Query string of `GET /v1/graphs/{graph_id}/credits/balance/check`.
#[derive(Debug, Clone, Deserialize)]
pub struct BalanceCheckQuery {
    pub operation_type: String,
    #[serde(default)]
    pub base_cost: Option<rust_decimal::Decimal>,
}

/// Body of `POST /v1/graphs/{graph_id}/schema/validate`.
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaValidationRequest {
    /// Schema document: a JSON object, or a string holding JSON/YAML.
    pub schema: Value,
    /// `json` (default) or `yaml`; only consulted when `schema` is a string.
    #[serde(default)]
    pub format: Option<String>,
}

/// Result of schema validation.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaValidationResponse {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub stats: SchemaStats,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchemaStats {
    pub node_count: usize,
    pub relationship_count: usize,
    pub property_count: usize,
}

/// Liveness payload of `GET /v1/status`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub details: HealthDetails,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthDetails {
    pub service: &'static str,
    pub version: &'static str,
}
