//! Append-only credit ledger records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of ledger entry. Consumption amounts are negative; everything else is
/// positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Allocation,
    Consumption,
    Bonus,
    Refund,
    Expiration,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Allocation => "allocation",
            TransactionType::Consumption => "consumption",
            TransactionType::Bonus => "bonus",
            TransactionType::Refund => "refund",
            TransactionType::Expiration => "expiration",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "allocation" => Some(TransactionType::Allocation),
            "consumption" => Some(TransactionType::Consumption),
            "bonus" => Some(TransactionType::Bonus),
            "refund" => Some(TransactionType::Refund),
            "expiration" => Some(TransactionType::Expiration),
            _ => None,
        }
    }
}

/// An immutable ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreditTransaction {
    pub id: String,
    pub pool_id: String,
    pub graph_id: String,
    pub user_id: Option<String>,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub description: String,
    pub metadata: serde_json::Map<String, Value>,
    pub idempotency_key: Option<String>,
    pub request_id: Option<String>,
    pub operation_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
    /// Builds a new ledger entry with a fresh `tx_` id.
    pub fn new(
        pool_id: impl Into<String>,
        graph_id: impl Into<String>,
        transaction_type: TransactionType,
        amount: Decimal,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("tx_{}", uuid::Uuid::new_v4().simple()),
            pool_id: pool_id.into(),
            graph_id: graph_id.into(),
            user_id: None,
            transaction_type,
            amount,
            description: description.into(),
            metadata: serde_json::Map::new(),
            idempotency_key: None,
            request_id: None,
            operation_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_operation_id(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_metadata_entry(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Filter for ledger queries.
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub transaction_type: Option<TransactionType>,
    /// Matches `metadata.operation_type`.
    pub operation_type: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}
