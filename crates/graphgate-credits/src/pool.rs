//! Credit pool records.

use chrono::{DateTime, Utc};
use graphgate_core::GraphTier;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// `99_999_999.99` expressed in cents; the ledger column is Numeric(10,2).
pub const MAX_POOL_BALANCE_CENTS: i64 = 9_999_999_999;

/// Per-parent-graph credit pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphCreditPool {
    pub id: String,
    pub graph_id: String,
    pub user_id: String,
    pub graph_tier: GraphTier,
    pub monthly_allocation: Decimal,
    pub current_balance: Decimal,
    /// Storage included with the tier, in GB.
    pub storage_limit_gb: Decimal,
    /// Admin override of the storage limit, when granted.
    pub storage_override_gb: Option<Decimal>,
    pub last_allocation_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GraphCreditPool {
    /// The storage limit in force: the admin override when present, the tier
    /// limit otherwise.
    pub fn effective_storage_limit_gb(&self) -> Decimal {
        self.storage_override_gb.unwrap_or(self.storage_limit_gb)
    }

    /// Evaluates current storage usage against the effective limit.
    pub fn check_storage_limit(&self, current_gb: Decimal) -> StorageLimitCheck {
        let limit = self.effective_storage_limit_gb();
        let usage_percentage = if limit.is_zero() {
            100.0
        } else {
            ((current_gb / limit) * Decimal::ONE_HUNDRED)
                .to_f64()
                .unwrap_or(100.0)
        };
        StorageLimitCheck {
            graph_id: self.graph_id.clone(),
            current_storage_gb: current_gb,
            effective_limit_gb: limit,
            usage_percentage,
            within_limit: current_gb <= limit,
            approaching_limit: usage_percentage >= 80.0 && current_gb <= limit,
            has_override: self.storage_override_gb.is_some(),
            needs_warning: usage_percentage >= 80.0,
        }
    }

    /// True once a monthly allocation is due again.
    pub fn allocation_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_allocation_at {
            None => true,
            Some(last) => (now - last).num_days() >= 30,
        }
    }
}

/// Storage usage evaluated against a pool's limit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageLimitCheck {
    pub graph_id: String,
    pub current_storage_gb: Decimal,
    pub effective_limit_gb: Decimal,
    pub usage_percentage: f64,
    pub within_limit: bool,
    pub approaching_limit: bool,
    pub has_override: bool,
    pub needs_warning: bool,
}

/// Per-user credit pool for a shared repository subscription.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepositoryCreditPool {
    pub user_id: String,
    pub repository: String,
    pub plan: String,
    pub is_active: bool,
    pub monthly_allocation: Decimal,
    pub current_balance: Decimal,
    pub created_at: DateTime<Utc>,
}
