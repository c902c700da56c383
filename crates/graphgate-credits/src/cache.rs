//! Write-through credit cache over the KV collaborator.
//!
//! Balance entries are short-lived, operation costs long-lived, summaries in
//! between. Every method tolerates KV unavailability: reads degrade to
//! misses, writes to no-ops, and the caller never sees an error.

use crate::costs::OperationType;
use crate::service::CreditSummary;
use graphgate_core::KvStore;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

const BALANCE_TTL: Duration = Duration::from_secs(300);
const SUMMARY_TTL: Duration = Duration::from_secs(600);
const OPERATION_COST_TTL: Duration = Duration::from_secs(3600);

#[derive(Serialize, Deserialize)]
struct CachedBalance {
    balance: String,
    graph_tier: String,
}

/// Cache statistics for observability.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub connected: bool,
    pub balances: usize,
    pub summaries: usize,
    pub operation_costs: usize,
}

/// Write-through cache of balances, summaries, and operation costs.
#[derive(Clone)]
pub struct CreditCache {
    kv: Arc<dyn KvStore>,
}

impl CreditCache {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    fn balance_key(graph_id: &str) -> String {
        format!("graph_credit:{graph_id}")
    }

    fn summary_key(graph_id: &str) -> String {
        format!("credit_summary:{graph_id}")
    }

    fn cost_key(operation: OperationType) -> String {
        format!("op_cost:{}", operation.as_str())
    }

    /// Cached balance and tier for a parent graph, if fresh.
    pub async fn balance(&self, graph_id: &str) -> Option<(Decimal, String)> {
        let raw = self.kv.get(&Self::balance_key(graph_id)).await.ok()??;
        let cached: CachedBalance = serde_json::from_str(&raw).ok()?;
        let balance = Decimal::from_str(&cached.balance).ok()?;
        Some((balance, cached.graph_tier))
    }

    /// Caches a balance for a parent graph.
    pub async fn cache_balance(&self, graph_id: &str, balance: Decimal, graph_tier: &str) {
        let payload = CachedBalance {
            balance: balance.to_string(),
            graph_tier: graph_tier.to_string(),
        };
        let Ok(raw) = serde_json::to_string(&payload) else {
            return;
        };
        if let Err(err) = self
            .kv
            .set(&Self::balance_key(graph_id), raw, Some(BALANCE_TTL))
            .await
        {
            tracing::warn!(graph_id, error = %err, "failed to cache credit balance");
        }
    }

    /// Optimistic balance update after consumption. Skipped when nothing is
    /// cached; preserves the remaining TTL when something is.
    pub async fn update_balance_after_consumption(&self, graph_id: &str, consumed: Decimal) {
        let key = Self::balance_key(graph_id);
        let Ok(Some(raw)) = self.kv.get(&key).await else {
            return;
        };
        let Ok(mut cached) = serde_json::from_str::<CachedBalance>(&raw) else {
            return;
        };
        let Ok(balance) = Decimal::from_str(&cached.balance) else {
            return;
        };
        cached.balance = (balance - consumed).to_string();

        let ttl = self
            .kv
            .ttl(&key)
            .await
            .ok()
            .flatten()
            .unwrap_or(BALANCE_TTL);
        let Ok(raw) = serde_json::to_string(&cached) else {
            return;
        };
        let _ = self.kv.set(&key, raw, Some(ttl)).await;
    }

    /// Drops the balance and summary entries for a parent graph.
    pub async fn invalidate(&self, graph_id: &str) {
        let _ = self.kv.delete(&Self::balance_key(graph_id)).await;
        let _ = self.kv.delete(&Self::summary_key(graph_id)).await;
    }

    pub async fn summary(&self, graph_id: &str) -> Option<CreditSummary> {
        let raw = self.kv.get(&Self::summary_key(graph_id)).await.ok()??;
        serde_json::from_str(&raw).ok()
    }

    pub async fn cache_summary(&self, graph_id: &str, summary: &CreditSummary) {
        let Ok(raw) = serde_json::to_string(summary) else {
            return;
        };
        if let Err(err) = self
            .kv
            .set(&Self::summary_key(graph_id), raw, Some(SUMMARY_TTL))
            .await
        {
            tracing::warn!(graph_id, error = %err, "failed to cache credit summary");
        }
    }

    pub async fn operation_cost(&self, operation: OperationType) -> Option<Decimal> {
        let raw = self.kv.get(&Self::cost_key(operation)).await.ok()??;
        Decimal::from_str(&raw).ok()
    }

    pub async fn cache_operation_cost(&self, operation: OperationType, cost: Decimal) {
        let _ = self
            .kv
            .set(
                &Self::cost_key(operation),
                cost.to_string(),
                Some(OPERATION_COST_TTL),
            )
            .await;
    }

    /// Primes the cost table. Failures leave the cache to fill lazily.
    pub async fn warmup_operation_costs(&self, costs: &[(OperationType, Decimal)]) {
        for (operation, cost) in costs {
            self.cache_operation_cost(*operation, *cost).await;
        }
    }

    pub async fn stats(&self) -> CacheStats {
        let connected = self.kv.info().await.is_ok();
        let count = |prefix: &str| {
            let kv = Arc::clone(&self.kv);
            let prefix = prefix.to_string();
            async move { kv.keys(&prefix).await.map(|k| k.len()).unwrap_or(0) }
        };
        CacheStats {
            connected,
            balances: count("graph_credit:").await,
            summaries: count("credit_summary:").await,
            operation_costs: count("op_cost:").await,
        }
    }
}
