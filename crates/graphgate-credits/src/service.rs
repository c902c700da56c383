//! Central credit accounting service.
//!
//! Routes every operation to the right pool: subgraphs to their parent's
//! graph pool, shared repositories to the caller's per-repository pool.
//! Consumption rides the store's atomic conditional decrement; the cache is
//! refreshed with the post-mutation balance on success and invalidated on
//! failure so readers never observe stale sufficiency.

use crate::cache::CreditCache;
use crate::costs::{shared_repository_cost, token_pricing, OperationType};
use crate::pool::StorageLimitCheck;
use crate::store::{AllocationResult, AtomicConsume, CreditStore, CreditStoreError};
use crate::transaction::{CreditTransaction, TransactionFilter, TransactionType};
use crate::max_pool_balance;
use chrono::{Datelike, TimeZone, Utc};
use graphgate_core::config::CreditSettings;
use graphgate_core::GraphId;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Which kind of pool served a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    Graph,
    Shared,
}

/// Outcome of a balance pre-flight check.
#[derive(Debug, Clone, PartialEq)]
pub enum BalanceCheck {
    Sufficient {
        required: Decimal,
        available: Decimal,
        cached: bool,
        pool: PoolKind,
        /// True when the operation is included with the subscription.
        included: bool,
    },
    Insufficient {
        required: Decimal,
        available: Decimal,
        pool: PoolKind,
    },
    AccessDenied {
        reason: String,
        requires_subscription: bool,
    },
    NoPool {
        graph_id: String,
    },
}

impl BalanceCheck {
    pub fn has_sufficient(&self) -> bool {
        matches!(self, BalanceCheck::Sufficient { .. })
    }
}

/// Outcome of a consumption attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsumeOutcome {
    Applied {
        consumed: Decimal,
        new_balance: Decimal,
        transaction_id: String,
        pool: PoolKind,
    },
    /// The idempotency key matched an earlier consumption; nothing changed.
    Replayed { transaction_id: String },
    /// Cached operations never consume.
    Cached,
    Insufficient {
        required: Decimal,
        available: Decimal,
    },
    NoPool {
        graph_id: String,
    },
    AccessDenied {
        reason: String,
    },
}

impl ConsumeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ConsumeOutcome::Applied { .. } | ConsumeOutcome::Replayed { .. } | ConsumeOutcome::Cached
        )
    }
}

/// Outcome of a monthly allocation attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AllocationOutcome {
    Allocated {
        amount: Decimal,
        new_balance: Decimal,
    },
    AlreadyAllocated,
    NotDue,
    NoPool {
        graph_id: String,
    },
}

/// A consumption request. Built with the fluent setters; only graph id,
/// operation, and base cost are mandatory.
#[derive(Debug, Clone)]
pub struct ConsumeRequest {
    pub graph_id: String,
    pub operation: OperationType,
    pub base_cost: Decimal,
    pub metadata: serde_json::Map<String, Value>,
    pub cached: bool,
    pub user_id: Option<String>,
    pub idempotency_key: Option<String>,
    pub request_id: Option<String>,
    pub operation_id: Option<String>,
}

impl ConsumeRequest {
    pub fn new(graph_id: impl Into<String>, operation: OperationType, base_cost: Decimal) -> Self {
        Self {
            graph_id: graph_id.into(),
            operation,
            base_cost,
            metadata: serde_json::Map::new(),
            cached: false,
            user_id: None,
            idempotency_key: None,
            request_id: None,
            operation_id: None,
        }
    }

    pub fn cached(mut self, cached: bool) -> Self {
        self.cached = cached;
        self
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn operation_id(mut self, id: impl Into<String>) -> Self {
        self.operation_id = Some(id.into());
        self
    }

    pub fn metadata_entry(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Credit summary reported to callers and cached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreditSummary {
    pub graph_id: String,
    pub graph_tier: String,
    pub current_balance: Decimal,
    pub monthly_allocation: Decimal,
    pub consumed_this_month: Decimal,
    pub usage_percentage: f64,
    pub transaction_count: usize,
    pub last_allocation_at: Option<chrono::DateTime<Utc>>,
}

/// Central credit accounting over a store and cache.
pub struct CreditService {
    store: Arc<dyn CreditStore>,
    cache: CreditCache,
    settings: CreditSettings,
}

impl CreditService {
    pub fn new(store: Arc<dyn CreditStore>, cache: CreditCache, settings: CreditSettings) -> Self {
        Self {
            store,
            cache,
            settings,
        }
    }

    /// Primes the operation-cost cache. Failures degrade to lazy fill.
    pub async fn warmup(&self) {
        self.cache
            .warmup_operation_costs(&OperationType::warmup_costs(&self.settings))
            .await;
    }

    pub fn settings(&self) -> &CreditSettings {
        &self.settings
    }

    fn parent_of(graph_id: &str) -> (String, bool) {
        match GraphId::parse(graph_id) {
            Ok(id) => (id.parent().to_string(), id.is_shared_repository()),
            Err(_) => (graph_id.to_string(), false),
        }
    }

    /// Pre-flight check whether the graph (or the user's repository pool) can
    /// cover `required` credits for `operation`.
    pub async fn check_balance(
        &self,
        graph_id: &str,
        required: Decimal,
        user_id: Option<&str>,
        operation: OperationType,
    ) -> Result<BalanceCheck, CreditStoreError> {
        let (parent, shared) = Self::parent_of(graph_id);

        if shared {
            let Some(user_id) = user_id else {
                return Ok(BalanceCheck::AccessDenied {
                    reason: "user required for shared repository access".into(),
                    requires_subscription: false,
                });
            };
            return self
                .check_repository_balance(user_id, &parent, operation, required)
                .await;
        }

        // Fast path from the cache.
        if let Some((balance, _tier)) = self.cache.balance(&parent).await {
            return Ok(if balance >= required {
                BalanceCheck::Sufficient {
                    required,
                    available: balance,
                    cached: true,
                    pool: PoolKind::Graph,
                    included: required.is_zero(),
                }
            } else {
                BalanceCheck::Insufficient {
                    required,
                    available: balance,
                    pool: PoolKind::Graph,
                }
            });
        }

        let Some(pool) = self.store.pool_for_graph(&parent).await? else {
            return Ok(BalanceCheck::NoPool { graph_id: parent });
        };

        // Authoritative derivation when freshness is needed.
        let consumed = self
            .store
            .consumed_since(&pool.id, month_start(Utc::now()))
            .await?;
        let available = pool.monthly_allocation - consumed;

        self.cache
            .cache_balance(&parent, available, pool.graph_tier.as_str())
            .await;

        Ok(if available >= required {
            BalanceCheck::Sufficient {
                required,
                available,
                cached: false,
                pool: PoolKind::Graph,
                included: required.is_zero(),
            }
        } else {
            BalanceCheck::Insufficient {
                required,
                available,
                pool: PoolKind::Graph,
            }
        })
    }

    async fn check_repository_balance(
        &self,
        user_id: &str,
        repository: &str,
        operation: OperationType,
        required: Decimal,
    ) -> Result<BalanceCheck, CreditStoreError> {
        let Some(pool) = self.store.repository_pool(user_id, repository).await? else {
            return Ok(BalanceCheck::AccessDenied {
                reason: format!("no active subscription for {repository} repository"),
                requires_subscription: true,
            });
        };
        if !pool.is_active {
            return Ok(BalanceCheck::AccessDenied {
                reason: "subscription is not active".into(),
                requires_subscription: false,
            });
        }

        let required = match shared_repository_cost(repository, operation) {
            Some(cost) if cost.is_zero() => {
                return Ok(BalanceCheck::Sufficient {
                    required: Decimal::ZERO,
                    available: pool.current_balance,
                    cached: false,
                    pool: PoolKind::Shared,
                    included: true,
                });
            }
            Some(cost) => cost,
            // Dynamic pricing: the caller's figure stands.
            None => required,
        };

        Ok(if pool.current_balance >= required {
            BalanceCheck::Sufficient {
                required,
                available: pool.current_balance,
                cached: false,
                pool: PoolKind::Shared,
                included: false,
            }
        } else {
            BalanceCheck::Insufficient {
                required,
                available: pool.current_balance,
                pool: PoolKind::Shared,
            }
        })
    }

    /// Consumes credits for an operation.
    pub async fn consume_credits(
        &self,
        request: ConsumeRequest,
    ) -> Result<ConsumeOutcome, CreditStoreError> {
        if request.cached {
            return Ok(ConsumeOutcome::Cached);
        }

        let (parent, shared) = Self::parent_of(&request.graph_id);

        if shared {
            let Some(user_id) = request.user_id.clone() else {
                return Ok(ConsumeOutcome::AccessDenied {
                    reason: "user required for shared repository operations".into(),
                });
            };
            return self.consume_repository(&user_id, &parent, &request).await;
        }

        // Fast insufficient rejection from the cache before touching the store.
        if let Some((balance, _)) = self.cache.balance(&parent).await {
            if balance < request.base_cost {
                return Ok(ConsumeOutcome::Insufficient {
                    required: request.base_cost,
                    available: balance,
                });
            }
        }

        let Some(pool) = self.store.pool_for_graph(&parent).await? else {
            return Ok(ConsumeOutcome::NoPool { graph_id: parent });
        };

        let transaction = self.consumption_transaction(&pool.id, &parent, &request);
        let outcome = self
            .store
            .consume_atomic(&pool.id, request.base_cost, transaction)
            .await;

        match outcome {
            Ok(AtomicConsume::Applied {
                new_balance,
                transaction,
                ..
            }) => {
                self.cache.invalidate(&parent).await;
                self.cache
                    .cache_balance(&parent, new_balance, pool.graph_tier.as_str())
                    .await;
                Ok(ConsumeOutcome::Applied {
                    consumed: request.base_cost,
                    new_balance,
                    transaction_id: transaction.id,
                    pool: PoolKind::Graph,
                })
            }
            Ok(AtomicConsume::Replayed { transaction }) => Ok(ConsumeOutcome::Replayed {
                transaction_id: transaction.id,
            }),
            Ok(AtomicConsume::Insufficient { available }) => {
                self.cache.invalidate(&parent).await;
                Ok(ConsumeOutcome::Insufficient {
                    required: request.base_cost,
                    available,
                })
            }
            Err(err) => {
                self.cache.invalidate(&parent).await;
                Err(err)
            }
        }
    }

    async fn consume_repository(
        &self,
        user_id: &str,
        repository: &str,
        request: &ConsumeRequest,
    ) -> Result<ConsumeOutcome, CreditStoreError> {
        let Some(pool) = self.store.repository_pool(user_id, repository).await? else {
            return Ok(ConsumeOutcome::AccessDenied {
                reason: format!("no active add-on for {repository} repository"),
            });
        };
        if !pool.is_active {
            return Ok(ConsumeOutcome::AccessDenied {
                reason: "subscription is not active".into(),
            });
        }

        let cost = match shared_repository_cost(repository, request.operation) {
            Some(cost) if cost.is_zero() => return Ok(ConsumeOutcome::Cached),
            Some(cost) => cost,
            None => request.base_cost,
        };

        match self
            .store
            .consume_repository_atomic(user_id, repository, cost)
            .await?
        {
            AtomicConsume::Applied {
                new_balance,
                transaction,
                ..
            } => Ok(ConsumeOutcome::Applied {
                consumed: cost,
                new_balance,
                transaction_id: transaction.id,
                pool: PoolKind::Shared,
            }),
            AtomicConsume::Replayed { transaction } => Ok(ConsumeOutcome::Replayed {
                transaction_id: transaction.id,
            }),
            AtomicConsume::Insufficient { available } => Ok(ConsumeOutcome::Insufficient {
                required: cost,
                available,
            }),
        }
    }

    fn consumption_transaction(
        &self,
        pool_id: &str,
        parent: &str,
        request: &ConsumeRequest,
    ) -> CreditTransaction {
        let mut transaction = CreditTransaction::new(
            pool_id,
            parent,
            TransactionType::Consumption,
            -request.base_cost,
            format!(
                "{} operation on graph {}",
                request.operation.as_str(),
                request.graph_id
            ),
        )
        .with_metadata(request.metadata.clone())
        .with_metadata_entry("operation_type", Value::from(request.operation.as_str()))
        .with_metadata_entry("base_cost", Value::from(request.base_cost.to_string()));

        if let Some(user) = &request.user_id {
            transaction = transaction.with_user(user.clone());
        }
        if let Some(request_id) = &request.request_id {
            transaction = transaction.with_request_id(request_id.clone());
        }
        if let Some(operation_id) = &request.operation_id {
            transaction = transaction.with_operation_id(operation_id.clone());
        }
        let key = request
            .idempotency_key
            .clone()
            .unwrap_or_else(|| format!("consume_{}", transaction.id));
        transaction.with_idempotency_key(key)
    }

    /// Meters actual AI token usage after the model call completes.
    #[allow(clippy::too_many_arguments)]
    pub async fn consume_ai_tokens(
        &self,
        graph_id: &str,
        input_tokens: u64,
        output_tokens: u64,
        model: &str,
        description: &str,
        metadata: Option<serde_json::Map<String, Value>>,
        user_id: Option<&str>,
    ) -> Result<ConsumeOutcome, CreditStoreError> {
        let pricing = token_pricing(model);
        let thousand = Decimal::new(1000, 0);
        let input_cost = (Decimal::from(input_tokens) / thousand) * pricing.input_per_1k;
        let output_cost = (Decimal::from(output_tokens) / thousand) * pricing.output_per_1k;
        let raw_cost = input_cost + output_cost;
        let total_cost = raw_cost.max(self.settings.ai_minimum_charge);

        let mut request = ConsumeRequest::new(graph_id, OperationType::AiTokens, total_cost)
            .metadata_entry("input_tokens", Value::from(input_tokens))
            .metadata_entry("output_tokens", Value::from(output_tokens))
            .metadata_entry("total_tokens", Value::from(input_tokens + output_tokens))
            .metadata_entry("model", Value::from(model))
            .metadata_entry("input_cost", Value::from(input_cost.to_string()))
            .metadata_entry("output_cost", Value::from(output_cost.to_string()))
            .metadata_entry("raw_cost", Value::from(raw_cost.to_string()))
            .metadata_entry("total_cost", Value::from(total_cost.to_string()))
            .metadata_entry("minimum_charge_applied", Value::from(total_cost > raw_cost))
            .metadata_entry("description", Value::from(description));
        if let Some(extra) = metadata {
            for (k, v) in extra {
                request.metadata.insert(k, v);
            }
        }
        if let Some(user) = user_id {
            request = request.user(user);
        }

        self.consume_credits(request).await
    }

    /// Daily storage billing: charges only the overage above the tier's
    /// included GB. May drive the balance negative.
    pub async fn consume_storage_credits(
        &self,
        graph_id: &str,
        storage_gb: Decimal,
        idempotency_key: Option<String>,
    ) -> Result<ConsumeOutcome, CreditStoreError> {
        let (parent, shared) = Self::parent_of(graph_id);
        if shared {
            return Ok(ConsumeOutcome::AccessDenied {
                reason: "storage billing does not apply to shared repositories".into(),
            });
        }

        let Some(pool) = self.store.pool_for_graph(&parent).await? else {
            return Ok(ConsumeOutcome::NoPool { graph_id: parent });
        };

        let included = pool.effective_storage_limit_gb();
        let overage = (storage_gb - included).max(Decimal::ZERO);
        if overage.is_zero() {
            return Ok(ConsumeOutcome::Applied {
                consumed: Decimal::ZERO,
                new_balance: pool.current_balance,
                transaction_id: String::new(),
                pool: PoolKind::Graph,
            });
        }

        let per_gb_day = OperationType::StoragePerGbDay
            .base_cost(&self.settings)
            .unwrap_or(Decimal::new(10, 0));
        let cost = overage * per_gb_day;

        let mut transaction = CreditTransaction::new(
            &pool.id,
            &parent,
            TransactionType::Consumption,
            -cost,
            format!("daily storage overage of {overage} GB on {graph_id}"),
        )
        .with_metadata_entry(
            "operation_type",
            Value::from(OperationType::StoragePerGbDay.as_str()),
        )
        .with_metadata_entry("storage_gb", Value::from(storage_gb.to_string()))
        .with_metadata_entry("overage_gb", Value::from(overage.to_string()))
        .with_metadata_entry("allows_negative", Value::from(true));
        if let Some(key) = idempotency_key {
            transaction = transaction.with_idempotency_key(key);
        }

        let applied = self.store.apply_delta(&pool.id, -cost, None, transaction).await?;
        self.cache.invalidate(&parent).await;
        if !applied.created {
            return Ok(ConsumeOutcome::Replayed {
                transaction_id: applied.transaction.id,
            });
        }
        self.cache
            .cache_balance(&parent, applied.new_balance, pool.graph_tier.as_str())
            .await;

        Ok(ConsumeOutcome::Applied {
            consumed: cost,
            new_balance: applied.new_balance,
            transaction_id: applied.transaction.id,
            pool: PoolKind::Graph,
        })
    }

    /// Adds the monthly allocation when due. Idempotent per `(graph, month)`.
    ///
    /// The ledger records the nominal allocation even when the balance write
    /// is capped: the cap protects the column, the ledger the entitlement.
    pub async fn allocate_monthly_credits(
        &self,
        graph_id: &str,
    ) -> Result<AllocationOutcome, CreditStoreError> {
        let (parent, _) = Self::parent_of(graph_id);
        let Some(pool) = self.store.pool_for_graph(&parent).await? else {
            return Ok(AllocationOutcome::NoPool { graph_id: parent });
        };

        let now = Utc::now();
        if !pool.allocation_due(now) {
            return Ok(AllocationOutcome::NotDue);
        }

        let month = format!("{:04}-{:02}", now.year(), now.month());
        let transaction = CreditTransaction::new(
            &pool.id,
            &parent,
            TransactionType::Allocation,
            pool.monthly_allocation,
            "Monthly credit allocation",
        )
        .with_user(pool.user_id.clone())
        .with_idempotency_key(format!("monthly_allocation_{parent}_{month}"))
        .with_metadata_entry("allocation_month", Value::from(month.clone()))
        .with_metadata_entry("allocation_type", Value::from("monthly"));

        let result = self
            .store
            .allocate_monthly(
                &pool.id,
                pool.monthly_allocation,
                max_pool_balance(),
                now,
                transaction,
            )
            .await?;

        self.cache.invalidate(&parent).await;

        Ok(match result {
            AllocationResult::Allocated { new_balance, .. } => AllocationOutcome::Allocated {
                amount: pool.monthly_allocation,
                new_balance,
            },
            AllocationResult::AlreadyAllocated { .. } => AllocationOutcome::AlreadyAllocated,
        })
    }

    /// Sweeps every due pool; the daily allocation job calls this.
    pub async fn bulk_allocate_monthly_credits(&self) -> Result<usize, CreditStoreError> {
        let cutoff = month_start(Utc::now());
        let due = self.store.pools_due_allocation(cutoff).await?;
        let mut allocated = 0;
        for pool in due {
            if matches!(
                self.allocate_monthly_credits(&pool.graph_id).await?,
                AllocationOutcome::Allocated { .. }
            ) {
                allocated += 1;
            }
        }
        Ok(allocated)
    }

    /// Unconditional bonus credit with a ledger entry.
    pub async fn add_bonus_credits(
        &self,
        graph_id: &str,
        amount: Decimal,
        description: &str,
    ) -> Result<ConsumeOutcome, CreditStoreError> {
        let (parent, _) = Self::parent_of(graph_id);
        let Some(pool) = self.store.pool_for_graph(&parent).await? else {
            return Ok(ConsumeOutcome::NoPool { graph_id: parent });
        };

        let transaction = CreditTransaction::new(
            &pool.id,
            &parent,
            TransactionType::Bonus,
            amount,
            description,
        )
        .with_user(pool.user_id.clone())
        .with_idempotency_key(format!("bonus_{parent}_{}", uuid::Uuid::new_v4().simple()));

        let applied = self
            .store
            .apply_delta(&pool.id, amount, Some(max_pool_balance()), transaction)
            .await?;
        self.cache.invalidate(&parent).await;

        Ok(ConsumeOutcome::Applied {
            consumed: amount,
            new_balance: applied.new_balance,
            transaction_id: applied.transaction.id,
            pool: PoolKind::Graph,
        })
    }

    /// Credit summary, served from the cache when fresh.
    pub async fn credit_summary(
        &self,
        graph_id: &str,
    ) -> Result<Option<CreditSummary>, CreditStoreError> {
        let (parent, _) = Self::parent_of(graph_id);

        if let Some(summary) = self.cache.summary(&parent).await {
            return Ok(Some(summary));
        }

        let Some(pool) = self.store.pool_for_graph(&parent).await? else {
            return Ok(None);
        };

        let consumed = self
            .store
            .consumed_since(&pool.id, month_start(Utc::now()))
            .await?;
        let transactions = self
            .store
            .transactions(&pool.id, &TransactionFilter::default())
            .await?;
        let usage = if pool.monthly_allocation.is_zero() {
            0.0
        } else {
            ((consumed / pool.monthly_allocation) * Decimal::ONE_HUNDRED)
                .to_f64()
                .unwrap_or(0.0)
        };

        let summary = CreditSummary {
            graph_id: parent.clone(),
            graph_tier: pool.graph_tier.as_str().to_string(),
            current_balance: pool.current_balance,
            monthly_allocation: pool.monthly_allocation,
            consumed_this_month: consumed,
            usage_percentage: usage,
            transaction_count: transactions.len(),
            last_allocation_at: pool.last_allocation_at,
        };

        self.cache.cache_summary(&parent, &summary).await;
        Ok(Some(summary))
    }

    /// Ledger entries for a graph, newest first.
    pub async fn transactions(
        &self,
        graph_id: &str,
        filter: &TransactionFilter,
    ) -> Result<Vec<CreditTransaction>, CreditStoreError> {
        let (parent, _) = Self::parent_of(graph_id);
        let Some(pool) = self.store.pool_for_graph(&parent).await? else {
            return Ok(Vec::new());
        };
        self.store.transactions(&pool.id, filter).await
    }

    /// Storage usage evaluated against the pool's effective limit.
    pub async fn check_storage_limit(
        &self,
        graph_id: &str,
        current_gb: Decimal,
    ) -> Result<Option<StorageLimitCheck>, CreditStoreError> {
        let (parent, shared) = Self::parent_of(graph_id);
        if shared {
            return Ok(None);
        }
        Ok(self
            .store
            .pool_for_graph(&parent)
            .await?
            .map(|pool| pool.check_storage_limit(current_gb)))
    }

    /// Admin override of a pool's storage limit.
    pub async fn set_storage_override(
        &self,
        graph_id: &str,
        new_limit_gb: Decimal,
    ) -> Result<bool, CreditStoreError> {
        let (parent, _) = Self::parent_of(graph_id);
        let Some(mut pool) = self.store.pool_for_graph(&parent).await? else {
            return Ok(false);
        };
        pool.storage_override_gb = Some(new_limit_gb);
        pool.updated_at = Utc::now();
        self.store.insert_pool(pool).await?;
        Ok(true)
    }
}

fn month_start(now: chrono::DateTime<Utc>) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .expect("first of month is always valid")
}
