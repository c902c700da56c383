//! Credit store collaborator contract.
//!
//! The production deployment backs this with a relational database whose
//! conditional `UPDATE ... WHERE current_balance >= :cost RETURNING old, new`
//! serializes consumption, and whose unique index on `idempotency_key` makes
//! retried transactions collapse into the existing row. The in-memory store
//! reproduces both guarantees under a single mutex.

use crate::pool::{GraphCreditPool, RepositoryCreditPool};
use crate::transaction::{CreditTransaction, TransactionFilter, TransactionType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Errors from the backing store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CreditStoreError {
    #[error("credit store unavailable: {0}")]
    Unavailable(String),
}

/// Result of the atomic conditional decrement.
#[derive(Debug, Clone)]
pub enum AtomicConsume {
    /// The decrement applied and the transaction was recorded.
    Applied {
        old_balance: Decimal,
        new_balance: Decimal,
        transaction: CreditTransaction,
    },
    /// A transaction with the same idempotency key already existed; no state
    /// changed and the original row is returned.
    Replayed { transaction: CreditTransaction },
    /// The pool held less than the requested amount.
    Insufficient { available: Decimal },
}

/// Result of an unconditional balance delta (bonus, storage overage).
#[derive(Debug, Clone)]
pub struct AppliedDelta {
    pub old_balance: Decimal,
    pub new_balance: Decimal,
    pub transaction: CreditTransaction,
    /// False when the idempotency key matched an existing row and nothing
    /// changed.
    pub created: bool,
}

/// Result of a monthly allocation attempt.
#[derive(Debug, Clone)]
pub enum AllocationResult {
    Allocated {
        new_balance: Decimal,
        transaction: CreditTransaction,
    },
    /// The month's allocation transaction already exists.
    AlreadyAllocated { transaction: CreditTransaction },
}

/// Database collaborator for credit state.
#[async_trait]
pub trait CreditStore: Send + Sync {
    async fn pool_for_graph(
        &self,
        graph_id: &str,
    ) -> Result<Option<GraphCreditPool>, CreditStoreError>;

    async fn insert_pool(&self, pool: GraphCreditPool) -> Result<(), CreditStoreError>;

    /// Atomically decrements the pool when the balance covers `amount`, and
    /// records `transaction` in the same unit of work. A duplicate
    /// idempotency key short-circuits to [`AtomicConsume::Replayed`].
    async fn consume_atomic(
        &self,
        pool_id: &str,
        amount: Decimal,
        transaction: CreditTransaction,
    ) -> Result<AtomicConsume, CreditStoreError>;

    /// Applies a signed delta without a balance floor (storage overage may go
    /// negative) and records `transaction`, honoring its idempotency key.
    /// `cap` bounds the resulting balance from above when present.
    async fn apply_delta(
        &self,
        pool_id: &str,
        delta: Decimal,
        cap: Option<Decimal>,
        transaction: CreditTransaction,
    ) -> Result<AppliedDelta, CreditStoreError>;

    /// Adds the monthly allocation, capped, stamping `last_allocation_at`.
    /// Idempotent per the transaction's key.
    async fn allocate_monthly(
        &self,
        pool_id: &str,
        amount: Decimal,
        cap: Decimal,
        allocated_at: DateTime<Utc>,
        transaction: CreditTransaction,
    ) -> Result<AllocationResult, CreditStoreError>;

    async fn transaction_by_key(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<CreditTransaction>, CreditStoreError>;

    async fn transactions(
        &self,
        pool_id: &str,
        filter: &TransactionFilter,
    ) -> Result<Vec<CreditTransaction>, CreditStoreError>;

    /// Sum of consumption amounts (absolute value) since `since`.
    async fn consumed_since(
        &self,
        pool_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Decimal, CreditStoreError>;

    async fn repository_pool(
        &self,
        user_id: &str,
        repository: &str,
    ) -> Result<Option<RepositoryCreditPool>, CreditStoreError>;

    /// Conditional decrement for a user's shared-repository pool.
    async fn consume_repository_atomic(
        &self,
        user_id: &str,
        repository: &str,
        amount: Decimal,
    ) -> Result<AtomicConsume, CreditStoreError>;

    /// Pools whose last allocation predates `due_before` (or never happened).
    async fn pools_due_allocation(
        &self,
        due_before: DateTime<Utc>,
    ) -> Result<Vec<GraphCreditPool>, CreditStoreError>;
}

#[derive(Default)]
struct Inner {
    pools: HashMap<String, GraphCreditPool>,
    pool_by_graph: HashMap<String, String>,
    transactions: Vec<CreditTransaction>,
    idempotency: HashMap<String, usize>,
    repository_pools: HashMap<(String, String), RepositoryCreditPool>,
}

impl Inner {
    /// Returns the existing row for a key, mirroring the unique-index race
    /// resolution: the violating insert observes the winner's row.
    fn existing_for_key(&self, transaction: &CreditTransaction) -> Option<CreditTransaction> {
        transaction
            .idempotency_key
            .as_deref()
            .and_then(|key| self.idempotency.get(key))
            .map(|&idx| self.transactions[idx].clone())
    }

    fn insert_transaction(&mut self, transaction: CreditTransaction) -> CreditTransaction {
        if let Some(key) = transaction.idempotency_key.clone() {
            self.idempotency.insert(key, self.transactions.len());
        }
        self.transactions.push(transaction.clone());
        transaction
    }
}

/// In-memory credit store for tests and single-node deployments.
///
/// One mutex serializes every mutation, standing in for the database's
/// row-level atomicity.
#[derive(Default)]
pub struct MemoryCreditStore {
    inner: Mutex<Inner>,
}

impl MemoryCreditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a pool with a full balance and returns it.
    pub fn seed_graph_pool(
        &self,
        graph_id: &str,
        user_id: &str,
        tier: graphgate_core::GraphTier,
        balance: Decimal,
    ) -> GraphCreditPool {
        let now = Utc::now();
        let pool = GraphCreditPool {
            id: format!("crd_{}", uuid::Uuid::new_v4().simple()),
            graph_id: graph_id.to_string(),
            user_id: user_id.to_string(),
            graph_tier: tier,
            monthly_allocation: balance,
            current_balance: balance,
            storage_limit_gb: Decimal::new(100, 0),
            storage_override_gb: None,
            last_allocation_at: Some(now),
            created_at: now,
            updated_at: now,
        };
        let mut inner = self.inner.lock();
        inner
            .pool_by_graph
            .insert(graph_id.to_string(), pool.id.clone());
        inner.pools.insert(pool.id.clone(), pool.clone());
        pool
    }

    pub fn seed_repository_pool(
        &self,
        user_id: &str,
        repository: &str,
        plan: &str,
        is_active: bool,
        balance: Decimal,
    ) -> RepositoryCreditPool {
        let pool = RepositoryCreditPool {
            user_id: user_id.to_string(),
            repository: repository.to_string(),
            plan: plan.to_string(),
            is_active,
            monthly_allocation: balance,
            current_balance: balance,
            created_at: Utc::now(),
        };
        self.inner.lock().repository_pools.insert(
            (user_id.to_string(), repository.to_string()),
            pool.clone(),
        );
        pool
    }
}

#[async_trait]
impl CreditStore for MemoryCreditStore {
    async fn pool_for_graph(
        &self,
        graph_id: &str,
    ) -> Result<Option<GraphCreditPool>, CreditStoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .pool_by_graph
            .get(graph_id)
            .and_then(|id| inner.pools.get(id))
            .cloned())
    }

    async fn insert_pool(&self, pool: GraphCreditPool) -> Result<(), CreditStoreError> {
        let mut inner = self.inner.lock();
        inner
            .pool_by_graph
            .insert(pool.graph_id.clone(), pool.id.clone());
        inner.pools.insert(pool.id.clone(), pool);
        Ok(())
    }

    async fn consume_atomic(
        &self,
        pool_id: &str,
        amount: Decimal,
        transaction: CreditTransaction,
    ) -> Result<AtomicConsume, CreditStoreError> {
        let mut inner = self.inner.lock();

        if let Some(existing) = inner.existing_for_key(&transaction) {
            return Ok(AtomicConsume::Replayed {
                transaction: existing,
            });
        }

        let Some(pool) = inner.pools.get_mut(pool_id) else {
            return Ok(AtomicConsume::Insufficient {
                available: Decimal::ZERO,
            });
        };

        if pool.current_balance < amount {
            return Ok(AtomicConsume::Insufficient {
                available: pool.current_balance,
            });
        }

        let old_balance = pool.current_balance;
        pool.current_balance -= amount;
        pool.updated_at = Utc::now();
        let new_balance = pool.current_balance;
        let transaction = inner.insert_transaction(transaction);

        Ok(AtomicConsume::Applied {
            old_balance,
            new_balance,
            transaction,
        })
    }

    async fn apply_delta(
        &self,
        pool_id: &str,
        delta: Decimal,
        cap: Option<Decimal>,
        transaction: CreditTransaction,
    ) -> Result<AppliedDelta, CreditStoreError> {
        let mut inner = self.inner.lock();

        if let Some(existing) = inner.existing_for_key(&transaction) {
            let balance = inner
                .pools
                .get(pool_id)
                .map(|p| p.current_balance)
                .unwrap_or(Decimal::ZERO);
            return Ok(AppliedDelta {
                old_balance: balance,
                new_balance: balance,
                transaction: existing,
                created: false,
            });
        }

        let Some(pool) = inner.pools.get_mut(pool_id) else {
            return Err(CreditStoreError::Unavailable(format!(
                "unknown pool {pool_id}"
            )));
        };

        let old_balance = pool.current_balance;
        let mut new_balance = old_balance + delta;
        if let Some(cap) = cap {
            new_balance = new_balance.min(cap);
        }
        pool.current_balance = new_balance;
        pool.updated_at = Utc::now();
        let transaction = inner.insert_transaction(transaction);

        Ok(AppliedDelta {
            old_balance,
            new_balance,
            transaction,
            created: true,
        })
    }

    async fn allocate_monthly(
        &self,
        pool_id: &str,
        amount: Decimal,
        cap: Decimal,
        allocated_at: DateTime<Utc>,
        transaction: CreditTransaction,
    ) -> Result<AllocationResult, CreditStoreError> {
        let mut inner = self.inner.lock();

        if let Some(existing) = inner.existing_for_key(&transaction) {
            return Ok(AllocationResult::AlreadyAllocated {
                transaction: existing,
            });
        }

        let Some(pool) = inner.pools.get_mut(pool_id) else {
            return Err(CreditStoreError::Unavailable(format!(
                "unknown pool {pool_id}"
            )));
        };

        pool.current_balance = (pool.current_balance + amount).min(cap);
        pool.last_allocation_at = Some(allocated_at);
        pool.updated_at = allocated_at;
        let new_balance = pool.current_balance;
        let transaction = inner.insert_transaction(transaction);

        Ok(AllocationResult::Allocated {
            new_balance,
            transaction,
        })
    }

    async fn transaction_by_key(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<CreditTransaction>, CreditStoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .idempotency
            .get(idempotency_key)
            .map(|&idx| inner.transactions[idx].clone()))
    }

    async fn transactions(
        &self,
        pool_id: &str,
        filter: &TransactionFilter,
    ) -> Result<Vec<CreditTransaction>, CreditStoreError> {
        let inner = self.inner.lock();
        let mut result: Vec<CreditTransaction> = inner
            .transactions
            .iter()
            .filter(|t| t.pool_id == pool_id)
            .filter(|t| {
                filter
                    .transaction_type
                    .map_or(true, |ty| t.transaction_type == ty)
            })
            .filter(|t| {
                filter.operation_type.as_deref().map_or(true, |op| {
                    t.metadata
                        .get("operation_type")
                        .and_then(|v| v.as_str())
                        .is_some_and(|v| v == op)
                })
            })
            .filter(|t| filter.start_date.map_or(true, |d| t.created_at >= d))
            .filter(|t| filter.end_date.map_or(true, |d| t.created_at <= d))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            result.truncate(limit);
        }
        Ok(result)
    }

    async fn consumed_since(
        &self,
        pool_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Decimal, CreditStoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .transactions
            .iter()
            .filter(|t| {
                t.pool_id == pool_id
                    && t.transaction_type == TransactionType::Consumption
                    && t.created_at >= since
            })
            .map(|t| t.amount.abs())
            .sum())
    }

    async fn repository_pool(
        &self,
        user_id: &str,
        repository: &str,
    ) -> Result<Option<RepositoryCreditPool>, CreditStoreError> {
        Ok(self
            .inner
            .lock()
            .repository_pools
            .get(&(user_id.to_string(), repository.to_string()))
            .cloned())
    }

    async fn consume_repository_atomic(
        &self,
        user_id: &str,
        repository: &str,
        amount: Decimal,
    ) -> Result<AtomicConsume, CreditStoreError> {
        let mut inner = self.inner.lock();
        let Some(pool) = inner
            .repository_pools
            .get_mut(&(user_id.to_string(), repository.to_string()))
        else {
            return Ok(AtomicConsume::Insufficient {
                available: Decimal::ZERO,
            });
        };

        if pool.current_balance < amount {
            return Ok(AtomicConsume::Insufficient {
                available: pool.current_balance,
            });
        }

        let old_balance = pool.current_balance;
        pool.current_balance -= amount;
        let new_balance = pool.current_balance;
        let transaction = CreditTransaction::new(
            format!("repo:{repository}"),
            repository,
            TransactionType::Consumption,
            -amount,
            format!("shared repository consumption for {user_id}"),
        )
        .with_user(user_id);
        let transaction = inner.insert_transaction(transaction);

        Ok(AtomicConsume::Applied {
            old_balance,
            new_balance,
            transaction,
        })
    }

    async fn pools_due_allocation(
        &self,
        due_before: DateTime<Utc>,
    ) -> Result<Vec<GraphCreditPool>, CreditStoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .pools
            .values()
            .filter(|p| p.last_allocation_at.map_or(true, |at| at < due_before))
            .cloned()
            .collect())
    }
}
