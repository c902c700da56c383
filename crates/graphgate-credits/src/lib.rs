//! Credit accounting for the graphgate query gateway.
//!
//! Every graph has a credit pool; every state change is an append-only
//! transaction. Consumption is serialized by the store's atomic conditional
//! decrement, idempotency keys make retries safe, and a write-through cache
//! over the KV collaborator keeps balance checks off the hot path.
//!
//! Subgraphs (`kg123_dev`) share their parent's pool: every operation in this
//! crate resolves the parent id first, so callers can pass either form.

pub mod cache;
pub mod costs;
pub mod pool;
pub mod service;
pub mod store;
pub mod transaction;

pub use cache::CreditCache;
pub use costs::{token_pricing, OperationType, TokenPricing};
pub use pool::{GraphCreditPool, RepositoryCreditPool, StorageLimitCheck, MAX_POOL_BALANCE_CENTS};
pub use service::{
    AllocationOutcome, BalanceCheck, ConsumeOutcome, ConsumeRequest, CreditService, CreditSummary,
    PoolKind,
};
pub use store::{
    AllocationResult, AppliedDelta, AtomicConsume, CreditStore, CreditStoreError, MemoryCreditStore,
};
pub use transaction::{CreditTransaction, TransactionFilter, TransactionType};

/// Maximum representable pool balance (Numeric(10,2) in the ledger schema).
pub fn max_pool_balance() -> rust_decimal::Decimal {
    rust_decimal::Decimal::new(MAX_POOL_BALANCE_CENTS, 2)
}
