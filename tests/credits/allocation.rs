use chrono::{Duration as ChronoDuration, Utc};
use graphgate_core::config::CreditSettings;
use graphgate_core::{GraphTier, KvStore, MemoryKvStore};
use graphgate_credits::{
    max_pool_balance, AllocationOutcome, CreditCache, CreditService, CreditStore,
    MemoryCreditStore, TransactionFilter, TransactionType,
};
use rust_decimal_macros::dec;
use std::sync::Arc;

fn service(store: Arc<MemoryCreditStore>) -> CreditService {
    CreditService::new(
        store as Arc<dyn CreditStore>,
        CreditCache::new(MemoryKvStore::shared() as Arc<dyn KvStore>),
        CreditSettings::default(),
    )
}

async fn age_pool(store: &Arc<MemoryCreditStore>, graph_id: &str, days: i64) {
    let mut pool = store.pool_for_graph(graph_id).await.unwrap().unwrap();
    pool.last_allocation_at = Some(Utc::now() - ChronoDuration::days(days));
    store.insert_pool(pool).await.unwrap();
}

#[tokio::test]
async fn allocation_is_not_due_within_thirty_days() {
    let store = Arc::new(MemoryCreditStore::new());
    store.seed_graph_pool("kg1", "u1", GraphTier::Standard, dec!(1000));
    let service = service(store.clone());

    let outcome = service.allocate_monthly_credits("kg1").await.unwrap();
    assert_eq!(outcome, AllocationOutcome::NotDue);
}

#[tokio::test]
async fn due_allocation_adds_the_monthly_amount_once_per_month() {
    let store = Arc::new(MemoryCreditStore::new());
    store.seed_graph_pool("kg1", "u1", GraphTier::Standard, dec!(1000));
    age_pool(&store, "kg1", 31).await;
    // Simulate a partially consumed month.
    let mut pool = store.pool_for_graph("kg1").await.unwrap().unwrap();
    pool.current_balance = dec!(250);
    store.insert_pool(pool).await.unwrap();

    let service = service(store.clone());

    match service.allocate_monthly_credits("kg1").await.unwrap() {
        AllocationOutcome::Allocated {
            amount,
            new_balance,
        } => {
            assert_eq!(amount, dec!(1000));
            assert_eq!(new_balance, dec!(1250));
        }
        other => panic!("expected allocation, got {other:?}"),
    }

    // A second call in the same month replays the existing transaction.
    age_pool(&store, "kg1", 31).await;
    let again = service.allocate_monthly_credits("kg1").await.unwrap();
    assert_eq!(again, AllocationOutcome::AlreadyAllocated);

    let pool = store.pool_for_graph("kg1").await.unwrap().unwrap();
    assert_eq!(pool.current_balance, dec!(1250));

    let allocations = store
        .transactions(
            &pool.id,
            &TransactionFilter {
                transaction_type: Some(TransactionType::Allocation),
                ..TransactionFilter::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(allocations.len(), 1);
}

/// The balance write is capped, but the ledger records the nominal
/// entitlement.
#[tokio::test]
async fn overflowing_allocation_caps_the_balance_not_the_ledger() {
    let store = Arc::new(MemoryCreditStore::new());
    let seeded = store.seed_graph_pool("kg1", "u1", GraphTier::Standard, dec!(1000));
    let mut pool = seeded.clone();
    pool.current_balance = max_pool_balance() - dec!(100);
    store.insert_pool(pool).await.unwrap();
    age_pool(&store, "kg1", 31).await;

    let service = service(store.clone());
    match service.allocate_monthly_credits("kg1").await.unwrap() {
        AllocationOutcome::Allocated {
            amount,
            new_balance,
        } => {
            assert_eq!(amount, dec!(1000));
            assert_eq!(new_balance, max_pool_balance());
        }
        other => panic!("expected allocation, got {other:?}"),
    }

    let allocations = store
        .transactions(
            &seeded.id,
            &TransactionFilter {
                transaction_type: Some(TransactionType::Allocation),
                ..TransactionFilter::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(allocations[0].amount, dec!(1000));
}

#[tokio::test]
async fn bulk_sweep_allocates_every_due_pool() {
    let store = Arc::new(MemoryCreditStore::new());
    store.seed_graph_pool("kg1", "u1", GraphTier::Standard, dec!(100));
    store.seed_graph_pool("kg2", "u2", GraphTier::Standard, dec!(200));
    store.seed_graph_pool("kg3", "u3", GraphTier::Standard, dec!(300));
    age_pool(&store, "kg1", 40).await;
    age_pool(&store, "kg2", 45).await;
    // kg3 allocated recently, not due.

    let service = service(store.clone());
    let allocated = service.bulk_allocate_monthly_credits().await.unwrap();
    assert_eq!(allocated, 2);
}

#[tokio::test]
async fn bonus_credits_append_to_the_ledger() {
    let store = Arc::new(MemoryCreditStore::new());
    let seeded = store.seed_graph_pool("kg1", "u1", GraphTier::Standard, dec!(100));
    let service = service(store.clone());

    let outcome = service
        .add_bonus_credits("kg1", dec!(50), "support credit")
        .await
        .unwrap();
    assert!(outcome.is_success());

    let pool = store.pool_for_graph("kg1").await.unwrap().unwrap();
    assert_eq!(pool.current_balance, dec!(150));

    let bonuses = store
        .transactions(
            &seeded.id,
            &TransactionFilter {
                transaction_type: Some(TransactionType::Bonus),
                ..TransactionFilter::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(bonuses.len(), 1);
    assert_eq!(bonuses[0].amount, dec!(50));
}
