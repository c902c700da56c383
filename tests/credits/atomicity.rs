use graphgate_core::{GraphTier, KvStore, MemoryKvStore};
use graphgate_credits::{
    ConsumeOutcome, ConsumeRequest, CreditCache, CreditService, CreditStore, MemoryCreditStore,
    OperationType,
};
use graphgate_core::config::CreditSettings;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

fn service_with_pool(balance: Decimal) -> (Arc<CreditService>, Arc<MemoryCreditStore>) {
    let store = Arc::new(MemoryCreditStore::new());
    store.seed_graph_pool("kg1", "u1", GraphTier::Standard, balance);
    let cache = CreditCache::new(MemoryKvStore::shared() as Arc<dyn KvStore>);
    let service = Arc::new(CreditService::new(
        store.clone() as Arc<dyn graphgate_credits::CreditStore>,
        cache,
        CreditSettings::default(),
    ));
    (service, store)
}

/// When concurrent consumptions exceed the balance, exactly
/// `floor(balance / cost)` succeed and the pool never goes negative.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_consumption_never_oversells() {
    let (service, store) = service_with_pool(dec!(100));

    let mut handles = Vec::new();
    for _ in 0..25 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            service
                .consume_credits(ConsumeRequest::new(
                    "kg1",
                    OperationType::AgentCall,
                    dec!(10),
                ))
                .await
                .unwrap()
        }));
    }

    let mut successes = 0;
    for handle in handles {
        if matches!(handle.await.unwrap(), ConsumeOutcome::Applied { .. }) {
            successes += 1;
        }
    }

    assert_eq!(successes, 10);
    let pool = store.pool_for_graph("kg1").await.unwrap().unwrap();
    assert_eq!(pool.current_balance, Decimal::ZERO);
}

#[tokio::test]
async fn insufficient_consumption_reports_required_and_available() {
    let (service, _) = service_with_pool(dec!(50));

    let outcome = service
        .consume_credits(ConsumeRequest::new(
            "kg1",
            OperationType::AgentCall,
            dec!(100),
        ))
        .await
        .unwrap();

    match outcome {
        ConsumeOutcome::Insufficient {
            required,
            available,
        } => {
            assert_eq!(required, dec!(100));
            assert_eq!(available, dec!(50));
        }
        other => panic!("expected insufficient, got {other:?}"),
    }
}

#[tokio::test]
async fn balance_equals_initial_minus_successful_consumption() {
    let (service, store) = service_with_pool(dec!(1000));

    for _ in 0..3 {
        let outcome = service
            .consume_credits(ConsumeRequest::new(
                "kg1",
                OperationType::AiAnalysis,
                dec!(100),
            ))
            .await
            .unwrap();
        assert!(outcome.is_success());
    }

    let pool = store.pool_for_graph("kg1").await.unwrap().unwrap();
    assert_eq!(pool.current_balance, dec!(700));
}

#[tokio::test]
async fn cached_operations_consume_nothing() {
    let (service, store) = service_with_pool(dec!(100));

    let outcome = service
        .consume_credits(
            ConsumeRequest::new("kg1", OperationType::AgentCall, dec!(100)).cached(true),
        )
        .await
        .unwrap();
    assert_eq!(outcome, ConsumeOutcome::Cached);

    let pool = store.pool_for_graph("kg1").await.unwrap().unwrap();
    assert_eq!(pool.current_balance, dec!(100));
}

#[tokio::test]
async fn missing_pool_is_reported_not_created() {
    let store = Arc::new(MemoryCreditStore::new());
    let cache = CreditCache::new(MemoryKvStore::shared() as Arc<dyn KvStore>);
    let service = CreditService::new(
        store as Arc<dyn graphgate_credits::CreditStore>,
        cache,
        CreditSettings::default(),
    );

    let outcome = service
        .consume_credits(ConsumeRequest::new(
            "kgmissing",
            OperationType::AgentCall,
            dec!(1),
        ))
        .await
        .unwrap();
    assert!(matches!(outcome, ConsumeOutcome::NoPool { .. }));
}
