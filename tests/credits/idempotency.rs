use graphgate_core::config::CreditSettings;
use graphgate_core::{GraphTier, KvStore, MemoryKvStore};
use graphgate_credits::{
    ConsumeOutcome, ConsumeRequest, CreditCache, CreditService, CreditStore, MemoryCreditStore,
    OperationType, TransactionFilter, TransactionType,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

fn service(balance: Decimal) -> (Arc<CreditService>, Arc<MemoryCreditStore>) {
    let store = Arc::new(MemoryCreditStore::new());
    store.seed_graph_pool("kg1", "u1", GraphTier::Standard, balance);
    let service = Arc::new(CreditService::new(
        store.clone() as Arc<dyn CreditStore>,
        CreditCache::new(MemoryKvStore::shared() as Arc<dyn KvStore>),
        CreditSettings::default(),
    ));
    (service, store)
}

/// Two consumptions with the same idempotency key have the net effect of one.
#[tokio::test]
async fn retried_consumption_applies_once() {
    let (service, store) = service(dec!(100));

    let request = || {
        ConsumeRequest::new("kg1", OperationType::AgentCall, dec!(30))
            .idempotency_key("retry-safe-1")
    };

    let first = service.consume_credits(request()).await.unwrap();
    let second = service.consume_credits(request()).await.unwrap();

    let first_id = match first {
        ConsumeOutcome::Applied { transaction_id, .. } => transaction_id,
        other => panic!("expected applied, got {other:?}"),
    };
    match second {
        ConsumeOutcome::Replayed { transaction_id } => assert_eq!(transaction_id, first_id),
        other => panic!("expected replay, got {other:?}"),
    }

    let pool = store.pool_for_graph("kg1").await.unwrap().unwrap();
    assert_eq!(pool.current_balance, dec!(70));

    let consumptions = store
        .transactions(
            &pool.id,
            &TransactionFilter {
                transaction_type: Some(TransactionType::Consumption),
                ..TransactionFilter::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(consumptions.len(), 1);
    assert_eq!(consumptions[0].amount, dec!(-30));
}

/// Concurrent retries with one key still produce exactly one ledger entry.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_retries_with_one_key_apply_once() {
    let (service, store) = service(dec!(1000));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            service
                .consume_credits(
                    ConsumeRequest::new("kg1", OperationType::AgentCall, dec!(100))
                        .idempotency_key("storm"),
                )
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_success());
    }

    let pool = store.pool_for_graph("kg1").await.unwrap().unwrap();
    assert_eq!(pool.current_balance, dec!(900));
}

#[tokio::test]
async fn distinct_keys_apply_independently() {
    let (service, store) = service(dec!(100));

    for key in ["a", "b"] {
        let outcome = service
            .consume_credits(
                ConsumeRequest::new("kg1", OperationType::AgentCall, dec!(10)).idempotency_key(key),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, ConsumeOutcome::Applied { .. }));
    }

    let pool = store.pool_for_graph("kg1").await.unwrap().unwrap();
    assert_eq!(pool.current_balance, dec!(80));
}
