use graphgate_core::config::SseSettings;
use graphgate_core::{KvStore, MemoryKvStore};
use graphgate_sse::{ConnectionError, ConnectionLimits, OperationBus};
use std::sync::Arc;

/// A user holding the maximum concurrent subscriptions is rejected until one
/// closes.
#[tokio::test]
async fn subscription_cap_is_enforced_per_user() {
    let bus = OperationBus::new(
        MemoryKvStore::shared() as Arc<dyn KvStore>,
        SseSettings::default(),
    );

    let mut held = Vec::new();
    for _ in 0..5 {
        held.push(bus.subscribe("op1", "u1").await.unwrap());
    }

    assert!(matches!(
        bus.subscribe("op1", "u1").await,
        Err(ConnectionError::LimitExceeded { max: 5 })
    ));

    // Other users are unaffected.
    assert!(bus.subscribe("op1", "u2").await.is_ok());

    // Dropping a subscription frees the slot.
    held.pop();
    assert!(bus.subscribe("op1", "u1").await.is_ok());
}

#[test]
fn connection_rate_limit_counts_openings_not_live_connections() {
    let limits = ConnectionLimits::new(100, 3);

    for _ in 0..3 {
        // Guards drop immediately; the rate log still records each opening.
        let _ = limits.acquire("u1").unwrap();
    }

    match limits.acquire("u1") {
        Err(ConnectionError::RateLimited {
            retry_after_seconds,
        }) => assert!(retry_after_seconds >= 1),
        other => panic!("expected rate limit, got {other:?}"),
    }
}

#[test]
fn active_counts_follow_guard_lifetimes() {
    let limits = ConnectionLimits::new(10, 100);
    assert_eq!(limits.active_connections("u1"), 0);

    let g1 = limits.acquire("u1").unwrap();
    let g2 = limits.acquire("u1").unwrap();
    assert_eq!(limits.active_connections("u1"), 2);

    drop(g1);
    assert_eq!(limits.active_connections("u1"), 1);
    drop(g2);
    assert_eq!(limits.active_connections("u1"), 0);
}
