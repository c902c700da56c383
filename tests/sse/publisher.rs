use graphgate_core::config::SseSettings;
use graphgate_core::{KvStore, MemoryKvStore};
use graphgate_sse::{EventType, OperationBus};
use serde_json::{json, Value};
use std::sync::Arc;

fn bus_with_kv() -> (Arc<OperationBus>, Arc<MemoryKvStore>) {
    let kv = MemoryKvStore::shared();
    let bus = OperationBus::new(kv.clone() as Arc<dyn KvStore>, SseSettings::default());
    (bus, kv)
}

/// After `max_publish_failures` consecutive failures the breaker opens and
/// emits become no-ops; the operation itself is never failed.
#[tokio::test]
async fn breaker_opens_after_consecutive_failures() {
    let (bus, kv) = bus_with_kv();
    kv.set_failing(true);

    for _ in 0..3 {
        bus.emit("op1", EventType::Progress, Value::Null).await;
    }
    assert!(bus.publisher_open());

    // Events are dropped while open.
    bus.emit("op1", EventType::Progress, Value::Null).await;
    kv.set_failing(false);
    // Still inside the probe interval, the breaker stays open.
    assert!(bus.publisher_open());
}

#[tokio::test]
async fn one_failure_does_not_open_the_breaker() {
    let (bus, kv) = bus_with_kv();

    kv.set_failing(true);
    bus.emit("op1", EventType::Progress, Value::Null).await;
    assert!(!bus.publisher_open());

    // A successful publish resets the run of failures.
    kv.set_failing(false);
    bus.emit("op1", EventType::Progress, json!({"n": 1})).await;
    assert!(!bus.publisher_open());

    kv.set_failing(true);
    bus.emit("op1", EventType::Progress, Value::Null).await;
    bus.emit("op1", EventType::Progress, Value::Null).await;
    assert!(!bus.publisher_open());
}

#[tokio::test]
async fn disabled_sse_drops_events_silently() {
    let kv = MemoryKvStore::shared();
    let settings = SseSettings {
        enabled: false,
        ..SseSettings::default()
    };
    let bus = OperationBus::new(kv.clone() as Arc<dyn KvStore>, settings);

    bus.emit("op1", EventType::Progress, Value::Null).await;
    assert_eq!(kv.get("operation_events:op1").await.unwrap(), None);
}

#[tokio::test]
async fn event_log_is_bounded_per_operation() {
    let kv = MemoryKvStore::shared();
    let settings = SseSettings {
        max_events_per_operation: 5,
        ..SseSettings::default()
    };
    let bus = OperationBus::new(kv.clone() as Arc<dyn KvStore>, settings);

    for i in 0..8 {
        bus.emit("op1", EventType::Progress, json!({ "step": i })).await;
    }

    let sub = bus.subscribe("op1", "u1").await.unwrap();
    assert_eq!(sub.replay.len(), 5);
    // Oldest entries were evicted.
    assert_eq!(sub.replay[0].payload["step"], json!(3));
}
