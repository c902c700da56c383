use graphgate_core::config::SseSettings;
use graphgate_core::{KvStore, MemoryKvStore};
use graphgate_sse::{EventType, OperationBus};
use serde_json::json;
use std::sync::Arc;

fn bus() -> Arc<OperationBus> {
    OperationBus::new(
        MemoryKvStore::shared() as Arc<dyn KvStore>,
        SseSettings::default(),
    )
}

/// Late subscribers replay persisted events in append order before receiving
/// live ones.
#[tokio::test]
async fn replay_preserves_append_order_then_delivers_live() {
    let bus = bus();

    for i in 0..4 {
        bus.emit("op1", EventType::Progress, json!({ "step": i }))
            .await;
    }

    let mut sub = bus.subscribe("op1", "u1").await.unwrap();
    let replayed: Vec<u64> = sub
        .replay
        .iter()
        .map(|e| e.payload["step"].as_u64().unwrap())
        .collect();
    assert_eq!(replayed, vec![0, 1, 2, 3]);

    bus.emit("op1", EventType::Completed, json!({ "step": 4 }))
        .await;
    let live = sub.live.recv().await.unwrap();
    assert_eq!(live.event_type, EventType::Completed);
    assert_eq!(live.payload["step"], json!(4));
}

#[tokio::test]
async fn operations_are_isolated() {
    let bus = bus();

    bus.emit("op1", EventType::Progress, json!({ "op": 1 })).await;
    bus.emit("op2", EventType::Progress, json!({ "op": 2 })).await;

    let sub1 = bus.subscribe("op1", "u1").await.unwrap();
    let sub2 = bus.subscribe("op2", "u1").await.unwrap();
    assert_eq!(sub1.replay.len(), 1);
    assert_eq!(sub2.replay.len(), 1);
    assert_eq!(sub1.replay[0].payload["op"], json!(1));
    assert_eq!(sub2.replay[0].payload["op"], json!(2));
}

#[tokio::test]
async fn registered_operations_roundtrip_with_stream_paths() {
    let bus = bus();
    let handle = bus
        .create_operation("cypher_query", "u1", "kg1", Some("q_abc123".into()))
        .await;
    assert_eq!(handle.operation_id, "q_abc123");
    assert_eq!(handle.stream_path(), "/v1/operations/q_abc123/stream");

    let found = bus.operation("q_abc123").await.unwrap();
    assert_eq!(found.graph_id, "kg1");
    assert!(bus.operation("unknown").await.is_none());
}
