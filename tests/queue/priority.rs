use async_trait::async_trait;
use graphgate_core::config::{AdmissionSettings, QueueSettings};
use graphgate_core::RepositoryError;
use graphgate_queue::{ExecutionMode, QueryExecutor, QueryQueue};
use graphgate_robustness::{AdmissionController, StaticPressure};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Records the order queries reach execution.
struct RecordingExecutor {
    order: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl QueryExecutor for RecordingExecutor {
    async fn execute(
        &self,
        cypher: &str,
        _parameters: Option<&serde_json::Map<String, Value>>,
        _graph_id: &str,
    ) -> Result<Value, RepositoryError> {
        self.order.lock().push(cypher.to_string());
        // Hold the execution slot long enough for later submissions to stack
        // up behind it.
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(Value::Null)
    }
}

fn queue_with_recorder(settings: QueueSettings) -> (QueryQueue, Arc<Mutex<Vec<String>>>) {
    let order = Arc::new(Mutex::new(Vec::new()));
    let admission = Arc::new(AdmissionController::new(
        AdmissionSettings::default(),
        StaticPressure::new(),
        settings.default_priority,
    ));
    let queue = QueryQueue::new(
        settings,
        admission,
        Arc::new(RecordingExecutor {
            order: Arc::clone(&order),
        }),
    );
    (queue, order)
}

/// Higher priority reaches Running first; equal priorities run in submission
/// order.
#[tokio::test]
async fn dispatch_follows_priority_then_submission_order() {
    let settings = QueueSettings {
        max_concurrent: 1,
        ..QueueSettings::default()
    };
    let (queue, order) = queue_with_recorder(settings);

    // Fill the single slot so subsequent submissions stack up in the heap.
    let blocker = queue
        .submit(
            "blocker",
            None,
            "kg1",
            "u0",
            Decimal::ZERO,
            9,
            ExecutionMode::Worker,
        )
        .await
        .unwrap();

    // Give the worker a beat to claim the blocker.
    tokio::time::sleep(Duration::from_millis(150)).await;

    let low = queue
        .submit("low", None, "kg1", "u1", Decimal::ZERO, 2, ExecutionMode::Worker)
        .await
        .unwrap();
    let high = queue
        .submit("high", None, "kg1", "u2", Decimal::ZERO, 8, ExecutionMode::Worker)
        .await
        .unwrap();
    let mid_first = queue
        .submit("mid-first", None, "kg1", "u3", Decimal::ZERO, 5, ExecutionMode::Worker)
        .await
        .unwrap();
    let mid_second = queue
        .submit("mid-second", None, "kg1", "u4", Decimal::ZERO, 5, ExecutionMode::Worker)
        .await
        .unwrap();

    for id in [&blocker, &low, &high, &mid_first, &mid_second] {
        let status = queue.result(id, Duration::from_secs(10)).await.unwrap();
        assert!(status.status.is_terminal(), "{id} did not finish");
    }

    let order = order.lock().clone();
    assert_eq!(order[0], "blocker");
    assert_eq!(order[1], "high");
    assert_eq!(order[2], "mid-first");
    assert_eq!(order[3], "mid-second");
    assert_eq!(order[4], "low");
}

#[tokio::test]
async fn stats_track_queue_and_running_counts() {
    let settings = QueueSettings {
        max_concurrent: 0,
        ..QueueSettings::default()
    };
    let (queue, _) = queue_with_recorder(settings);

    for i in 0..3 {
        queue
            .submit(
                "RETURN 1",
                None,
                "kg1",
                &format!("u{i}"),
                Decimal::ZERO,
                5,
                ExecutionMode::Worker,
            )
            .await
            .unwrap();
    }

    let stats = queue.stats();
    assert_eq!(stats.queue_size, 3);
    assert_eq!(stats.running_queries, 0);
    assert_eq!(stats.users_with_queries, 3);
    assert!(stats.capacity_used > 0.0);
}
