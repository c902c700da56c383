use async_trait::async_trait;
use graphgate_core::config::{AdmissionSettings, QueueSettings};
use graphgate_core::RepositoryError;
use graphgate_queue::{ExecutionMode, QueryExecutor, QueryQueue, SubmitError};
use graphgate_robustness::{AdmissionController, RejectReason, StaticPressure};
use rust_decimal::Decimal;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

struct NullExecutor;

#[async_trait]
impl QueryExecutor for NullExecutor {
    async fn execute(
        &self,
        _cypher: &str,
        _parameters: Option<&serde_json::Map<String, Value>>,
        _graph_id: &str,
    ) -> Result<Value, RepositoryError> {
        Ok(Value::Null)
    }
}

fn harness(
    settings: QueueSettings,
    pressure: Arc<StaticPressure>,
) -> QueryQueue {
    let admission = Arc::new(AdmissionController::new(
        AdmissionSettings::default(),
        pressure,
        settings.default_priority,
    ));
    QueryQueue::new(settings, admission, Arc::new(NullExecutor))
}

async fn submit(queue: &QueryQueue, user: &str, priority: i32) -> Result<String, SubmitError> {
    queue
        .submit(
            "RETURN 1",
            None,
            "kg1",
            user,
            Decimal::ZERO,
            priority,
            ExecutionMode::Worker,
        )
        .await
}

#[tokio::test]
async fn full_queue_rejects_submissions() {
    let settings = QueueSettings {
        max_queue_size: 2,
        max_concurrent: 0,
        ..QueueSettings::default()
    };
    let queue = harness(settings, StaticPressure::new());

    submit(&queue, "u1", 5).await.unwrap();
    submit(&queue, "u2", 5).await.unwrap();

    // Hard capacity backstop fires even before the admission threshold.
    let err = submit(&queue, "u3", 5).await.unwrap_err();
    assert!(matches!(
        err,
        SubmitError::QueueFull { .. } | SubmitError::Rejected { .. }
    ));
}

#[tokio::test]
async fn memory_pressure_rejects_before_queueing() {
    let pressure = StaticPressure::new();
    pressure.set_memory_percent(95.0);
    let settings = QueueSettings {
        max_concurrent: 0,
        ..QueueSettings::default()
    };
    let queue = harness(settings, pressure);

    match submit(&queue, "u1", 5).await.unwrap_err() {
        SubmitError::Rejected { reason, .. } => assert_eq!(reason, RejectReason::Memory),
        other => panic!("expected admission rejection, got {other:?}"),
    }
    assert_eq!(queue.stats().queue_size, 0);
}

#[tokio::test]
async fn load_shedding_spares_default_priority() {
    let pressure = StaticPressure::new();
    pressure.set_pressure_score(0.95);
    let settings = QueueSettings {
        max_concurrent: 0,
        ..QueueSettings::default()
    };
    let queue = harness(settings, pressure);

    match submit(&queue, "u1", 2).await.unwrap_err() {
        SubmitError::Rejected { reason, .. } => assert_eq!(reason, RejectReason::LoadShed),
        other => panic!("expected load shed, got {other:?}"),
    }
    assert!(submit(&queue, "u1", 5).await.is_ok());
}

/// The per-user count never exceeds the cap and drains back to zero.
#[tokio::test]
async fn per_user_counts_return_to_zero_after_completion() {
    let settings = QueueSettings {
        max_per_user: 3,
        ..QueueSettings::default()
    };
    let queue = harness(settings, StaticPressure::new());

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(submit(&queue, "u1", 5).await.unwrap());
    }
    assert!(queue.user_query_count("u1") <= 3);

    for id in &ids {
        let status = queue.result(id, Duration::from_secs(5)).await.unwrap();
        assert!(status.status.is_terminal());
    }
    assert_eq!(queue.user_query_count("u1"), 0);

    // The drained user can submit again.
    assert!(submit(&queue, "u1", 5).await.is_ok());
}
