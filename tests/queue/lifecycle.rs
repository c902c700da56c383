use async_trait::async_trait;
use graphgate_core::config::{AdmissionSettings, QueueSettings};
use graphgate_core::RepositoryError;
use graphgate_queue::{ExecutionMode, QueryExecutor, QueryQueue, QueryStatus};
use graphgate_robustness::{AdmissionController, StaticPressure};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Executor whose behavior is selected by the query text.
struct ScriptedExecutor;

#[async_trait]
impl QueryExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        cypher: &str,
        _parameters: Option<&serde_json::Map<String, Value>>,
        _graph_id: &str,
    ) -> Result<Value, RepositoryError> {
        match cypher {
            "fail" => Err(RepositoryError::Query("engine exploded".into())),
            "hang" => {
                tokio::time::sleep(Duration::from_secs(600)).await;
                Ok(Value::Null)
            }
            other => Ok(json!({ "echo": other })),
        }
    }
}

fn queue(settings: QueueSettings) -> QueryQueue {
    let admission = Arc::new(AdmissionController::new(
        AdmissionSettings::default(),
        StaticPressure::new(),
        settings.default_priority,
    ));
    QueryQueue::new(settings, admission, Arc::new(ScriptedExecutor))
}

async fn submit(q: &QueryQueue, cypher: &str, mode: ExecutionMode) -> String {
    q.submit(cypher, None, "kg1", "u1", Decimal::ZERO, 5, mode)
        .await
        .unwrap()
}

#[tokio::test]
async fn completed_query_carries_its_result() {
    let q = queue(QueueSettings::default());
    let id = submit(&q, "RETURN 1", ExecutionMode::Worker).await;

    let status = q.result(&id, Duration::from_secs(5)).await.unwrap();
    assert_eq!(status.status, QueryStatus::Completed);
    assert_eq!(status.result.unwrap()["echo"], json!("RETURN 1"));
    assert!(status.execution_time_seconds.is_some());
    assert!(status.completed_at.is_some());
}

#[tokio::test]
async fn failed_query_reports_the_engine_error() {
    let q = queue(QueueSettings::default());
    let id = submit(&q, "fail", ExecutionMode::Worker).await;

    let status = q.result(&id, Duration::from_secs(5)).await.unwrap();
    assert_eq!(status.status, QueryStatus::Failed);
    assert!(status.error.unwrap().contains("engine exploded"));
}

#[tokio::test]
async fn hung_query_fails_with_a_timeout_message() {
    let settings = QueueSettings {
        execution_timeout: Duration::from_millis(200),
        ..QueueSettings::default()
    };
    let q = queue(settings);
    let id = submit(&q, "hang", ExecutionMode::Worker).await;

    let status = q.result(&id, Duration::from_secs(5)).await.unwrap();
    assert_eq!(status.status, QueryStatus::Failed);
    assert!(status.error.unwrap().contains("Query timeout after"));
}

#[tokio::test]
async fn pending_status_reports_position_and_estimate() {
    let settings = QueueSettings {
        max_concurrent: 0,
        ..QueueSettings::default()
    };
    let q = queue(settings);
    let id = submit(&q, "RETURN 1", ExecutionMode::Worker).await;

    let status = q.status(&id).unwrap();
    assert_eq!(status.status, QueryStatus::Pending);
    assert!(status.queue_position.is_some());
    assert!(status.estimated_wait_seconds.is_some());
}

#[tokio::test]
async fn result_polling_times_out_to_last_known_status() {
    let settings = QueueSettings {
        max_concurrent: 0,
        ..QueueSettings::default()
    };
    let q = queue(settings);
    let id = submit(&q, "RETURN 1", ExecutionMode::Worker).await;

    let status = q.result(&id, Duration::from_millis(300)).await.unwrap();
    assert_eq!(status.status, QueryStatus::Pending);
}

#[tokio::test]
async fn cancelled_query_is_skipped_by_the_worker() {
    let settings = QueueSettings {
        max_concurrent: 0,
        ..QueueSettings::default()
    };
    let q = queue(settings);
    let id = submit(&q, "RETURN 1", ExecutionMode::Worker).await;
    assert!(q.cancel(&id, "u1"));

    // The stale heap entry must not resurrect the query.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let status = q.status(&id).unwrap();
    assert_eq!(status.status, QueryStatus::Cancelled);
}

/// External execution: the worker grants the slot, the caller streams and
/// reports completion.
#[tokio::test]
async fn external_queries_wait_for_their_owner_to_finish_them() {
    let settings = QueueSettings {
        max_concurrent: 1,
        ..QueueSettings::default()
    };
    let q = queue(settings);
    let id = submit(&q, "streamed", ExecutionMode::External).await;

    // The worker transitions it to Running but does not execute.
    let mut running = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if q.status(&id).unwrap().status == QueryStatus::Running {
            running = true;
            break;
        }
    }
    assert!(running, "external query never reached Running");

    // The slot is held while the stream runs.
    assert_eq!(q.stats().running_queries, 1);

    assert!(q.mark_completed(&id, json!({ "rows": 42 })));
    let status = q.status(&id).unwrap();
    assert_eq!(status.status, QueryStatus::Completed);
    assert_eq!(status.result.unwrap()["rows"], json!(42));
    assert_eq!(q.stats().running_queries, 0);
    assert_eq!(q.user_query_count("u1"), 0);
}

#[tokio::test]
async fn external_failure_releases_the_slot() {
    let settings = QueueSettings {
        max_concurrent: 1,
        ..QueueSettings::default()
    };
    let q = queue(settings);
    let id = submit(&q, "streamed", ExecutionMode::External).await;

    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if q.status(&id).unwrap().status == QueryStatus::Running {
            break;
        }
    }

    assert!(q.mark_failed(&id, "client disconnected".into()));
    assert_eq!(q.status(&id).unwrap().status, QueryStatus::Failed);
    assert_eq!(q.stats().running_queries, 0);
}

#[tokio::test]
async fn mark_completed_rejects_worker_owned_queries() {
    let q = queue(QueueSettings::default());
    let id = submit(&q, "RETURN 1", ExecutionMode::Worker).await;
    // Worker-owned queries cannot be finished externally.
    assert!(!q.mark_completed(&id, Value::Null));
}
