//! The query queue manager.

use crate::query::{QueryStatus, QueuedQuery};
use async_trait::async_trait;
use chrono::Utc;
use graphgate_core::config::QueueSettings;
use graphgate_core::RepositoryError;
use graphgate_robustness::{AdmissionController, AdmissionDecision, RejectReason};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[cfg(feature = "metrics")]
use metrics::{counter, histogram};

/// Bounded retention of completed queries.
const MAX_COMPLETED: usize = 10_000;
/// How long a finished query stays in the primary index.
const CLEANUP_DELAY: Duration = Duration::from_secs(300);
/// Average per-query estimate used for wait projections.
const AVG_QUERY_SECONDS: f64 = 2.0;

/// Executes queries on behalf of the queue worker.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(
        &self,
        cypher: &str,
        parameters: Option<&serde_json::Map<String, Value>>,
        graph_id: &str,
    ) -> Result<Value, RepositoryError>;
}

/// Who runs the query once the worker dispatches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// The worker invokes the injected executor (the 202/polling path).
    Worker,
    /// A streaming handler owns execution; the worker only grants the
    /// concurrency slot and the handler reports completion.
    External,
}

/// Why a submission was refused.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SubmitError {
    /// Admission control rejected the submission before queueing.
    #[error("query rejected: {detail}")]
    Rejected {
        reason: RejectReason,
        detail: String,
    },
    /// The queue is at capacity.
    #[error("query queue is full ({max} queries), retry later")]
    QueueFull { max: usize },
    /// The user already has the maximum number of queued queries.
    #[error("user query limit exceeded ({max} queries), wait for existing queries to complete")]
    UserLimit { max: usize },
}

/// Normalized view of a query across the pending/running/completed storages.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub id: String,
    pub status: QueryStatus,
    pub queue_position: Option<usize>,
    pub estimated_wait_seconds: Option<f64>,
    pub wait_time_seconds: f64,
    pub execution_time_seconds: Option<f64>,
    pub started_at: Option<chrono::DateTime<Utc>>,
    pub completed_at: Option<chrono::DateTime<Utc>>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

/// Queue statistics for strategy selection and health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub queue_size: usize,
    pub running_queries: usize,
    pub completed_queries: usize,
    pub users_with_queries: usize,
    pub capacity_used: f64,
    pub max_concurrent: usize,
}

struct PendingEntry {
    priority: i32,
    seq: u64,
    id: String,
}

impl PartialEq for PendingEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for PendingEntry {}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingEntry {
    // Max-heap: higher priority first, earlier submission breaking ties.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct State {
    heap: BinaryHeap<PendingEntry>,
    queries: HashMap<String, QueuedQuery>,
    per_user: HashMap<String, usize>,
    completed: HashMap<String, QueuedQuery>,
    completed_order: VecDeque<String>,
    external: HashSet<String>,
}

impl State {
    fn decrement_user(&mut self, user_id: &str) {
        if let Some(count) = self.per_user.get_mut(user_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.per_user.remove(user_id);
            }
        }
    }

    fn retire(&mut self, query: QueuedQuery) {
        self.completed_order.push_back(query.id.clone());
        self.completed.insert(query.id.clone(), query);
        while self.completed_order.len() > MAX_COMPLETED {
            if let Some(oldest) = self.completed_order.pop_front() {
                self.completed.remove(&oldest);
            }
        }
    }
}

struct Inner {
    settings: QueueSettings,
    admission: Arc<AdmissionController>,
    executor: Arc<dyn QueryExecutor>,
    state: Mutex<State>,
    notify: Notify,
    worker_started: AtomicBool,
    running: AtomicUsize,
    seq: AtomicU64,
}

/// Priority query queue with a single dispatching worker.
#[derive(Clone)]
pub struct QueryQueue {
    inner: Arc<Inner>,
}

impl QueryQueue {
    pub fn new(
        settings: QueueSettings,
        admission: Arc<AdmissionController>,
        executor: Arc<dyn QueryExecutor>,
    ) -> Self {
        tracing::info!(
            max_size = settings.max_queue_size,
            max_concurrent = settings.max_concurrent,
            "query queue initialized"
        );
        Self {
            inner: Arc::new(Inner {
                settings,
                admission,
                executor,
                state: Mutex::new(State::default()),
                notify: Notify::new(),
                worker_started: AtomicBool::new(false),
                running: AtomicUsize::new(0),
                seq: AtomicU64::new(0),
            }),
        }
    }

    fn ensure_worker(&self) {
        if !self
            .inner
            .worker_started
            .swap(true, AtomicOrdering::SeqCst)
        {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                tracing::info!("query queue worker started");
                worker_loop(inner).await;
            });
        }
    }

    /// Submits a query. Admission control runs first, then hard capacity and
    /// the per-user limit; the returned id tracks the query everywhere.
    #[allow(clippy::too_many_arguments)]
    pub async fn submit(
        &self,
        cypher: &str,
        parameters: Option<serde_json::Map<String, Value>>,
        graph_id: &str,
        user_id: &str,
        credits_reserved: Decimal,
        priority: i32,
        mode: ExecutionMode,
    ) -> Result<String, SubmitError> {
        self.ensure_worker();

        let (queue_depth, running) = {
            let state = self.inner.state.lock();
            (
                state.heap.len(),
                self.inner.running.load(AtomicOrdering::Relaxed),
            )
        };

        let decision = self.inner.admission.check_admission(
            queue_depth,
            self.inner.settings.max_queue_size,
            running,
            priority,
        );
        if let AdmissionDecision::Reject { reason, detail } = decision {
            self.record_submission(graph_id, false, Some(reason.as_str()));
            return Err(SubmitError::Rejected { reason, detail });
        }

        let mut state = self.inner.state.lock();

        if state.heap.len() >= self.inner.settings.max_queue_size {
            drop(state);
            self.record_submission(graph_id, false, Some("queue_full"));
            return Err(SubmitError::QueueFull {
                max: self.inner.settings.max_queue_size,
            });
        }

        let user_count = state.per_user.get(user_id).copied().unwrap_or(0);
        if user_count >= self.inner.settings.max_per_user {
            drop(state);
            self.record_submission(graph_id, false, Some("user_limit"));
            return Err(SubmitError::UserLimit {
                max: self.inner.settings.max_per_user,
            });
        }

        let id = format!("q_{}", &uuid::Uuid::new_v4().simple().to_string()[..12]);
        let query = QueuedQuery {
            id: id.clone(),
            cypher: cypher.to_string(),
            parameters,
            graph_id: graph_id.to_string(),
            user_id: user_id.to_string(),
            priority,
            credits_reserved,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            status: QueryStatus::Pending,
            result: None,
            error: None,
        };

        state.queries.insert(id.clone(), query);
        *state.per_user.entry(user_id.to_string()).or_insert(0) += 1;
        if mode == ExecutionMode::External {
            state.external.insert(id.clone());
        }
        state.heap.push(PendingEntry {
            priority,
            seq: self.inner.seq.fetch_add(1, AtomicOrdering::Relaxed),
            id: id.clone(),
        });
        let queue_size = state.heap.len();
        drop(state);

        self.inner.notify.notify_one();
        self.record_submission(graph_id, true, None);
        tracing::info!(query_id = %id, user_id, priority, queue_size, "query submitted");

        Ok(id)
    }

    fn record_submission(&self, _graph_id: &str, success: bool, _rejection: Option<&str>) {
        #[cfg(feature = "metrics")]
        {
            let outcome = if success {
                "accepted".to_string()
            } else {
                _rejection.unwrap_or("rejected").to_string()
            };
            counter!("query_queue_submissions_total", "outcome" => outcome).increment(1);
        }
        #[cfg(not(feature = "metrics"))]
        let _ = success;
    }

    /// Current status of a query across all three storages.
    pub fn status(&self, query_id: &str) -> Option<QueueStatus> {
        let state = self.inner.state.lock();

        if let Some(query) = state.completed.get(query_id) {
            return Some(QueueStatus {
                id: query.id.clone(),
                status: query.status,
                queue_position: None,
                estimated_wait_seconds: None,
                wait_time_seconds: query.wait_time_seconds(),
                execution_time_seconds: query.execution_time_seconds(),
                started_at: query.started_at,
                completed_at: query.completed_at,
                result: query.result.clone(),
                error: query.error.clone(),
            });
        }

        let query = state.queries.get(query_id)?;
        match query.status {
            QueryStatus::Pending => {
                // Approximate: the heap cannot be inspected positionally.
                let position = state.heap.len();
                Some(QueueStatus {
                    id: query.id.clone(),
                    status: QueryStatus::Pending,
                    queue_position: Some(position),
                    estimated_wait_seconds: Some(self.estimate_wait(position)),
                    wait_time_seconds: query.wait_time_seconds(),
                    execution_time_seconds: None,
                    started_at: None,
                    completed_at: None,
                    result: None,
                    error: None,
                })
            }
            _ => Some(QueueStatus {
                id: query.id.clone(),
                status: query.status,
                queue_position: None,
                estimated_wait_seconds: None,
                wait_time_seconds: query.wait_time_seconds(),
                execution_time_seconds: query.execution_time_seconds(),
                started_at: query.started_at,
                completed_at: query.completed_at,
                result: query.result.clone(),
                error: query.error.clone(),
            }),
        }
    }

    fn estimate_wait(&self, position: usize) -> f64 {
        (position as f64 / self.inner.settings.max_concurrent as f64) * AVG_QUERY_SECONDS
    }

    /// Polling helper for non-SSE clients: waits up to `wait` for completion,
    /// then returns the last-known status.
    pub async fn result(&self, query_id: &str, wait: Duration) -> Option<QueueStatus> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let status = self.status(query_id);
            match &status {
                Some(s) if s.status.is_terminal() => return status,
                _ => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Cancels a pending query. Only the owner may cancel, and only before
    /// the worker picks it up.
    pub fn cancel(&self, query_id: &str, user_id: &str) -> bool {
        let mut state = self.inner.state.lock();
        let Some(query) = state.queries.get_mut(query_id) else {
            return false;
        };
        if query.user_id != user_id || query.status != QueryStatus::Pending {
            return false;
        }

        query.status = QueryStatus::Cancelled;
        query.completed_at = Some(Utc::now());
        let retired = query.clone();
        let owner = query.user_id.clone();
        state.retire(retired);
        state.decrement_user(&owner);
        drop(state);

        #[cfg(feature = "metrics")]
        counter!("query_queue_completions_total", "status" => "cancelled").increment(1);

        tracing::info!(query_id, user_id, "query cancelled");
        self.schedule_cleanup(query_id.to_string());
        true
    }

    /// Reports completion of an externally executed query, releasing its
    /// concurrency slot.
    pub fn mark_completed(&self, query_id: &str, summary: Value) -> bool {
        self.finish_external(query_id, QueryStatus::Completed, Some(summary), None)
    }

    /// Reports failure of an externally executed query.
    pub fn mark_failed(&self, query_id: &str, error: String) -> bool {
        self.finish_external(query_id, QueryStatus::Failed, None, Some(error))
    }

    fn finish_external(
        &self,
        query_id: &str,
        status: QueryStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> bool {
        let externally_owned = {
            let state = self.inner.state.lock();
            state.external.contains(query_id)
                && state
                    .queries
                    .get(query_id)
                    .is_some_and(|q| q.status == QueryStatus::Running)
        };
        if !externally_owned {
            return false;
        }
        finalize(&self.inner, query_id, status, result, error);
        self.schedule_cleanup(query_id.to_string());
        true
    }

    /// Queue statistics.
    pub fn stats(&self) -> QueueStats {
        let state = self.inner.state.lock();
        let queue_size = state.heap.len();
        QueueStats {
            queue_size,
            running_queries: self.inner.running.load(AtomicOrdering::Relaxed),
            completed_queries: state.completed.len(),
            users_with_queries: state.per_user.len(),
            capacity_used: queue_size as f64 / self.inner.settings.max_queue_size as f64,
            max_concurrent: self.inner.settings.max_concurrent,
        }
    }

    /// Stats plus admission health, for deep health endpoints.
    pub fn health(&self) -> (QueueStats, graphgate_robustness::AdmissionHealth) {
        let stats = self.stats();
        let health = self
            .inner
            .admission
            .health_status(stats.queue_size, self.inner.settings.max_queue_size);
        (stats, health)
    }

    /// Per-user pending/running count, the queue's fairness source of truth.
    pub fn user_query_count(&self, user_id: &str) -> usize {
        self.inner
            .state
            .lock()
            .per_user
            .get(user_id)
            .copied()
            .unwrap_or(0)
    }

    fn schedule_cleanup(&self, query_id: String) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(CLEANUP_DELAY).await;
            inner.state.lock().queries.remove(&query_id);
        });
    }
}

async fn worker_loop(inner: Arc<Inner>) {
    loop {
        if inner.running.load(AtomicOrdering::Relaxed) >= inner.settings.max_concurrent {
            tokio::time::sleep(Duration::from_millis(100)).await;
            continue;
        }

        let entry = inner.state.lock().heap.pop();
        let Some(entry) = entry else {
            // Bounded wait so cancellations and shutdown stay observable.
            let _ = tokio::time::timeout(Duration::from_secs(1), inner.notify.notified()).await;
            continue;
        };

        let dispatched = {
            let mut state = inner.state.lock();
            match state.queries.get_mut(&entry.id) {
                Some(query) if query.status == QueryStatus::Pending => {
                    query.status = QueryStatus::Running;
                    query.started_at = Some(Utc::now());
                    Some((query.clone(), state.external.contains(&entry.id)))
                }
                // Cancelled while pending; the heap entry is stale.
                _ => None,
            }
        };
        let Some((query, external)) = dispatched else {
            continue;
        };

        inner.running.fetch_add(1, AtomicOrdering::Relaxed);

        #[cfg(feature = "metrics")]
        histogram!("query_queue_wait_seconds").record(query.wait_time_seconds());

        tracing::info!(
            query_id = %query.id,
            wait_seconds = query.wait_time_seconds(),
            running = inner.running.load(AtomicOrdering::Relaxed),
            "query started"
        );

        if external {
            // The streaming handler executes; the slot is released by
            // mark_completed / mark_failed.
            continue;
        }

        let task_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            execute_query(task_inner, query).await;
        });
    }
}

async fn execute_query(inner: Arc<Inner>, query: QueuedQuery) {
    let timeout = inner.settings.execution_timeout;
    let executed = tokio::time::timeout(
        timeout,
        inner
            .executor
            .execute(&query.cypher, query.parameters.as_ref(), &query.graph_id),
    )
    .await;

    let (status, result, error) = match executed {
        Err(_) => {
            tracing::error!(query_id = %query.id, "query timed out");
            (
                QueryStatus::Failed,
                None,
                Some(format!("Query timeout after {} seconds", timeout.as_secs())),
            )
        }
        Ok(Err(err)) => {
            tracing::error!(query_id = %query.id, error = %err, "query failed");
            (QueryStatus::Failed, None, Some(err.to_string()))
        }
        Ok(Ok(value)) => (QueryStatus::Completed, Some(value), None),
    };

    finalize(&inner, &query.id, status, result, error);

    let inner_cleanup = Arc::clone(&inner);
    let query_id = query.id.clone();
    tokio::spawn(async move {
        tokio::time::sleep(CLEANUP_DELAY).await;
        inner_cleanup.state.lock().queries.remove(&query_id);
    });
}

fn finalize(
    inner: &Arc<Inner>,
    query_id: &str,
    status: QueryStatus,
    result: Option<Value>,
    error: Option<String>,
) {
    let mut state = inner.state.lock();
    let Some(query) = state.queries.get_mut(query_id) else {
        return;
    };

    query.status = status;
    query.completed_at = Some(Utc::now());
    query.result = result;
    query.error = error;
    let retired = query.clone();
    let owner = query.user_id.clone();

    #[cfg(feature = "metrics")]
    {
        if let Some(execution) = retired.execution_time_seconds() {
            histogram!("query_queue_execution_seconds").record(execution);
        }
        let error_type = match (&retired.status, retired.error.as_deref()) {
            (QueryStatus::Failed, Some(e)) if e.contains("timeout") => "timeout",
            (QueryStatus::Failed, _) => "execution_error",
            _ => "none",
        };
        counter!(
            "query_queue_completions_total",
            "status" => retired.status.as_str(),
            "error_type" => error_type
        )
        .increment(1);
    }

    state.retire(retired);
    state.decrement_user(&owner);
    state.external.remove(query_id);
    drop(state);

    inner.running.fetch_sub(1, AtomicOrdering::Relaxed);
    inner.notify.notify_one();
}
