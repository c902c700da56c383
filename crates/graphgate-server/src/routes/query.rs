//! The query execution endpoint.
//!
//! `POST /v1/graphs/{graph_id}/query` admits, analyzes, and routes each query
//! to the strategy that fits the query shape, the client's capabilities, and
//! the current system state.

use crate::auth::AuthenticatedUser;
use crate::error::ApiError;
use crate::models::{CypherQueryRequest, CypherQueryResponse, QueryOptions};
use crate::state::{AppState, CurrentUser, ResolveError};
use crate::streaming::{self, StreamContext};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use graphgate_core::config::ChunkSettings;
use graphgate_core::{translate_catalog_calls, GraphId};
use graphgate_queue::ExecutionMode;
use graphgate_strategy::{
    is_admin_operation, is_bulk_operation, is_schema_ddl, is_write_operation, ClientCapabilities,
    ClientDetector, ClientHeaders, ExecutionStrategy, QueryAnalyzer, ResponseMode,
    StrategySelector, SystemState,
};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const OPERATION_NAME: &str = "cypher_query";
/// Interactive results above this row count are truncated with advice.
const INTERACTIVE_TRUNCATION_THRESHOLD: usize = 10_000;
const INTERACTIVE_TRUNCATION_LIMIT: usize = 1000;

pub async fn execute_query(
    State(state): State<AppState>,
    Path(graph_id): Path<String>,
    Query(options): Query<QueryOptions>,
    headers: HeaderMap,
    AuthenticatedUser(user): AuthenticatedUser,
    Json(request): Json<CypherQueryRequest>,
) -> Result<Response, ApiError> {
    let started = std::time::Instant::now();

    let graph = GraphId::parse(&graph_id)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    state.breakers().check(graph.as_str(), OPERATION_NAME)?;

    validate_request(&state, &request)?;
    guard_query_surface(&graph, &request.query, &user)?;
    check_shared_repository_access(&state, &graph, &user).await?;

    let tier = state.repositories().tier_of(&graph);
    let chunk_size = ChunkSettings::clamp(
        options
            .chunk_size
            .unwrap_or_else(|| state.config().chunks.for_tier(tier)),
    );

    let repository = match state.repositories().resolve(&graph, &user).await {
        Ok(repository) => repository,
        Err(err) => {
            return Err(match err {
                ResolveError::AccessDenied(_) => ApiError::Forbidden(err.to_string()),
                ResolveError::NotFound(_) => ApiError::NotFound(err.to_string()),
            })
        }
    };

    let analysis = QueryAnalyzer::analyze(&request.query);
    let mut client = ClientDetector::detect(&client_headers(&headers));
    if options.test_mode {
        client.is_testing_tool = true;
        client.is_interactive = true;
    }

    let stats = state.queue().stats();
    let system = SystemState {
        queue_size: stats.queue_size,
        running_queries: stats.running_queries,
        max_concurrent: stats.max_concurrent,
    };

    let mode = options
        .mode
        .as_deref()
        .and_then(ResponseMode::from_name)
        .unwrap_or_default();

    let is_write = is_write_operation(&request.query);
    let decision = StrategySelector::select(&analysis, &client, &system, mode, is_write);

    tracing::info!(
        graph_id = %graph,
        user_id = %user.id,
        strategy = decision.strategy.as_str(),
        reason = decision.reason,
        estimated_size = analysis.estimated_size.as_str(),
        queue_size = system.queue_size,
        "query execution strategy selected"
    );

    let requested_timeout = Duration::from_secs(
        request
            .timeout
            .unwrap_or(state.config().query.default_timeout.as_secs()),
    );
    let context = if client.is_interactive {
        graphgate_robustness::TimeoutContext::Interactive
    } else if decision.strategy.is_streaming() {
        graphgate_robustness::TimeoutContext::Streaming
    } else {
        graphgate_robustness::TimeoutContext::Queued
    };
    let budget = state.timeouts().calculate(requested_timeout, context);

    let priority = state
        .config()
        .queue
        .priority_for_tier(user.is_premium());
    let cypher = translate_catalog_calls(&request.query);

    match decision.strategy {
        ExecutionStrategy::SseQueueStream => {
            let handle = state
                .bus()
                .create_operation("cypher_query_streaming", &user.id, graph.as_str(), None)
                .await;
            Ok(streaming::sse_queue_stream_response(
                state.clone(),
                repository,
                request,
                cypher,
                graph.as_str().to_string(),
                user.id.clone(),
                priority,
                chunk_size,
                handle.operation_id,
            ))
        }
        ExecutionStrategy::SseStreaming | ExecutionStrategy::SseProgress => {
            Ok(streaming::sse_response(StreamContext {
                state: state.clone(),
                repository,
                cypher,
                parameters: request.parameters,
                graph_id: graph.as_str().to_string(),
                chunk_size,
                execution_timeout: budget.execution,
            }))
        }
        ExecutionStrategy::NdjsonStreaming => Ok(streaming::ndjson_response(StreamContext {
            state: state.clone(),
            repository,
            cypher,
            parameters: request.parameters,
            graph_id: graph.as_str().to_string(),
            chunk_size,
            execution_timeout: budget.execution,
        })),
        ExecutionStrategy::JsonImmediate
        | ExecutionStrategy::JsonComplete
        | ExecutionStrategy::SyncTesting
        | ExecutionStrategy::Cached => {
            execute_json(
                &state, repository, &request, &cypher, &graph, &user, &client, &analysis,
                budget.execution, started, priority,
            )
            .await
        }
        ExecutionStrategy::TraditionalQueue | ExecutionStrategy::QueueSimple => {
            enqueue_query(&state, &request, &cypher, &graph, &user, priority).await
        }
    }
}

fn validate_request(state: &AppState, request: &CypherQueryRequest) -> Result<(), ApiError> {
    if request.query.trim().is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".into()));
    }
    if request.query.len() > state.config().query.max_query_length {
        return Err(ApiError::BadRequest(format!(
            "query exceeds maximum length of {} characters",
            state.config().query.max_query_length
        )));
    }
    if let Some(timeout) = request.timeout {
        if !(1..=300).contains(&timeout) {
            return Err(ApiError::BadRequest(
                "timeout must be between 1 and 300 seconds".into(),
            ));
        }
    }
    Ok(())
}

fn guard_query_surface(
    graph: &GraphId,
    query: &str,
    user: &CurrentUser,
) -> Result<(), ApiError> {
    if is_bulk_operation(query) {
        tracing::warn!(user_id = %user.id, "bulk operation attempted through query endpoint");
        return Err(ApiError::BadRequest(
            "Bulk operations (COPY, LOAD, IMPORT) are not allowed through the query endpoint. \
             Please use the staging pipeline for data ingestion."
                .into(),
        ));
    }
    if is_schema_ddl(query) {
        tracing::warn!(user_id = %user.id, "schema DDL attempted through query endpoint");
        return Err(ApiError::Forbidden(
            "Schema DDL operations (CREATE/DROP/ALTER TABLE) are not allowed. Graph schemas \
             are immutable after creation."
                .into(),
        ));
    }
    if is_admin_operation(query) {
        tracing::warn!(user_id = %user.id, "admin operation attempted through query endpoint");
        return Err(ApiError::Forbidden(
            "Administrative operations (EXPORT, INSTALL, ATTACH, ...) require operator privileges."
                .into(),
        ));
    }
    if is_write_operation(query) {
        if graph.is_shared_repository() {
            tracing::warn!(user_id = %user.id, graph_id = %graph, "write attempted on shared repository");
            return Err(ApiError::Forbidden(format!(
                "Write operations not allowed on shared repository '{graph}'"
            )));
        }
        tracing::warn!(user_id = %user.id, "write operation attempted through query endpoint");
        return Err(ApiError::Forbidden(
            "Write operations (CREATE, MERGE, SET, DELETE) are not allowed. The query endpoint \
             is read-only. Use the staging pipeline to load data: create a file upload, then \
             ingest it to the graph."
                .into(),
        ));
    }
    Ok(())
}

fn client_headers(headers: &HeaderMap) -> ClientHeaders {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    ClientHeaders {
        accept: get("accept"),
        user_agent: get("user-agent"),
        prefer: get("prefer"),
        referer: get("referer"),
    }
}

#[allow(clippy::too_many_arguments)]
async fn execute_json(
    state: &AppState,
    repository: Arc<dyn graphgate_core::Repository>,
    request: &CypherQueryRequest,
    cypher: &str,
    graph: &GraphId,
    user: &CurrentUser,
    client: &ClientCapabilities,
    analysis: &graphgate_strategy::QueryAnalysis,
    execution_timeout: Duration,
    started: std::time::Instant,
    priority: i32,
) -> Result<Response, ApiError> {
    let executed = tokio::time::timeout(
        execution_timeout,
        repository.execute_query(cypher, request.parameters.as_ref()),
    )
    .await;

    match executed {
        Ok(Ok(rows)) => {
            let execution_time_ms = started.elapsed().as_secs_f64() * 1000.0;
            let columns = graphgate_core::repository::columns_of(&rows);
            state.breakers().record_success(graph.as_str(), OPERATION_NAME);

            tracing::info!(
                graph_id = %graph,
                user_id = %user.id,
                row_count = rows.len(),
                duration_ms = execution_time_ms,
                "query completed"
            );

            // Interactive tools choke on very large unbounded results.
            if client.is_interactive
                && rows.len() > INTERACTIVE_TRUNCATION_THRESHOLD
                && !analysis.has_limit
            {
                let total = rows.len();
                let truncated: Vec<_> = rows.into_iter().take(INTERACTIVE_TRUNCATION_LIMIT).collect();
                let response = CypherQueryResponse {
                    success: true,
                    data: truncated,
                    columns,
                    row_count: total,
                    execution_time_ms,
                    graph_id: graph.as_str().to_string(),
                    timestamp: Utc::now().to_rfc3339(),
                    truncated: Some(true),
                    truncated_at: Some(INTERACTIVE_TRUNCATION_LIMIT),
                    warning: Some(format!(
                        "Result truncated from {total} to {INTERACTIVE_TRUNCATION_LIMIT} rows \
                         for interactive use. Add LIMIT to your query or use mode=stream for \
                         full results."
                    )),
                    suggestion: Some(json!({
                        "add_limit": format!("{} LIMIT {INTERACTIVE_TRUNCATION_LIMIT}", request.query),
                        "use_streaming": "Set mode=stream or Accept: text/event-stream",
                        "use_async": "Set mode=async to queue the query",
                    })),
                };
                return Ok(Json(response).into_response());
            }

            let response = CypherQueryResponse {
                success: true,
                row_count: rows.len(),
                data: rows,
                columns,
                execution_time_ms,
                graph_id: graph.as_str().to_string(),
                timestamp: Utc::now().to_rfc3339(),
                truncated: None,
                truncated_at: None,
                warning: None,
                suggestion: None,
            };
            Ok(Json(response).into_response())
        }
        Ok(Err(err)) => {
            state.breakers().record_failure(graph.as_str(), OPERATION_NAME);
            tracing::error!(graph_id = %graph, error = %err, "query failed");
            Err(ApiError::Internal(err.to_string()))
        }
        Err(_) => {
            state.breakers().record_failure(graph.as_str(), OPERATION_NAME);

            if client.is_interactive {
                let elapsed = started.elapsed().as_secs_f64();
                return Err(ApiError::Timeout(json!({
                    "error": "Query execution timeout",
                    "timeout_seconds": execution_timeout.as_secs(),
                    "elapsed_seconds": (elapsed * 10.0).round() / 10.0,
                    "suggestion": "Query is taking too long. Try these options:",
                    "options": {
                        "1_add_limit": "Add a LIMIT clause to reduce result size",
                        "2_use_async": "Set mode=async to queue the query",
                        "3_use_streaming": "Set mode=stream for progressive results",
                        "4_increase_timeout": format!(
                            "Increase timeout (current: {}s)",
                            execution_timeout.as_secs()
                        ),
                    },
                    "examples": {
                        "with_limit": format!("{} LIMIT 100", truncate_for_display(&request.query)),
                        "async_mode": "POST /v1/graphs/{graph_id}/query?mode=async",
                        "streaming": "curl -N -H 'Accept: text/event-stream' ...",
                    },
                })));
            }

            // Non-interactive timeout falls through to the queue.
            tracing::info!(graph_id = %graph, "direct execution timed out, falling back to queue");
            enqueue_query(state, request, cypher, graph, user, priority).await
        }
    }
}

fn truncate_for_display(query: &str) -> String {
    if query.len() > 50 {
        format!("{}...", &query[..50])
    } else {
        query.to_string()
    }
}

async fn enqueue_query(
    state: &AppState,
    request: &CypherQueryRequest,
    cypher: &str,
    graph: &GraphId,
    user: &CurrentUser,
    priority: i32,
) -> Result<Response, ApiError> {
    let query_id = state
        .queue()
        .submit(
            cypher,
            request.parameters.clone(),
            graph.as_str(),
            &user.id,
            Decimal::ZERO,
            priority,
            ExecutionMode::Worker,
        )
        .await?;

    let status = state.queue().status(&query_id);
    let handle = state
        .bus()
        .create_operation(
            "cypher_query",
            &user.id,
            graph.as_str(),
            Some(query_id.clone()),
        )
        .await;

    let queue_position = status
        .as_ref()
        .and_then(|s| s.queue_position)
        .unwrap_or(0);
    let estimated_wait = status
        .as_ref()
        .and_then(|s| s.estimated_wait_seconds)
        .unwrap_or(10.0);

    let body = json!({
        "status": "queued",
        "query_id": query_id,
        "operation_id": handle.operation_id,
        "queue_position": queue_position,
        "estimated_wait_seconds": estimated_wait,
        "message": "Query has been queued for execution",
        "_links": {
            "self": format!("/v1/graphs/{}/query", graph),
            "monitor": handle.stream_path(),
        },
    });

    Ok((StatusCode::ACCEPTED, Json(body)).into_response())
}

/// `GET /v1/graphs/{graph_id}/query/{query_id}`: queue status polling.
pub async fn query_status(
    State(state): State<AppState>,
    Path((_graph_id, query_id)): Path<(String, String)>,
    AuthenticatedUser(_user): AuthenticatedUser,
) -> Result<Response, ApiError> {
    match state.queue().status(&query_id) {
        Some(status) => Ok(Json(status).into_response()),
        None => Err(ApiError::NotFound(format!("query {query_id} not found"))),
    }
}

/// `DELETE /v1/graphs/{graph_id}/query/{query_id}`: cancels a pending query.
pub async fn cancel_query(
    State(state): State<AppState>,
    Path((_graph_id, query_id)): Path<(String, String)>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Response, ApiError> {
    if state.queue().cancel(&query_id, &user.id) {
        Ok(Json(json!({ "status": "cancelled", "query_id": query_id })).into_response())
    } else {
        Err(ApiError::NotFound(format!(
            "query {query_id} is not pending or not owned by the caller"
        )))
    }
}

/// Shared-repository guard: reads are included with the subscription, so the
/// caller must hold an active one and stay under the per-user query rate.
async fn check_shared_repository_access(
    state: &AppState,
    graph: &GraphId,
    user: &CurrentUser,
) -> Result<(), ApiError> {
    if !graph.is_shared_repository() {
        return Ok(());
    }

    let check = state
        .credits()
        .check_balance(
            graph.as_str(),
            Decimal::ZERO,
            Some(&user.id),
            graphgate_credits::OperationType::Query,
        )
        .await?;
    if let graphgate_credits::BalanceCheck::AccessDenied { reason, .. } = check {
        return Err(ApiError::Forbidden(reason));
    }

    state
        .shared_repo_limiter()
        .try_acquire(&format!("{}:{}", user.id, graph.parent()))
        .map_err(|err| {
            tracing::info!(
                user_id = %user.id,
                repository = graph.parent(),
                "shared repository rate limit hit"
            );
            ApiError::from(err)
        })?;

    Ok(())
}
