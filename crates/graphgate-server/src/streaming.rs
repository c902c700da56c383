//! Streaming response emitters.
//!
//! NDJSON and SSE share a chunking discipline; the queue-then-stream path
//! adds queue position updates before the standard pipeline. Each response is
//! produced by a task writing into a channel owned by the request body, so a
//! client disconnect drops the receiver and the producer stops at its next
//! send.

use crate::models::CypherQueryRequest;
use crate::state::AppState;
use axum::body::{Body, Bytes};
use axum::http::header;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures::StreamExt;
use graphgate_core::{ChunkStream, QueryChunk, Repository, RepositoryError};
use graphgate_queue::{ExecutionMode, QueryStatus};
use graphgate_sse::EventType;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const OPERATION_NAME: &str = "cypher_query";
/// Progress cadence: one progress event per this many chunks.
const PROGRESS_EVERY_CHUNKS: usize = 10;

/// Everything a streaming task needs, detached from the request lifetime.
pub struct StreamContext {
    pub state: AppState,
    pub repository: Arc<dyn Repository>,
    pub cypher: String,
    pub parameters: Option<serde_json::Map<String, Value>>,
    pub graph_id: String,
    pub chunk_size: usize,
    pub execution_timeout: Duration,
}

impl StreamContext {
    /// Opens the chunk stream, buffering under the execution timeout when
    /// the engine has no native streaming.
    async fn open_stream(&self) -> Result<ChunkStream, RepositoryError> {
        if self.repository.supports_streaming() {
            self.repository
                .execute_query_streaming(&self.cypher, self.parameters.as_ref(), self.chunk_size)
                .await
        } else {
            tokio::time::timeout(
                self.execution_timeout,
                self.repository.execute_query_streaming(
                    &self.cypher,
                    self.parameters.as_ref(),
                    self.chunk_size,
                ),
            )
            .await
            .map_err(|_| RepositoryError::Timeout {
                seconds: self.execution_timeout.as_secs(),
            })?
        }
    }
}

fn sse_event(name: &str, payload: Value) -> Event {
    match Event::default().event(name.to_string()).json_data(&payload) {
        Ok(event) => event,
        Err(_) => Event::default().event(name.to_string()).data("{}"),
    }
}

/// Streams query results as newline-delimited JSON.
pub fn ndjson_response(ctx: StreamContext) -> Response {
    let graph_id = ctx.graph_id.clone();
    let (tx, rx) = mpsc::channel::<Result<Bytes, Infallible>>(16);
    tokio::spawn(run_ndjson(ctx, tx));

    let mut response = Body::from_stream(ReceiverStream::new(rx)).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, "application/x-ndjson".parse().unwrap());
    headers.insert(header::CACHE_CONTROL, "no-cache".parse().unwrap());
    headers.insert("X-Streaming", "true".parse().unwrap());
    headers.insert("X-Stream-Format", "ndjson".parse().unwrap());
    if let Ok(value) = graph_id.parse() {
        headers.insert("X-Graph-ID", value);
    }
    headers.insert("X-Accel-Buffering", "no".parse().unwrap());
    response
}

async fn run_ndjson(ctx: StreamContext, tx: mpsc::Sender<Result<Bytes, Infallible>>) {
    let started = std::time::Instant::now();
    let send_line = |value: Value| {
        let tx = tx.clone();
        async move {
            let line = format!("{value}\n");
            tx.send(Ok(Bytes::from(line))).await.is_ok()
        }
    };

    let mut stream = match ctx.open_stream().await {
        Ok(stream) => stream,
        Err(err) => {
            emit_ndjson_error(&ctx, &tx, &err).await;
            return;
        }
    };

    let mut chunk_index = 0usize;
    let mut total_rows = 0usize;

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                emit_ndjson_error(&ctx, &tx, &err).await;
                return;
            }
        };

        let QueryChunk { rows, columns } = chunk;
        let row_count = rows.len();
        total_rows += row_count;
        let mut line = json!({
            "chunk_index": chunk_index,
            "rows": rows,
            "row_count": row_count,
            "total_rows_sent": total_rows,
        });
        if chunk_index == 0 {
            if let Some(columns) = columns {
                line["columns"] = json!(columns);
            }
        }
        if !send_line(line).await {
            return;
        }
        chunk_index += 1;
    }

    let sentinel = json!({
        "complete": true,
        "total_rows": total_rows,
        "execution_time_ms": started.elapsed().as_secs_f64() * 1000.0,
        "graph_id": ctx.graph_id,
        "timestamp": Utc::now().to_rfc3339(),
    });
    if send_line(sentinel).await {
        ctx.state
            .breakers()
            .record_success(&ctx.graph_id, OPERATION_NAME);
        tracing::info!(
            graph_id = %ctx.graph_id,
            total_rows,
            chunks = chunk_index,
            "ndjson streaming completed"
        );
    }
}

async fn emit_ndjson_error(
    ctx: &StreamContext,
    tx: &mpsc::Sender<Result<Bytes, Infallible>>,
    err: &RepositoryError,
) {
    let line = json!({
        "error": err.to_string(),
        "error_type": error_type(err),
        "graph_id": ctx.graph_id,
        "timestamp": Utc::now().to_rfc3339(),
    });
    let _ = tx.send(Ok(Bytes::from(format!("{line}\n")))).await;
    ctx.state
        .breakers()
        .record_failure(&ctx.graph_id, OPERATION_NAME);
    tracing::error!(graph_id = %ctx.graph_id, error = %err, "ndjson streaming failed");
}

fn error_type(err: &RepositoryError) -> &'static str {
    match err {
        RepositoryError::Timeout { .. } => "timeout",
        RepositoryError::AccessDenied(_) => "access_denied",
        RepositoryError::NotFound(_) => "not_found",
        RepositoryError::Query(_) => "query_error",
    }
}

/// Streams query results over Server-Sent Events.
pub fn sse_response(ctx: StreamContext) -> Response {
    let keepalive = ctx.state.config().sse.keepalive;
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(16);
    tokio::spawn(run_sse(ctx, tx));

    let mut response = Sse::new(ReceiverStream::new(rx))
        .keep_alive(KeepAlive::new().interval(keepalive))
        .into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, "no-cache".parse().unwrap());
    headers.insert("X-Stream-Format", "sse".parse().unwrap());
    headers.insert("X-Accel-Buffering", "no".parse().unwrap());
    response
}

async fn run_sse(ctx: StreamContext, tx: mpsc::Sender<Result<Event, Infallible>>) {
    let started = std::time::Instant::now();
    let send = |event: Event| {
        let tx = tx.clone();
        async move { tx.send(Ok(event)).await.is_ok() }
    };

    if !send(sse_event(
        "started",
        json!({
            "graph_id": ctx.graph_id,
            "timestamp": Utc::now().to_rfc3339(),
            "message": "Query execution started",
        }),
    ))
    .await
    {
        return;
    }

    let mut stream = match ctx.open_stream().await {
        Ok(stream) => stream,
        Err(err) => {
            send_sse_failure(&ctx, &tx, &err).await;
            return;
        }
    };

    let mut schema_sent = false;
    let mut chunk_count = 0usize;
    let mut total_rows = 0usize;

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                send_sse_failure(&ctx, &tx, &err).await;
                return;
            }
        };

        let QueryChunk { rows, columns } = chunk;

        if !schema_sent {
            if let Some(columns) = &columns {
                if !send(sse_event("schema", json!({ "columns": columns }))).await {
                    return;
                }
            }
            schema_sent = true;
        }

        chunk_count += 1;
        let rows_in_chunk = rows.len();
        total_rows += rows_in_chunk;

        if !send(sse_event(
            "chunk",
            json!({
                "chunk_number": chunk_count,
                "rows": rows,
                "rows_in_chunk": rows_in_chunk,
                "total_rows": total_rows,
            }),
        ))
        .await
        {
            return;
        }

        if chunk_count % PROGRESS_EVERY_CHUNKS == 0
            && !send(sse_event(
                "progress",
                json!({
                    "chunks_processed": chunk_count,
                    "rows_processed": total_rows,
                    "message": format!("Processed {total_rows} rows..."),
                }),
            ))
            .await
        {
            return;
        }
    }

    let complete = sse_event(
        "complete",
        json!({
            "total_rows": total_rows,
            "total_chunks": chunk_count,
            "execution_time_seconds": started.elapsed().as_secs_f64(),
            "graph_id": ctx.graph_id,
            "timestamp": Utc::now().to_rfc3339(),
        }),
    );
    if send(complete).await {
        ctx.state
            .breakers()
            .record_success(&ctx.graph_id, OPERATION_NAME);
        tracing::info!(
            graph_id = %ctx.graph_id,
            total_rows,
            chunks = chunk_count,
            "sse streaming completed"
        );
    }
}

async fn send_sse_failure(
    ctx: &StreamContext,
    tx: &mpsc::Sender<Result<Event, Infallible>>,
    err: &RepositoryError,
) {
    let event = match err {
        RepositoryError::Timeout { seconds } => sse_event(
            "timeout",
            json!({
                "error": "Query execution timeout",
                "timeout_seconds": seconds,
            }),
        ),
        other => sse_event(
            "error",
            json!({
                "error": other.to_string(),
                "error_type": error_type(other),
            }),
        ),
    };
    let _ = tx.send(Ok(event)).await;
    ctx.state
        .breakers()
        .record_failure(&ctx.graph_id, OPERATION_NAME);
    tracing::error!(graph_id = %ctx.graph_id, error = %err, "sse streaming failed");
}

/// Queue-then-stream: queue updates over SSE, then the standard chunk
/// pipeline once the worker grants the slot. Lifecycle events are mirrored
/// to the operation bus so the unified operations endpoint sees them too.
#[allow(clippy::too_many_arguments)]
pub fn sse_queue_stream_response(
    state: AppState,
    repository: Arc<dyn Repository>,
    request: CypherQueryRequest,
    cypher: String,
    graph_id: String,
    user_id: String,
    priority: i32,
    chunk_size: usize,
    operation_id: String,
) -> Response {
    let keepalive = state.config().sse.keepalive;
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(16);
    tokio::spawn(run_sse_queue_stream(
        state,
        repository,
        request,
        cypher,
        graph_id,
        user_id,
        priority,
        chunk_size,
        operation_id,
        tx,
    ));

    let mut response = Sse::new(ReceiverStream::new(rx))
        .keep_alive(KeepAlive::new().interval(keepalive))
        .into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, "no-cache".parse().unwrap());
    headers.insert("X-Stream-Mode", "queue-and-stream".parse().unwrap());
    headers.insert("X-Accel-Buffering", "no".parse().unwrap());
    response
}

#[allow(clippy::too_many_arguments)]
async fn run_sse_queue_stream(
    state: AppState,
    repository: Arc<dyn Repository>,
    request: CypherQueryRequest,
    cypher: String,
    graph_id: String,
    user_id: String,
    priority: i32,
    chunk_size: usize,
    operation_id: String,
    tx: mpsc::Sender<Result<Event, Infallible>>,
) {
    let send = |event: Event| {
        let tx = tx.clone();
        async move { tx.send(Ok(event)).await.is_ok() }
    };

    let query_id = match state
        .queue()
        .submit(
            &cypher,
            request.parameters.clone(),
            &graph_id,
            &user_id,
            rust_decimal::Decimal::ZERO,
            priority,
            ExecutionMode::External,
        )
        .await
    {
        Ok(id) => id,
        Err(err) => {
            let _ = send(sse_event("error", json!({ "error": err.to_string() }))).await;
            return;
        }
    };

    let initial = state.queue().status(&query_id);
    let mut last_position = initial.as_ref().and_then(|s| s.queue_position).unwrap_or(0);
    let queued_payload = json!({
        "query_id": query_id,
        "position": last_position,
        "estimated_wait_seconds": initial
            .as_ref()
            .and_then(|s| s.estimated_wait_seconds)
            .unwrap_or(10.0),
        "message": "Query has been queued",
    });
    state
        .bus()
        .emit(
            &operation_id,
            EventType::Progress,
            json!({ "status": "queued", "progress_percent": 0, "query_id": query_id }),
        )
        .await;
    if !send(sse_event("queued", queued_payload)).await {
        return;
    }

    loop {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let Some(status) = state.queue().status(&query_id) else {
            let _ = send(sse_event("error", json!({ "error": "query disappeared" }))).await;
            return;
        };

        match status.status {
            QueryStatus::Pending => {
                let position = status.queue_position.unwrap_or(0);
                if position != last_position {
                    last_position = position;
                    if !send(sse_event(
                        "queue_update",
                        json!({
                            "position": position,
                            "estimated_wait_seconds": position as f64 * 2.0,
                            "message": format!("Queue position: {position}"),
                        }),
                    ))
                    .await
                    {
                        // Client went away; free the queue slot.
                        state.queue().cancel(&query_id, &user_id);
                        return;
                    }
                }
            }
            QueryStatus::Running => {
                state
                    .bus()
                    .emit(
                        &operation_id,
                        EventType::Started,
                        json!({ "status": "running", "progress_percent": 10, "query_id": query_id }),
                    )
                    .await;
                if !send(sse_event(
                    "started",
                    json!({ "query_id": query_id, "message": "Query execution started" }),
                ))
                .await
                {
                    state.queue().mark_failed(&query_id, "client disconnected".into());
                    return;
                }

                stream_running_query(
                    &state,
                    &repository,
                    &cypher,
                    &request,
                    &graph_id,
                    &query_id,
                    &operation_id,
                    chunk_size,
                    send,
                )
                .await;
                return;
            }
            QueryStatus::Completed => {
                let _ = send(sse_event(
                    "complete",
                    json!({ "query_id": query_id, "result": status.result }),
                ))
                .await;
                return;
            }
            QueryStatus::Failed | QueryStatus::Cancelled => {
                let _ = send(sse_event(
                    "error",
                    json!({ "query_id": query_id, "error": status.error }),
                ))
                .await;
                return;
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn stream_running_query<F, Fut>(
    state: &AppState,
    repository: &Arc<dyn Repository>,
    cypher: &str,
    request: &CypherQueryRequest,
    graph_id: &str,
    query_id: &str,
    operation_id: &str,
    chunk_size: usize,
    send: F,
) where
    F: Fn(Event) -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let execution_timeout = state.config().queue.execution_timeout;
    let ctx = StreamContext {
        state: state.clone(),
        repository: Arc::clone(repository),
        cypher: cypher.to_string(),
        parameters: request.parameters.clone(),
        graph_id: graph_id.to_string(),
        chunk_size,
        execution_timeout,
    };

    let mut stream = match ctx.open_stream().await {
        Ok(stream) => stream,
        Err(err) => {
            let _ = send(sse_event(
                "error",
                json!({ "error": err.to_string(), "error_type": error_type(&err) }),
            ))
            .await;
            state.queue().mark_failed(query_id, err.to_string());
            state
                .bus()
                .emit(
                    operation_id,
                    EventType::Error,
                    json!({ "error": err.to_string() }),
                )
                .await;
            state.breakers().record_failure(graph_id, OPERATION_NAME);
            return;
        }
    };

    let mut schema_sent = false;
    let mut chunk_count = 0usize;
    let mut total_rows = 0usize;

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                let _ = send(sse_event(
                    "error",
                    json!({ "error": err.to_string(), "error_type": error_type(&err) }),
                ))
                .await;
                state.queue().mark_failed(query_id, err.to_string());
                state
                    .bus()
                    .emit(
                        operation_id,
                        EventType::Error,
                        json!({ "error": err.to_string() }),
                    )
                    .await;
                state.breakers().record_failure(graph_id, OPERATION_NAME);
                return;
            }
        };

        let QueryChunk { rows, columns } = chunk;

        if !schema_sent {
            if let Some(columns) = &columns {
                if !send(sse_event("schema", json!({ "columns": columns }))).await {
                    state.queue().mark_failed(query_id, "client disconnected".into());
                    return;
                }
            }
            schema_sent = true;
        }

        chunk_count += 1;
        let rows_in_chunk = rows.len();
        total_rows += rows_in_chunk;

        if !send(sse_event(
            "chunk",
            json!({
                "chunk_number": chunk_count,
                "rows": rows,
                "rows_in_chunk": rows_in_chunk,
                "total_rows": total_rows,
            }),
        ))
        .await
        {
            state.queue().mark_failed(query_id, "client disconnected".into());
            return;
        }

        if chunk_count % PROGRESS_EVERY_CHUNKS == 0 {
            let progress = json!({ "chunks": chunk_count, "rows": total_rows });
            if !send(sse_event("progress", progress.clone())).await {
                state.queue().mark_failed(query_id, "client disconnected".into());
                return;
            }
            state
                .bus()
                .emit(operation_id, EventType::Progress, progress)
                .await;
        }
    }

    state
        .queue()
        .mark_completed(query_id, json!({ "rows": total_rows }));
    state
        .bus()
        .emit(
            operation_id,
            EventType::Completed,
            json!({ "status": "completed", "progress_percent": 100, "total_rows": total_rows }),
        )
        .await;
    let _ = send(sse_event(
        "complete",
        json!({
            "query_id": query_id,
            "total_rows": total_rows,
            "message": "Query completed successfully",
        }),
    ))
    .await;
    state.breakers().record_success(graph_id, OPERATION_NAME);
}
