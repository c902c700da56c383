//! The unified operation monitoring endpoint.
//!
//! `GET /v1/operations/{operation_id}/stream` replays an operation's
//! persisted events and then delivers live ones, under the per-user
//! connection caps.

use crate::auth::AuthenticatedUser;
use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use graphgate_sse::OperationEvent;
use serde_json::json;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

fn operation_event(event: &OperationEvent) -> Event {
    let payload = json!({
        "operation_id": event.operation_id,
        "timestamp": event.timestamp.to_rfc3339(),
        "data": event.payload,
    });
    match Event::default()
        .event(event.event_type.as_str())
        .json_data(&payload)
    {
        Ok(event) => event,
        Err(_) => Event::default().event(event.event_type.as_str()).data("{}"),
    }
}

pub async fn stream_operation(
    State(state): State<AppState>,
    Path(operation_id): Path<String>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Response, ApiError> {
    if state.bus().operation(&operation_id).await.is_none() {
        return Err(ApiError::NotFound(format!(
            "operation {operation_id} not found"
        )));
    }

    let subscription = state.bus().subscribe(&operation_id, &user.id).await?;
    let keepalive = state.config().sse.keepalive;

    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(32);
    tokio::spawn(async move {
        // The guard holds the user's connection slot until this task ends.
        let _guard = subscription.guard;
        let mut live = subscription.live;

        let is_terminal = |event_type: graphgate_sse::EventType| {
            matches!(
                event_type,
                graphgate_sse::EventType::Completed
                    | graphgate_sse::EventType::Error
                    | graphgate_sse::EventType::Cancelled
            )
        };

        let mut finished = false;
        for event in &subscription.replay {
            if tx.send(Ok(operation_event(event))).await.is_err() {
                return;
            }
            finished |= is_terminal(event.event_type);
        }
        if finished {
            return;
        }

        while let Ok(event) = live.recv().await {
            let terminal = is_terminal(event.event_type);
            if tx.send(Ok(operation_event(&event))).await.is_err() {
                return;
            }
            if terminal {
                return;
            }
        }
    });

    Ok(Sse::new(ReceiverStream::new(rx))
        .keep_alive(KeepAlive::new().interval(keepalive))
        .into_response())
}
