use std::convert::Infallible;
use std::time::Duration;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures::StreamExt;
use futures::stream::Stream;
use serde::Serialize;

use super::AppState;
use super::agent::EventStream;
use super::dispatcher::{DispatchOutcome, error_code};
use crate::error::A2aError;
use crate::jsonrpc::{JsonRpcError, JsonRpcResponse};
use crate::lifecycle::TaskState;
use crate::types::{A2aEvent, AgentCard, TaskStatus};

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

pub async fn jsonrpc_handler(State(state): State<AppState>, body: Bytes) -> Response {
    match state.dispatcher.dispatch(&body).await {
        DispatchOutcome::Response(resp) => Json(resp).into_response(),
        DispatchOutcome::Stream { task_id, events } => sse_response(task_id, events).into_response(),
    }
}

pub async fn subscribe_handler(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Response {
    match state.dispatcher.subscribe(&task_id).await {
        Ok(events) => sse_response(task_id, events).into_response(),
        Err(e) => Json(JsonRpcResponse::<serde_json::Value>::failure(
            serde_json::Value::Null,
            JsonRpcError::new(error_code(&e), e.to_string()),
        ))
        .into_response(),
    }
}

pub async fn agent_card_handler(State(state): State<AppState>) -> Json<AgentCard> {
    Json(state.card.as_ref().clone())
}

fn sse_response(
    task_id: String,
    events: EventStream,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::debug!(task_id = %task_id, "subscription opened");
    Sse::new(sse_frames(task_id, events)).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}

/// One frame per event; stops after the terminal event, and turns a source
/// error or an unserializable event into a final FAILED status frame.
pub(super) fn sse_frames(
    task_id: String,
    events: EventStream,
) -> impl Stream<Item = Result<Event, Infallible>> {
    events.scan(false, move |done, item| {
        if *done {
            return futures::future::ready(None);
        }
        let event = match item {
            Ok(event) => {
                *done = event.is_terminal();
                event
            }
            Err(e) => {
                *done = true;
                tracing::warn!(task_id = %task_id, "subscription source failed: {e}");
                failed_event(&task_id, &e)
            }
        };
        let frame = encode(event.sse_name(), &event).unwrap_or_else(|e| {
            *done = true;
            tracing::error!(
                task_id = %task_id,
                kind = event.sse_name(),
                "event not serializable: {e}"
            );
            failed_frame(&task_id, &A2aError::Json(e))
        });
        futures::future::ready(Some(Ok(frame)))
    })
}

fn failed_event(task_id: &str, err: &A2aError) -> A2aEvent {
    A2aEvent::status_update(
        task_id,
        TaskStatus {
            state: TaskState::Failed,
            timestamp: Utc::now(),
            message: Some(err.to_string()),
        },
    )
}

fn encode(name: &str, payload: &impl Serialize) -> Result<Event, serde_json::Error> {
    let data = serde_json::to_string(payload)?;
    Ok(Event::default().event(name).data(data))
}

/// FAILED status frame assembled without going through the event's
/// `Serialize` impl.
fn failed_frame(task_id: &str, err: &A2aError) -> Event {
    let data = serde_json::json!({
        "kind": "status-update",
        "taskId": task_id,
        "status": {
            "state": TaskState::Failed.to_string(),
            "timestamp": Utc::now().to_rfc3339(),
            "message": err.to_string(),
        },
        "final": true,
    });
    Event::default().event("status").data(data.to_string())
}
