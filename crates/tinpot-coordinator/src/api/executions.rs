//! Execution streaming and status endpoints.

use super::{AppState, ErrorBody};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use tinpot_protocol::StreamEvent;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use uuid::Uuid;

/// Response body for the status endpoint.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub execution_id: Uuid,
    pub state: &'static str,
    pub ready: bool,
}

type SseItem = Result<Event, Infallible>;

/// GET /api/executions/{id}/stream — drain the execution's event
/// queue as Server-Sent Events.
///
/// Emits the mandatory `connected` event first, then buffered log
/// events in arrival order, then the completion event, then ends the
/// response. A subscriber arriving after the stream was already
/// consumed (or after completion) gets `connected` followed by
/// end-of-stream; the terminal event is not replayed. Client
/// disconnects just drop the stream — the execution itself keeps
/// running.
pub async fn stream_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Response {
    let Some(exec) = state.registry.get(&id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(ErrorBody::new("Execution not found")),
        )
            .into_response();
    };

    let connected = sse_event(&StreamEvent::Connected { execution_id: id });
    let head = tokio_stream::once(Ok::<Event, Infallible>(connected));

    let events: Pin<Box<dyn Stream<Item = SseItem> + Send>> = match exec.take_receiver() {
        Some(receiver) => {
            let logs = ReceiverStream::new(receiver).map(|event| Ok(sse_event(&event)));
            // Polled only once the queue has closed, i.e. after the
            // completion was recorded.
            let tail_exec = Arc::clone(&exec);
            let tail = tokio_stream::once(()).filter_map(move |()| {
                tail_exec
                    .completion()
                    .map(|data| Ok(sse_event(&StreamEvent::Complete { data })))
            });
            Box::pin(head.chain(logs).chain(tail))
        }
        None => Box::pin(head),
    };

    let mut headers = HeaderMap::new();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    (headers, Sse::new(events)).into_response()
}

/// GET /api/executions/{id}/status — registry-backed execution state.
pub async fn execution_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Json<StatusResponse> {
    let (exec_state, ready) = match state.registry.get(&id) {
        None => ("UNKNOWN", false),
        Some(exec) if exec.is_completed() => ("COMPLETE", true),
        Some(_) => ("PENDING", false),
    };
    Json(StatusResponse {
        execution_id: id,
        state: exec_state,
        ready,
    })
}

/// POST /api/executions/{id}/cancel — reserved, not supported.
pub async fn cancel_execution(Path(_id): Path<Uuid>) -> Response {
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(ErrorBody::new("Cancellation not supported")),
    )
        .into_response()
}

fn sse_event(event: &StreamEvent) -> Event {
    Event::default().data(serde_json::to_string(event).unwrap_or_default())
}
