//! Action listing and execution endpoints.

use super::{AppState, ErrorBody};
use crate::dispatch::{self, DispatchError};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use tinpot_protocol::ExecutionStatus;
use tracing::error;
use uuid::Uuid;

/// Optional execute request body.
#[derive(Debug, Default, Deserialize)]
pub struct ExecuteBody {
    #[serde(default)]
    pub parameters: BTreeMap<String, JsonValue>,
}

/// Response for an async submission.
#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub execution_id: Uuid,
    pub action_name: String,
    pub status: &'static str,
    pub stream_url: String,
}

/// Response for a sync execution.
#[derive(Debug, Serialize)]
pub struct SyncExecuteResponse {
    pub execution_id: Uuid,
    pub action_name: String,
    pub status: ExecutionStatus,
    pub result: JsonValue,
}

/// GET /api/actions — the live catalog.
pub async fn list_actions(State(state): State<AppState>) -> Response {
    Json(state.catalog.list()).into_response()
}

/// POST /api/actions/{name}/execute — submit and return immediately.
pub async fn execute_action(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Response {
    let parameters = match parse_body(&body) {
        Ok(parameters) => parameters,
        Err(response) => return response,
    };

    match dispatch::execute_async(&state.broker, &state.registry, &state.catalog, &name, parameters)
        .await
    {
        Ok(exec) => {
            let execution_id = exec.execution_id();
            Json(ExecuteResponse {
                execution_id,
                action_name: name,
                status: "submitted",
                stream_url: format!(
                    "{}/api/executions/{execution_id}/stream",
                    state.config.root_path
                ),
            })
            .into_response()
        }
        Err(e) => dispatch_failure(&name, e),
    }
}

/// POST /api/actions/{name}/sync_execute — submit and block for the
/// result, up to the configured deadline.
pub async fn sync_execute_action(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Response {
    let parameters = match parse_body(&body) {
        Ok(parameters) => parameters,
        Err(response) => return response,
    };

    let deadline = state.config.sync_timeout();
    match dispatch::execute_sync(&state.broker, &state.catalog, &name, parameters, deadline).await {
        Ok((execution_id, result)) => Json(SyncExecuteResponse {
            execution_id,
            action_name: name,
            status: result.status,
            result: result.result,
        })
        .into_response(),
        Err(e) => dispatch_failure(&name, e),
    }
}

/// Decodes the optional JSON body; an empty body means no parameters.
fn parse_body(body: &Bytes) -> Result<BTreeMap<String, JsonValue>, Response> {
    if body.is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_json::from_slice::<ExecuteBody>(body)
        .map(|b| b.parameters)
        .map_err(|_| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody::new("Invalid request body")),
            )
                .into_response()
        })
}

fn not_found(name: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody::new(format!("Action not found: {name}"))),
    )
        .into_response()
}

fn dispatch_failure(name: &str, error: DispatchError) -> Response {
    match error {
        DispatchError::NotFound(name) => not_found(&name),
        DispatchError::Timeout => (
            StatusCode::GATEWAY_TIMEOUT,
            Json(ErrorBody::new("Execution timed out")),
        )
            .into_response(),
        DispatchError::Broker(e) => {
            error!(action = %name, error = %e, "dispatch failed at the broker");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody::new(format!("Failed to dispatch: {e}"))),
            )
                .into_response()
        }
        DispatchError::Encode(e) => {
            error!(action = %name, error = %e, "request encoding failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody::new("Failed to encode request")),
            )
                .into_response()
        }
    }
}
