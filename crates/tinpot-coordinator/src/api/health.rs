//! Health endpoint.

use super::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Health response body.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<&'static str>,
}

/// GET /health — 200 while the broker connection is up, 503 otherwise.
pub async fn health(State(state): State<AppState>) -> Response {
    if state.broker.is_connected() {
        Json(HealthResponse {
            status: "healthy",
            detail: None,
        })
        .into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unhealthy",
                detail: Some("MQTT not connected"),
            }),
        )
            .into_response()
    }
}
