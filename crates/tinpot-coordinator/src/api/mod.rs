//! HTTP surface.
//!
//! | Method + Path | Handler |
//! |---|---|
//! | GET `/api/actions` | [`actions::list_actions`] |
//! | POST `/api/actions/{name}/execute` | [`actions::execute_action`] |
//! | POST `/api/actions/{name}/sync_execute` | [`actions::sync_execute_action`] |
//! | GET `/api/executions/{id}/stream` | [`executions::stream_execution`] |
//! | GET `/api/executions/{id}/status` | [`executions::execution_status`] |
//! | POST `/api/executions/{id}/cancel` | [`executions::cancel_execution`] |
//! | GET `/health` | [`health::health`] |

pub mod actions;
pub mod executions;
pub mod health;

use crate::catalog::Catalog;
use crate::config::CoordinatorConfig;
use crate::registry::ExecutionRegistry;
use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use std::sync::Arc;
use tinpot_broker::BrokerClient;
use tower_http::cors::{Any, CorsLayer};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub broker: BrokerClient,
    pub catalog: Arc<Catalog>,
    pub registry: Arc<ExecutionRegistry>,
    pub config: Arc<CoordinatorConfig>,
}

/// Error body shape shared by every non-2xx response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

impl ErrorBody {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

/// Builds the coordinator router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/api/actions", get(actions::list_actions))
        .route("/api/actions/{name}/execute", post(actions::execute_action))
        .route(
            "/api/actions/{name}/sync_execute",
            post(actions::sync_execute_action),
        )
        .route(
            "/api/executions/{id}/stream",
            get(executions::stream_execution),
        )
        .route(
            "/api/executions/{id}/status",
            get(executions::execution_status),
        )
        .route(
            "/api/executions/{id}/cancel",
            post(executions::cancel_execution),
        )
        .route("/health", get(health::health))
        .layer(cors)
        .with_state(state)
}
