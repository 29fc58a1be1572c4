//! Handler-level tests over the assembled router.
//!
//! The broker client points at an unreachable address: the connection
//! state stays down, which is exactly what the health and
//! no-broker-traffic paths need. Everything else is driven through the
//! catalog and registry directly, the same way the subscription
//! callbacks do it in production.

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use std::collections::BTreeMap;
use std::sync::Arc;
use tinpot_broker::{BrokerClient, ConnectHook};
use tinpot_coordinator::api::{self, AppState};
use tinpot_coordinator::catalog::Catalog;
use tinpot_coordinator::config::CoordinatorConfig;
use tinpot_coordinator::registry::ExecutionRegistry;
use tinpot_protocol::{
    ActionAnnouncement, ActionInfo, CompletionData, LogEntry, LogLevel, ParameterSpec,
    ResultResponse,
};
use tower::ServiceExt;
use uuid::Uuid;

fn make_state() -> AppState {
    let on_connect: ConnectHook = Arc::new(|_| Box::pin(async {}));
    let broker = BrokerClient::connect("tcp://127.0.0.1:1", "tinpot-coordinator-test", on_connect)
        .expect("client construction");
    AppState {
        broker,
        catalog: Arc::new(Catalog::new()),
        registry: Arc::new(ExecutionRegistry::new()),
        config: Arc::new(CoordinatorConfig::default()),
    }
}

fn announce_clean_cache(catalog: &Catalog) {
    let mut parameters = BTreeMap::new();
    parameters.insert(
        "days".to_string(),
        ParameterSpec::new("int", serde_json::json!(7)),
    );
    let announcement = ActionAnnouncement::for_action(&ActionInfo {
        name: "clean_cache".into(),
        description: "Clean up temporary files".into(),
        group: "Maintenance".into(),
        parameters,
    });
    catalog.apply(
        "tinpot/actions/clean_cache",
        &serde_json::to_vec(&announcement).unwrap(),
    );
}

async fn get(state: AppState, uri: &str) -> (StatusCode, String) {
    send(state, "GET", uri, Body::empty()).await
}

async fn send(state: AppState, method: &str, uri: &str, body: Body) -> (StatusCode, String) {
    let response = api::router(state)
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(body)
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8_lossy(&bytes).to_string())
}

#[tokio::test]
async fn health_reports_unhealthy_without_broker() {
    let (status, body) = get(make_state(), "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body.contains("MQTT not connected"));
}

#[tokio::test]
async fn actions_listing_mirrors_the_catalog() {
    let state = make_state();

    let (_, body) = get(state.clone(), "/api/actions").await;
    assert_eq!(body, "{}");

    announce_clean_cache(&state.catalog);
    let (status, body) = get(state, "/api/actions").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("\"clean_cache\""));
    assert!(body.contains("\"group\":\"Maintenance\""));
}

#[tokio::test]
async fn withdrawn_action_disappears_from_listing() {
    let state = make_state();
    announce_clean_cache(&state.catalog);
    state.catalog.apply("tinpot/actions/clean_cache", b"");

    let (_, body) = get(state, "/api/actions").await;
    assert_eq!(body, "{}");
}

#[tokio::test]
async fn executing_unknown_action_is_404_with_detail() {
    let (status, body) = send(
        make_state(),
        "POST",
        "/api/actions/does_not_exist/execute",
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.contains("Action not found: does_not_exist"));
}

#[tokio::test]
async fn sync_executing_unknown_action_is_404() {
    let (status, _) = send(
        make_state(),
        "POST",
        "/api/actions/ghost/sync_execute",
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_execute_body_is_400() {
    let state = make_state();
    announce_clean_cache(&state.catalog);
    let (status, body) = send(
        state,
        "POST",
        "/api/actions/clean_cache/execute",
        Body::from("{not json"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("Invalid request body"));
}

#[tokio::test]
async fn streaming_unknown_execution_is_404() {
    let uri = format!("/api/executions/{}/stream", Uuid::new_v4());
    let (status, body) = get(make_state(), &uri).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.contains("Execution not found"));
}

#[tokio::test]
async fn completed_execution_streams_connected_logs_then_completion() {
    let state = make_state();
    let id = Uuid::new_v4();
    let exec = state.registry.register(id);
    exec.push_log(LogEntry::now(LogLevel::Info, "step one"));
    exec.push_log(LogEntry::now(LogLevel::Info, "step two"));
    exec.complete(CompletionData::from(ResultResponse::success(
        serde_json::json!({"files_deleted": 42}),
    )));

    let uri = format!("/api/executions/{id}/stream");
    let (status, body) = get(state, &uri).await;
    assert_eq!(status, StatusCode::OK);

    let connected = body.find("\"type\":\"connected\"").expect("connected event");
    let first = body.find("step one").expect("first log");
    let second = body.find("step two").expect("second log");
    let complete = body.find("\"type\":\"complete\"").expect("complete event");
    assert!(connected < first && first < second && second < complete);
    assert!(body.contains("\"successful\":true"));
    assert!(body.contains(&id.to_string()));
    // SSE framing: every event is a data: line with a blank separator.
    assert!(body.starts_with("data: "));
    assert!(body.contains("\n\n"));
}

#[tokio::test]
async fn second_stream_subscriber_gets_connected_then_eof() {
    let state = make_state();
    let id = Uuid::new_v4();
    let exec = state.registry.register(id);
    exec.complete(CompletionData::from(ResultResponse::success(
        serde_json::Value::Null,
    )));

    let uri = format!("/api/executions/{id}/stream");
    let (_, first_body) = get(state.clone(), &uri).await;
    assert!(first_body.contains("\"type\":\"complete\""));

    // Receiver already consumed: connected, then immediate end.
    let (status, second_body) = get(state, &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert!(second_body.contains("\"type\":\"connected\""));
    assert!(!second_body.contains("\"type\":\"complete\""));
}

#[tokio::test]
async fn status_tracks_registry_state() {
    let state = make_state();

    let unknown = format!("/api/executions/{}/status", Uuid::new_v4());
    let (status, body) = get(state.clone(), &unknown).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("\"state\":\"UNKNOWN\""));

    let id = Uuid::new_v4();
    let exec = state.registry.register(id);
    let uri = format!("/api/executions/{id}/status");
    let (_, body) = get(state.clone(), &uri).await;
    assert!(body.contains("\"state\":\"PENDING\""));
    assert!(body.contains("\"ready\":false"));

    exec.complete(CompletionData::from(ResultResponse::failure("boom")));
    let (_, body) = get(state, &uri).await;
    assert!(body.contains("\"state\":\"COMPLETE\""));
    assert!(body.contains("\"ready\":true"));
}

#[tokio::test]
async fn cancel_is_not_implemented() {
    let uri = format!("/api/executions/{}/cancel", Uuid::new_v4());
    let (status, body) = send(make_state(), "POST", &uri, Body::empty()).await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    assert!(body.contains("Cancellation not supported"));
}
