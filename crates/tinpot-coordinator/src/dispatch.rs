//! Execution dispatch: HTTP request → broker rendezvous.
//!
//! Both modes share the same ordering discipline: subscribe to the
//! per-execution result (and log) topics and wait for the broker's
//! acknowledgment *before* publishing the trigger. Results are
//! retained so a lost race would only cost log lines; the ack wait
//! closes even that window for results and keeps logs intact.

use crate::catalog::{Catalog, CatalogEntry};
use crate::registry::{ExecutionRegistry, ExecutionState, CLEANUP_TTL};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tinpot_broker::{BrokerClient, BrokerError, QoS};
use tinpot_protocol::{
    topics, CompletionData, ErrorCode, ExecutionRequest, LogEntry, ResultResponse,
};
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

/// Dispatch error, mapped onto HTTP statuses by the API layer.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No catalog entry for the requested action.
    #[error("Action not found: {0}")]
    NotFound(String),

    /// Broker operation failed.
    #[error("broker operation failed: {0}")]
    Broker(#[from] BrokerError),

    /// Payload serialization failed.
    #[error("encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// Sync mode: no result within the deadline.
    #[error("timed out waiting for result")]
    Timeout,
}

impl ErrorCode for DispatchError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "DISPATCH_NOT_FOUND",
            Self::Broker(_) => "DISPATCH_BROKER_FAILED",
            Self::Encode(_) => "DISPATCH_ENCODE_FAILED",
            Self::Timeout => "DISPATCH_TIMEOUT",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Self::Broker(_) | Self::Timeout)
    }
}

/// Submits an async execution and returns its tracked state.
///
/// On return the trigger has been published and the registry holds the
/// execution; the caller responds to the client immediately and the
/// broker callbacks feed the state until completion. Completion
/// unsubscribes both per-execution topics and schedules registry
/// removal after [`CLEANUP_TTL`].
///
/// # Errors
///
/// An unknown `action` fails with [`DispatchError::NotFound`] before
/// any broker traffic is produced. Any failure before the trigger
/// publish succeeds tears down the subscriptions and the registry
/// entry.
pub async fn execute_async(
    broker: &BrokerClient,
    registry: &Arc<ExecutionRegistry>,
    catalog: &Catalog,
    action: &str,
    parameters: BTreeMap<String, JsonValue>,
) -> Result<Arc<ExecutionState>, DispatchError> {
    let entry = catalog
        .lookup(action)
        .ok_or_else(|| DispatchError::NotFound(action.to_string()))?;

    let execution_id = Uuid::new_v4();
    let result_topic = topics::result(&execution_id);
    let log_topic = topics::log(&execution_id);

    let state = registry.register(execution_id);

    let log_state = Arc::clone(&state);
    let log_handler = Arc::new(move |_topic: &str, payload: &[u8]| {
        match serde_json::from_slice::<LogEntry>(payload) {
            Ok(entry) => log_state.push_log(entry),
            Err(e) => debug!(execution_id = %execution_id, error = %e, "undecodable log entry dropped"),
        }
    });

    let result_state = Arc::clone(&state);
    let result_broker = broker.clone();
    let result_registry = Arc::clone(registry);
    let topics_to_drop = [result_topic.clone(), log_topic.clone()];
    let result_handler = Arc::new(move |_topic: &str, payload: &[u8]| {
        let response: ResultResponse = match serde_json::from_slice(payload) {
            Ok(response) => response,
            Err(e) => {
                debug!(execution_id = %execution_id, error = %e, "undecodable result dropped");
                return;
            }
        };
        if !result_state.complete(CompletionData::from(response)) {
            return;
        }
        // First completion: release the per-execution subscriptions
        // and schedule removal. Runs off the event-loop task because
        // unsubscribe waits for the broker ack.
        let broker = result_broker.clone();
        let registry = Arc::clone(&result_registry);
        let topics_to_drop = topics_to_drop.clone();
        tokio::spawn(async move {
            let filters: Vec<&str> = topics_to_drop.iter().map(String::as_str).collect();
            if let Err(e) = broker.unsubscribe(&filters).await {
                warn!(execution_id = %execution_id, error = %e, "unsubscribe failed");
            }
            tokio::time::sleep(CLEANUP_TTL).await;
            registry.remove(&execution_id);
        });
    });

    // Subscribe-before-publish, acknowledged, in both cases.
    let submit = async {
        broker
            .subscribe(&log_topic, QoS::AtLeastOnce, log_handler)
            .await?;
        broker
            .subscribe(&result_topic, QoS::AtLeastOnce, result_handler)
            .await?;
        publish_trigger(broker, &entry, execution_id, parameters).await
    };

    if let Err(e) = submit.await {
        let _ = broker
            .unsubscribe(&[result_topic.as_str(), log_topic.as_str()])
            .await;
        registry.remove(&execution_id);
        return Err(e);
    }

    Ok(state)
}

/// Submits an execution and blocks for its result up to `deadline`.
///
/// No log subscription is made in sync mode; log lines for the
/// execution are simply never observed by the coordinator. The
/// execution keeps running on the worker if the deadline expires.
///
/// # Errors
///
/// [`DispatchError::NotFound`] for unknown actions, with no broker
/// traffic; [`DispatchError::Timeout`] after `deadline`; broker and
/// encoding failures as in async mode.
pub async fn execute_sync(
    broker: &BrokerClient,
    catalog: &Catalog,
    action: &str,
    parameters: BTreeMap<String, JsonValue>,
    deadline: Duration,
) -> Result<(Uuid, ResultResponse), DispatchError> {
    let entry = catalog
        .lookup(action)
        .ok_or_else(|| DispatchError::NotFound(action.to_string()))?;

    let execution_id = Uuid::new_v4();
    let result_topic = topics::result(&execution_id);

    let (result_tx, result_rx) = oneshot::channel::<ResultResponse>();
    let slot = Arc::new(parking_lot::Mutex::new(Some(result_tx)));
    let result_handler = Arc::new(move |_topic: &str, payload: &[u8]| {
        let Ok(response) = serde_json::from_slice::<ResultResponse>(payload) else {
            return;
        };
        if let Some(tx) = slot.lock().take() {
            let _ = tx.send(response);
        }
    });

    let submit = async {
        broker
            .subscribe(&result_topic, QoS::AtLeastOnce, result_handler)
            .await?;
        publish_trigger(broker, &entry, execution_id, parameters).await
    };

    if let Err(e) = submit.await {
        let _ = broker.unsubscribe(&[result_topic.as_str()]).await;
        return Err(e);
    }

    let outcome = tokio::time::timeout(deadline, result_rx).await;
    let _ = broker.unsubscribe(&[result_topic.as_str()]).await;

    match outcome {
        Ok(Ok(response)) => Ok((execution_id, response)),
        Ok(Err(_)) | Err(_) => Err(DispatchError::Timeout),
    }
}

/// Builds and publishes the one-shot trigger request.
///
/// `_execution_id` is injected for parity with the reserved-parameter
/// convention; `ExecutionRequest::new` strips every `_`-prefixed name
/// before the request leaves the coordinator.
async fn publish_trigger(
    broker: &BrokerClient,
    entry: &CatalogEntry,
    execution_id: Uuid,
    mut parameters: BTreeMap<String, JsonValue>,
) -> Result<(), DispatchError> {
    parameters.insert(
        "_execution_id".to_string(),
        JsonValue::String(execution_id.to_string()),
    );
    let request = ExecutionRequest::new(execution_id, parameters);
    let payload = serde_json::to_vec(&request)?;
    broker
        .publish(&entry.trigger_topic, QoS::AtLeastOnce, false, payload)
        .await?;
    debug!(
        execution_id = %execution_id,
        action = %entry.info.name,
        "trigger published"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinpot_broker::ConnectHook;

    fn test_broker() -> BrokerClient {
        let on_connect: ConnectHook = Arc::new(|_| Box::pin(async {}));
        BrokerClient::connect("tcp://127.0.0.1:1", "tinpot-dispatch-test", on_connect)
            .expect("client construction")
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(
            DispatchError::NotFound("x".into()).code(),
            "DISPATCH_NOT_FOUND"
        );
        assert_eq!(DispatchError::Timeout.code(), "DISPATCH_TIMEOUT");
    }

    #[test]
    fn not_found_renders_the_documented_detail() {
        let err = DispatchError::NotFound("does_not_exist".into());
        assert_eq!(err.to_string(), "Action not found: does_not_exist");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn timeouts_and_broker_failures_are_recoverable() {
        assert!(DispatchError::Timeout.is_recoverable());
        assert!(DispatchError::Broker(BrokerError::ConnectionLost).is_recoverable());
    }

    #[tokio::test]
    async fn async_dispatch_of_unknown_action_short_circuits() {
        let registry = Arc::new(ExecutionRegistry::new());
        let catalog = Catalog::new();

        // The lookup fails before any subscribe or publish; against
        // this unreachable broker those would sit in ack waits.
        let err = execute_async(&test_broker(), &registry, &catalog, "ghost", BTreeMap::new())
            .await
            .err()
            .expect("unknown action");
        assert!(matches!(err, DispatchError::NotFound(ref name) if name == "ghost"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn sync_dispatch_of_unknown_action_short_circuits() {
        let catalog = Catalog::new();
        let err = execute_sync(
            &test_broker(),
            &catalog,
            "ghost",
            BTreeMap::new(),
            Duration::from_secs(1),
        )
        .await
        .expect_err("unknown action");
        assert!(matches!(err, DispatchError::NotFound(_)));
    }
}
