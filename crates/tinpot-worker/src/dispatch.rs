//! Worker dispatch loop: announce, subscribe, execute.
//!
//! Runs on every broker connect (including reconnects): each
//! discovered action gets a retained announcement and a trigger-topic
//! subscription. Trigger payloads spawn a task per message so the
//! broker event loop never waits on an action; the action body itself
//! runs under `spawn_blocking` because the interpreter call is
//! synchronous.

use std::sync::Arc;
use tinpot_broker::{BrokerClient, QoS};
use tinpot_lua::{ActionManager, LogCallback};
use tinpot_protocol::{
    topics, ActionAnnouncement, ActionInfo, ExecutionRequest, LogEntry, ResultResponse,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Log entries are not retained: a late subscriber misses the log tail
/// but still sees the outcome through the retained result.
const RETAIN_LOGS: bool = false;

/// Announcements (and their withdrawals) are retained so the broker
/// serves the current catalog to any future subscriber.
const RETAIN_ANNOUNCEMENTS: bool = true;

/// Serialized announcement for one discovered action.
fn announcement_payload(info: &ActionInfo) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&ActionAnnouncement::for_action(info))
}

/// An empty retained payload withdraws the announcement.
fn withdrawal_payload() -> Vec<u8> {
    Vec::new()
}

/// Publishes one retained announcement and one trigger subscription
/// per discovered action.
pub async fn announce_and_subscribe(broker: BrokerClient, manager: ActionManager) {
    let mut actions: Vec<_> = manager.list_actions().into_iter().collect();
    actions.sort_by(|(a, _), (b, _)| a.cmp(b));

    for (name, info) in actions {
        let payload = match announcement_payload(&info) {
            Ok(payload) => payload,
            Err(e) => {
                error!(action = %name, error = %e, "announcement serialization failed");
                continue;
            }
        };

        if let Err(e) = broker
            .publish(
                &topics::announce(&name),
                QoS::AtLeastOnce,
                RETAIN_ANNOUNCEMENTS,
                payload,
            )
            .await
        {
            warn!(action = %name, error = %e, "announce failed");
            continue;
        }

        let trigger_broker = broker.clone();
        let trigger_manager = manager.clone();
        let action_name = name.clone();
        let subscription = broker
            .subscribe(
                &topics::trigger(&name),
                QoS::AtLeastOnce,
                Arc::new(move |_topic: &str, payload: &[u8]| {
                    let payload = payload.to_vec();
                    tokio::spawn(handle_trigger(
                        trigger_broker.clone(),
                        trigger_manager.clone(),
                        action_name.clone(),
                        payload,
                    ));
                }),
            )
            .await;

        match subscription {
            Ok(()) => info!(action = %name, "announced and listening"),
            Err(e) => warn!(action = %name, error = %e, "trigger subscription failed"),
        }
    }
}

/// Publishes empty retained payloads to withdraw every announced
/// action. Called on graceful shutdown.
pub async fn withdraw_actions(broker: &BrokerClient, manager: &ActionManager) {
    for name in manager.list_actions().into_keys() {
        if let Err(e) = broker
            .publish(
                &topics::announce(&name),
                QoS::AtLeastOnce,
                RETAIN_ANNOUNCEMENTS,
                withdrawal_payload(),
            )
            .await
        {
            warn!(action = %name, error = %e, "withdrawal failed");
        } else {
            info!(action = %name, "withdrawn");
        }
    }
}

/// Handles one trigger message end to end: decode, execute, publish
/// logs and exactly one retained result.
pub(crate) async fn handle_trigger(
    broker: BrokerClient,
    manager: ActionManager,
    action: String,
    payload: Vec<u8>,
) {
    let request: ExecutionRequest = match serde_json::from_slice(&payload) {
        Ok(request) => request,
        Err(e) => {
            warn!(action = %action, error = %e, "dropping undecodable trigger payload");
            return;
        }
    };
    debug!(action = %action, execution_id = %request.execution_id, "trigger received");

    let Some(trigger) = manager.get_action(&action) else {
        publish_result(
            &broker,
            &request.result_topic,
            &ResultResponse::failure(format!("Unknown action: {action}")),
        )
        .await;
        return;
    };

    // Log lines are forwarded from the blocking invocation to an async
    // pump that publishes them; the pump drains fully before the
    // result goes out, so the result is the last publish.
    let (log_tx, mut log_rx) = mpsc::unbounded_channel::<LogEntry>();
    let log_topic = request.log_topic.clone();
    let log_broker = broker.clone();
    let pump = tokio::spawn(async move {
        while let Some(entry) = log_rx.recv().await {
            let payload = match serde_json::to_vec(&entry) {
                Ok(payload) => payload,
                Err(_) => continue,
            };
            if let Err(e) = log_broker
                .publish(&log_topic, QoS::AtLeastOnce, RETAIN_LOGS, payload)
                .await
            {
                warn!(error = %e, "log publish failed");
            }
        }
    });

    let on_log: LogCallback = Arc::new(move |level, message: &str| {
        let _ = log_tx.send(LogEntry::now(level, message));
    });

    let (result_tx, result_rx) = oneshot::channel::<ResultResponse>();
    let parameters = request.parameters.clone();
    let invocation = tokio::task::spawn_blocking(move || {
        trigger.invoke(
            &parameters,
            move |result| {
                let _ = result_tx.send(result);
            },
            on_log,
        );
    });

    if let Err(e) = invocation.await {
        error!(action = %action, error = %e, "invocation task failed");
    }

    let result = result_rx
        .await
        .unwrap_or_else(|_| ResultResponse::failure("action terminated without a result"));

    // All log senders are gone once the invocation task is done; the
    // pump exits after the queue drains.
    let _ = pump.await;

    publish_result(&broker, &request.result_topic, &result).await;
    debug!(
        action = %action,
        execution_id = %request.execution_id,
        status = %result.status,
        "execution finished"
    );
}

async fn publish_result(broker: &BrokerClient, topic: &str, result: &ResultResponse) {
    let payload = match serde_json::to_vec(result) {
        Ok(payload) => payload,
        Err(e) => {
            error!(error = %e, "result serialization failed");
            return;
        }
    };
    if let Err(e) = broker.publish(topic, QoS::AtLeastOnce, true, payload).await {
        error!(topic = %topic, error = %e, "result publish failed");
    }
}
