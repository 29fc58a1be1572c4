//! Live action catalog mirrored from retained announcements.
//!
//! One wildcard subscription (`tinpot/actions/+`) feeds
//! [`Catalog::apply`]: a non-empty payload upserts, an empty payload
//! withdraws. The broker's retained-message semantics make it the
//! source of truth — on (re)connect the full catalog replays into the
//! subscription, so applying announcements is idempotent by
//! construction.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tinpot_broker::{BrokerClient, BrokerError, QoS};
use tinpot_protocol::{topics, ActionAnnouncement, ActionInfo};
use tracing::{debug, info, warn};

/// A catalog entry: listing metadata plus the topic to trigger it on.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub info: ActionInfo,
    pub trigger_topic: String,
}

/// Concurrency-safe action catalog.
///
/// Single writer (the announcement subscription callback), many
/// readers (HTTP handlers).
#[derive(Default)]
pub struct Catalog {
    actions: RwLock<HashMap<String, CatalogEntry>>,
}

impl Catalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one announcement-topic message.
    ///
    /// Malformed topics and undecodable payloads are logged and
    /// dropped, never surfaced.
    pub fn apply(&self, topic: &str, payload: &[u8]) {
        let Some(name) = topics::parse_announce(topic) else {
            debug!(topic = %topic, "ignoring message on malformed announcement topic");
            return;
        };

        if payload.is_empty() {
            if self.actions.write().remove(name).is_some() {
                info!(action = %name, "action withdrawn");
            }
            return;
        }

        let announcement: ActionAnnouncement = match serde_json::from_slice(payload) {
            Ok(announcement) => announcement,
            Err(e) => {
                warn!(action = %name, error = %e, "undecodable announcement dropped");
                return;
            }
        };

        let entry = CatalogEntry {
            trigger_topic: announcement.trigger_topic.clone(),
            info: announcement.into_info(name),
        };
        let replaced = self.actions.write().insert(name.to_string(), entry);
        if replaced.is_none() {
            info!(action = %name, "action discovered");
        }
    }

    /// Returns listing metadata for every known action.
    #[must_use]
    pub fn list(&self) -> HashMap<String, ActionInfo> {
        self.actions
            .read()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.info.clone()))
            .collect()
    }

    /// Returns the entry for `name`, or `None` if unknown.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<CatalogEntry> {
        self.actions.read().get(name).cloned()
    }

    /// Returns the number of known actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.read().len()
    }

    /// Returns true when no actions are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.read().is_empty()
    }
}

/// Subscribes the catalog to the announcement wildcard.
///
/// Runs on every connect so retained announcements replay after a
/// reconnect.
///
/// # Errors
///
/// Returns an error if the subscription cannot be established.
pub async fn subscribe(broker: &BrokerClient, catalog: Arc<Catalog>) -> Result<(), BrokerError> {
    broker
        .subscribe(
            topics::ANNOUNCE_FILTER,
            QoS::AtLeastOnce,
            Arc::new(move |topic, payload| catalog.apply(topic, payload)),
        )
        .await
}
