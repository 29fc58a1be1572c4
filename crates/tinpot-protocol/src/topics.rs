//! Topic conventions for the broker rendezvous.
//!
//! Announcements and triggers live under `tinpot/actions/`, per-execution
//! topics under `tinpot/exec/`. The catalog subscription uses the
//! single-level wildcard [`ANNOUNCE_FILTER`], which deliberately does not
//! match trigger topics (they sit one level deeper).

use uuid::Uuid;

/// Wildcard filter matching every action announcement topic.
pub const ANNOUNCE_FILTER: &str = "tinpot/actions/+";

/// Returns the retained announcement topic for an action.
#[must_use]
pub fn announce(name: &str) -> String {
    format!("tinpot/actions/{name}")
}

/// Returns the trigger topic on which an action accepts requests.
#[must_use]
pub fn trigger(name: &str) -> String {
    format!("tinpot/actions/{name}/trigger")
}

/// Returns the retained result topic for an execution.
#[must_use]
pub fn result(execution_id: &Uuid) -> String {
    format!("tinpot/exec/{execution_id}/result")
}

/// Returns the log topic for an execution.
#[must_use]
pub fn log(execution_id: &Uuid) -> String {
    format!("tinpot/exec/{execution_id}/log")
}

/// Extracts the action name from an announcement topic.
///
/// Returns `None` for anything that is not exactly
/// `tinpot/actions/{name}` — in particular for trigger topics.
#[must_use]
pub fn parse_announce(topic: &str) -> Option<&str> {
    let name = topic.strip_prefix("tinpot/actions/")?;
    if name.is_empty() || name.contains('/') {
        return None;
    }
    Some(name)
}
