//! Broker client adapter for Tinpot.
//!
//! Thin wrapper over [`rumqttc`] shared by the coordinator and the
//! worker. It adds the three things the dispatch protocol needs on top
//! of the raw client:
//!
//! - **Acknowledged operations** — [`BrokerClient::publish`] (QoS 1) and
//!   [`BrokerClient::subscribe`] resolve only once the broker has acked,
//!   so callers can order a trigger publish strictly after its result
//!   subscription.
//! - **Per-filter handler routing** — subscriptions carry a callback;
//!   incoming publishes are matched against registered filters
//!   (including `+`/`#` wildcards) and dispatched on the event-loop task.
//! - **Auto-reconnect** — the driver task keeps polling through
//!   connection errors with a fixed backoff and invokes the connect hook
//!   on every `CONNACK`, which is where announce/resubscribe logic lives.
//!
//! Handlers run on the event-loop task and must not block; enqueue into
//! a channel or spawn a task for anything heavier than a decode.

mod client;
mod error;
mod router;

pub use client::{BrokerClient, ConnectHook};
pub use error::BrokerError;
pub use router::{filter_matches, MessageHandler, Router};

// Re-exported so dependents do not need a direct rumqttc dependency.
pub use rumqttc::QoS;
