//! Wire protocol for the Tinpot dispatch plane.
//!
//! This crate defines the messages exchanged between Coordinators and
//! Workers over the MQTT broker, plus the topic conventions that tie
//! them together. Coordinator and Worker never speak directly; every
//! payload defined here travels through the broker.
//!
//! # Message Flow
//!
//! ```text
//! ┌────────────┐                     ┌────────┐                    ┌────────────┐
//! │Coordinator │                     │ Broker │                    │   Worker   │
//! └────────────┘                     └────────┘                    └────────────┘
//!       │   subscribe tinpot/actions/+    │  ActionAnnouncement (retained) │
//!       │◄────────────────────────────────│◄───────────────────────────────│
//!       │                                 │                                │
//!       │  ExecutionRequest (trigger)     │                                │
//!       │────────────────────────────────►│───────────────────────────────►│
//!       │                                 │                                │
//!       │        LogEntry (log topic)     │                                │
//!       │◄────────────────────────────────│◄───────────────────────────────│
//!       │  ResultResponse (retained)      │                                │
//!       │◄────────────────────────────────│◄───────────────────────────────│
//! ```
//!
//! # Topic Map
//!
//! | Topic | Payload | Retained |
//! |-------|---------|----------|
//! | `tinpot/actions/{name}` | [`ActionAnnouncement`] (empty = withdrawal) | yes |
//! | `tinpot/actions/{name}/trigger` | [`ExecutionRequest`] | no |
//! | `tinpot/exec/{id}/result` | [`ResultResponse`] | yes |
//! | `tinpot/exec/{id}/log` | [`LogEntry`] | no |
//!
//! Topic construction and parsing live in [`topics`]; treat the strings
//! carried inside messages (`trigger_topic`, `result_topic`, `log_topic`)
//! as opaque — only the announcing side ever builds them.

mod action;
mod error;
mod execution;
pub mod topics;

pub use action::{ActionAnnouncement, ActionInfo, ParameterSpec};
pub use error::ErrorCode;
pub use execution::{
    CompletionData, ExecutionRequest, ExecutionStatus, LogEntry, LogLevel, ResultResponse,
    StreamEvent,
};
