//! Per-execution messages: requests, logs, results, stream events.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use uuid::Uuid;

/// One-shot request published on an action's trigger topic.
///
/// Exactly one worker receives and handles each request. The result
/// and log topics are the per-execution rendezvous: only the
/// coordinator that built this request and the worker that picked it
/// up ever use them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub execution_id: Uuid,
    #[serde(default)]
    pub parameters: BTreeMap<String, JsonValue>,
    pub result_topic: String,
    pub log_topic: String,
}

impl ExecutionRequest {
    /// Builds a request for `execution_id` using the standard
    /// per-execution topic conventions.
    ///
    /// Parameter names starting with `_` are host-internal and are
    /// stripped before the request goes on the wire.
    #[must_use]
    pub fn new(execution_id: Uuid, parameters: BTreeMap<String, JsonValue>) -> Self {
        Self {
            execution_id,
            parameters: parameters
                .into_iter()
                .filter(|(name, _)| !name.starts_with('_'))
                .collect(),
            result_topic: crate::topics::result(&execution_id),
            log_topic: crate::topics::log(&execution_id),
        }
    }
}

/// Log severity carried on the log topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    #[serde(rename = "INFO")]
    Info,
    #[serde(rename = "WARN")]
    Warn,
    #[serde(rename = "ERROR")]
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warn => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// One log line emitted during an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC 3339 wall-clock timestamp, stamped by the worker.
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    /// Creates an entry stamped with the current time.
    #[must_use]
    pub fn now(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            level,
            message: message.into(),
        }
    }
}

/// Terminal outcome of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILURE")]
    Failure,
}

impl ExecutionStatus {
    /// Returns true for [`ExecutionStatus::Success`].
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "SUCCESS"),
            Self::Failure => write!(f, "FAILURE"),
        }
    }
}

/// Result published (retained) on the per-execution result topic.
///
/// At most one is ever produced per execution. Retention lets a
/// coordinator that subscribed late still observe the outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultResponse {
    pub status: ExecutionStatus,
    #[serde(default)]
    pub result: JsonValue,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl ResultResponse {
    /// Creates a success result.
    #[must_use]
    pub fn success(result: JsonValue) -> Self {
        Self {
            status: ExecutionStatus::Success,
            result,
            error: String::new(),
        }
    }

    /// Creates a failure result with an error message.
    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Failure,
            result: JsonValue::Null,
            error: error.into(),
        }
    }
}

/// Payload of the terminal stream event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionData {
    pub state: ExecutionStatus,
    pub successful: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<ResultResponse> for CompletionData {
    fn from(res: ResultResponse) -> Self {
        let successful = res.status.is_success();
        Self {
            state: res.status,
            successful,
            result: successful.then_some(res.result),
            error: (!successful).then_some(res.error),
        }
    }
}

/// Event delivered to SSE subscribers of an execution.
///
/// Serializes to the wire shape the UI consumes:
///
/// ```json
/// {"type":"connected","execution_id":"..."}
/// {"type":"log","data":{"timestamp":"...","level":"INFO","message":"..."}}
/// {"type":"complete","data":{"state":"SUCCESS","successful":true,"result":{}}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Connected { execution_id: Uuid },
    Log { data: LogEntry },
    Complete { data: CompletionData },
}
