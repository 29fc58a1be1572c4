//! Action metadata: catalog entries and retained announcements.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Descriptor for a single action parameter.
///
/// `type` is the interpreter-side type name (`"int"`, `"float"`,
/// `"str"`, `"bool"`, ...) as declared by the action author; the
/// coordinator passes it through for form generation and never
/// validates against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Declared type name.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Default value, or `null` when the parameter is required.
    #[serde(default)]
    pub default: JsonValue,
}

impl ParameterSpec {
    /// Creates a spec with a default value.
    #[must_use]
    pub fn new(type_name: impl Into<String>, default: JsonValue) -> Self {
        Self {
            type_name: type_name.into(),
            default,
        }
    }

    /// Creates a spec for a required parameter (no default).
    #[must_use]
    pub fn required(type_name: impl Into<String>) -> Self {
        Self::new(type_name, JsonValue::Null)
    }
}

/// Catalog entry for a callable action.
///
/// This is what the coordinator serves from `GET /api/actions`. The
/// `name` is globally unique across all workers; when two workers
/// announce the same name, the last retained announcement wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionInfo {
    /// Globally unique action name, stable across restarts.
    pub name: String,
    /// Help text for the action.
    #[serde(default)]
    pub description: String,
    /// Category used to group actions in listings.
    #[serde(default)]
    pub group: String,
    /// Parameter descriptors keyed by parameter name.
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterSpec>,
}

/// Retained announcement published at `tinpot/actions/{name}`.
///
/// The action name is carried by the topic, not the payload. An empty
/// payload on the same topic withdraws the action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionAnnouncement {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterSpec>,
    /// Topic on which this action accepts [`ExecutionRequest`]s.
    ///
    /// By convention `tinpot/actions/{name}/trigger`, but consumers
    /// treat it as opaque.
    ///
    /// [`ExecutionRequest`]: crate::ExecutionRequest
    pub trigger_topic: String,
}

impl ActionAnnouncement {
    /// Builds the announcement for a catalog entry using the standard
    /// trigger-topic convention.
    #[must_use]
    pub fn for_action(info: &ActionInfo) -> Self {
        Self {
            description: info.description.clone(),
            group: info.group.clone(),
            parameters: info.parameters.clone(),
            trigger_topic: crate::topics::trigger(&info.name),
        }
    }

    /// Reconstructs the catalog entry for `name` from this announcement.
    #[must_use]
    pub fn into_info(self, name: impl Into<String>) -> ActionInfo {
        ActionInfo {
            name: name.into(),
            description: self.description,
            group: self.group,
            parameters: self.parameters,
        }
    }
}
