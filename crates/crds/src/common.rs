//! Types shared by the operator CRDs
//!
//! Chart references, status conditions and the schema helper used for
//! free-form value trees.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group of every CRD in this crate
pub const API_GROUP: &str = "sro.openshift.io";

/// Reference to a Helm chart
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HelmChart {
    /// Chart name
    pub name: String,

    /// Chart version
    #[serde(default)]
    pub version: String,

    /// Repository the chart is fetched from
    #[serde(default)]
    pub repository: HelmRepo,

    /// Chart tags
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Helm repository coordinates
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HelmRepo {
    /// Repository name
    #[serde(default)]
    pub name: String,

    /// Repository URL (`file:///`, `http(s)://` or `cm://<namespace>/<configmap>`)
    #[serde(default)]
    pub url: String,

    /// Skip TLS verification when fetching from the repository
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
}

/// Status of a condition
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum ConditionStatus {
    /// The condition holds
    True,
    /// The condition does not hold
    False,
    /// Not yet determined
    #[default]
    Unknown,
}

/// A status condition, shaped like `metav1.Condition`
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type (`Ready`, `Progressing`, `Errored`)
    #[serde(rename = "type")]
    pub type_: String,

    /// Condition status
    pub status: ConditionStatus,

    /// Machine readable reason
    #[serde(default)]
    pub reason: String,

    /// Human readable message
    #[serde(default)]
    pub message: String,

    /// Last time the status changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<chrono::DateTime<chrono::Utc>>,
}

impl Condition {
    /// Builds a condition stamped with the current time
    pub fn new(type_: &str, status: ConditionStatus, reason: &str, message: impl Into<String>) -> Self {
        Self {
            type_: type_.to_string(),
            status,
            reason: reason.to_string(),
            message: message.into(),
            last_transition_time: Some(chrono::Utc::now()),
        }
    }
}

/// Replaces the condition with the same type, keeping the transition time
/// when the status did not change.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        if existing.status == condition.status {
            condition.last_transition_time = existing.last_transition_time;
        }
        *existing = condition;
    } else {
        conditions.push(condition);
    }
}

/// Schema for an untyped value tree (`x-kubernetes-preserve-unknown-fields`)
pub fn preserve_unknown_fields(_: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    })
}
