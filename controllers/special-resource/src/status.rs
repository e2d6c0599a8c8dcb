//! Status reporting
//!
//! SpecialResource status (`state` plus conditions) and the companion
//! ClusterOperator. Writes happen only when something changed so a
//! steady-state reconcile stays free of mutations.

use crate::error::ControllerError;
use cluster_client::object::{gvk_from, to_dynamic};
use cluster_client::ClusterClientTrait;
use crds::{set_condition, Condition, ConditionStatus, SpecialResource};
use kube::api::{DynamicObject, ObjectMeta};
use kube::ResourceExt;
use serde_json::json;
use tracing::{debug, warn};

/// Condition types carried by a SpecialResource
pub const CONDITION_READY: &str = "Ready";
/// Reconcile in flight
pub const CONDITION_PROGRESSING: &str = "Progressing";
/// Reconcile failed with an error that needs attention
pub const CONDITION_ERRORED: &str = "Errored";

/// Name of the ClusterOperator reporting on the operator
pub const CLUSTER_OPERATOR_NAME: &str = "special-resource-operator";

async fn write_status(client: &dyn ClusterClientTrait, sr: &mut SpecialResource) -> Result<(), ControllerError> {
    let name = sr.name_any();
    let object = to_dynamic(&*sr).map_err(|e| ControllerError::cluster("SpecialResource", &name, e))?;
    let stored = client
        .update_status(&object)
        .await
        .map_err(|e| ControllerError::cluster("SpecialResource", &name, e))?;
    sr.metadata.resource_version = stored.metadata.resource_version;
    Ok(())
}

/// Records the stage that is about to begin.
///
/// `status.state` only moves forward through the stage order; replaying
/// earlier stages of an already reconciled SR leaves it untouched.
pub async fn record_state(
    client: &dyn ClusterClientTrait,
    sr: &mut SpecialResource,
    state: &str,
) -> Result<(), ControllerError> {
    let current = sr.state();
    if !current.is_empty() && current >= state {
        return Ok(());
    }
    debug!("SpecialResource {} entering state {}", sr.name_any(), state);
    sr.status.get_or_insert_with(Default::default).state = state.to_string();
    write_status(client, sr).await
}

/// Records the stage a poll timed out in, even when `status.state` had
/// already moved past it.
pub async fn record_stalled_state(
    client: &dyn ClusterClientTrait,
    sr: &mut SpecialResource,
    state: &str,
) -> Result<(), ControllerError> {
    if sr.state() == state {
        return Ok(());
    }
    warn!("SpecialResource {} stalled in state {}", sr.name_any(), state);
    sr.status.get_or_insert_with(Default::default).state = state.to_string();
    write_status(client, sr).await
}

fn condition_set(outcome: &Result<(), ControllerError>) -> Option<[Condition; 3]> {
    let cond = |type_: &str, status: ConditionStatus, reason: &str, message: &str| {
        Condition::new(type_, status, reason, message)
    };
    match outcome {
        Ok(()) => Some([
            cond(CONDITION_READY, ConditionStatus::True, "Reconciled", "all states are ready"),
            cond(CONDITION_PROGRESSING, ConditionStatus::False, "Reconciled", ""),
            cond(CONDITION_ERRORED, ConditionStatus::False, "Reconciled", ""),
        ]),
        Err(e) if e.is_cancelled() => None,
        Err(e) if matches!(e.root(), ControllerError::Chart(_)) => None,
        Err(e) if e.is_fatal() => {
            let reason = error_reason(e.root());
            let message = e.to_string();
            Some([
                cond(CONDITION_READY, ConditionStatus::False, reason, &message),
                cond(CONDITION_PROGRESSING, ConditionStatus::False, reason, ""),
                cond(CONDITION_ERRORED, ConditionStatus::True, reason, &message),
            ])
        }
        Err(e) => {
            let message = e.to_string();
            Some([
                cond(CONDITION_READY, ConditionStatus::False, "Progressing", &message),
                cond(CONDITION_PROGRESSING, ConditionStatus::True, "Progressing", &message),
                cond(CONDITION_ERRORED, ConditionStatus::False, "Progressing", ""),
            ])
        }
    }
}

/// Machine readable reason for a terminal error
pub fn error_reason(err: &ControllerError) -> &'static str {
    match err {
        ControllerError::Permission { .. } => "Forbidden",
        ControllerError::NoKernelDetected => "NoKernelDetected",
        ControllerError::RecipeMissing(_) => "RecipeMissing",
        ControllerError::DependencyCycle(_) => "DependencyCycle",
        ControllerError::InvalidConfig(_) => "InvalidConfig",
        ControllerError::Chart(_) => "ChartError",
        ControllerError::Cluster { .. } | ControllerError::Api(_) => "Invalid",
        _ => "Failed",
    }
}

/// Records the outcome of a reconcile as conditions.
///
/// Cancellation and chart errors leave the status as it was.
pub async fn record_outcome(
    client: &dyn ClusterClientTrait,
    sr: &mut SpecialResource,
    outcome: &Result<(), ControllerError>,
) -> Result<(), ControllerError> {
    let Some(updates) = condition_set(outcome) else {
        return Ok(());
    };
    let status = sr.status.get_or_insert_with(Default::default);
    let mut conditions = status.conditions.clone();
    for condition in updates {
        set_condition(&mut conditions, condition);
    }
    let unchanged = conditions.len() == status.conditions.len()
        && conditions.iter().zip(&status.conditions).all(|(new, old)| {
            new.type_ == old.type_ && new.status == old.status && new.reason == old.reason && new.message == old.message
        });
    if unchanged {
        return Ok(());
    }
    status.conditions = conditions;
    write_status(client, sr).await
}

/// Operator-wide health reported on the ClusterOperator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorHealth {
    /// Every SR reconciled
    Available,
    /// Some SR is mid-reconcile
    Progressing,
    /// Some SR failed since its last success
    Degraded,
}

impl OperatorHealth {
    /// Health after a reconcile with the given outcome
    pub fn from_outcome(outcome: &Result<(), ControllerError>) -> Self {
        match outcome {
            Ok(()) => OperatorHealth::Available,
            Err(e) if e.is_fatal() => OperatorHealth::Degraded,
            Err(_) => OperatorHealth::Progressing,
        }
    }
}

fn cluster_operator_status(health: OperatorHealth, operator_namespace: &str, version: &str, message: &str) -> serde_json::Value {
    let flag = |on: bool| if on { "True" } else { "False" };
    let now = chrono::Utc::now().to_rfc3339();
    let condition = |type_: &str, on: bool| {
        json!({
            "type": type_,
            "status": flag(on),
            "reason": if on { "Reconciled" } else { "AsExpected" },
            "message": if on { message } else { "" },
            "lastTransitionTime": now,
        })
    };
    json!({
        "conditions": [
            condition("Available", health != OperatorHealth::Degraded),
            condition("Progressing", health == OperatorHealth::Progressing),
            condition("Degraded", health == OperatorHealth::Degraded),
        ],
        "relatedObjects": [
            {"group": "", "resource": "namespaces", "name": operator_namespace},
            {"group": crds::API_GROUP, "resource": "specialresources", "name": ""},
            {"group": crds::API_GROUP, "resource": "specialresourcemodules", "name": ""},
            {"group": crds::API_GROUP, "resource": "preflightvalidations", "name": ""},
        ],
        "versions": [{"name": "operator", "version": version}],
    })
}

/// Reports operator health on the ClusterOperator, best effort
pub async fn report_cluster_operator(
    client: &dyn ClusterClientTrait,
    health: OperatorHealth,
    operator_namespace: &str,
    version: &str,
    message: &str,
) {
    let gvk = gvk_from("config.openshift.io/v1", "ClusterOperator");
    let existing = match client.get(&gvk, None, CLUSTER_OPERATOR_NAME).await {
        Ok(existing) => existing,
        Err(e) => {
            debug!("ClusterOperator API unavailable: {}", e);
            return;
        }
    };
    let status = cluster_operator_status(health, operator_namespace, version, message);

    let mut object = match existing {
        Some(existing) => {
            let same_state = existing.data.get("status").is_some_and(|current| {
                let strip = |v: &serde_json::Value| {
                    v.get("conditions").and_then(|c| c.as_array()).map(|conds| {
                        conds
                            .iter()
                            .map(|c| (c.get("type").cloned(), c.get("status").cloned()))
                            .collect::<Vec<_>>()
                    })
                };
                strip(current) == strip(&status) && current.get("versions") == status.get("versions")
            });
            if same_state {
                return;
            }
            existing
        }
        None => {
            let mut created = DynamicObject {
                types: Some(kube::api::TypeMeta {
                    api_version: "config.openshift.io/v1".to_string(),
                    kind: "ClusterOperator".to_string(),
                }),
                metadata: ObjectMeta {
                    name: Some(CLUSTER_OPERATOR_NAME.to_string()),
                    ..Default::default()
                },
                data: json!({"spec": {}}),
            };
            match client.create(&created).await {
                Ok(stored) => created = stored,
                Err(e) => {
                    warn!("Could not create ClusterOperator {}: {}", CLUSTER_OPERATOR_NAME, e);
                    return;
                }
            }
            created
        }
    };

    if let Some(data) = object.data.as_object_mut() {
        data.insert("status".to_string(), status);
    }
    if let Err(e) = client.update_status(&object).await {
        warn!("Could not update ClusterOperator {}: {}", CLUSTER_OPERATOR_NAME, e);
    }
}
