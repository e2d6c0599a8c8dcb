//! Readiness polling
//!
//! Each applied object gets a [`ReadinessContract`] derived from its kind
//! and annotations. The poller re-reads the object at the configured
//! interval until the contract holds, the poll ceiling is reached or the
//! reconcile is cancelled.

use crate::annotations::{WAIT, WAIT_FOR_LOGS};
use crate::context::ReconcileContext;
use crate::error::ControllerError;
use cluster_client::{gvk_of, kind_of};
use kube::api::DynamicObject;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::time::Instant;
use tracing::{debug, info};

/// Bytes of log tail matched against a wait-for-logs pattern
const LOG_TAIL_BYTES: usize = 100;

/// Label carrying the DaemonSet template generation on its pods
const POD_TEMPLATE_GENERATION_LABEL: &str = "pod-template-generation";

/// When an object counts as available
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessRule {
    /// The object exists
    Exists,
    /// `status.phase == Succeeded`
    PodSucceeded,
    /// Every scheduled pod available, and on OnDelete every pod on the current template
    DaemonSetAvailable,
    /// Every live ReplicaSet fully available
    DeploymentAvailable,
    /// `status.currentReplicas == spec.replicas`
    StatefulSetReady,
    /// A `Complete=True` condition
    JobComplete,
    /// Every Build of the BuildConfig complete
    BuildsComplete,
    /// Group served after a discovery refresh
    CrdEstablished,
}

/// What to wait for after applying an object
#[derive(Debug, Clone)]
pub struct ReadinessContract {
    /// `None` means do not wait at all
    pub rule: Option<ReadinessRule>,
    /// Pattern the tail of the first matching pod's log must match
    pub wait_for_logs: Option<Regex>,
}

impl ReadinessContract {
    /// Derives the contract from the object's kind and annotations
    pub fn for_object(object: &DynamicObject) -> Result<Self, ControllerError> {
        let kind = kind_of(object);
        let annotations = object.metadata.annotations.as_ref();
        let wait_for_logs = annotations
            .and_then(|a| a.get(WAIT_FOR_LOGS))
            .filter(|p| !p.is_empty())
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    ControllerError::Chart(format!("invalid {} pattern {:?}: {}", WAIT_FOR_LOGS, p, e))
                })
            })
            .transpose()?;

        let rule = if kind == "CustomResourceDefinition" {
            Some(ReadinessRule::CrdEstablished)
        } else if crate::annotations::is_true(annotations, WAIT) {
            Some(match kind {
                "Pod" => ReadinessRule::PodSucceeded,
                "DaemonSet" => ReadinessRule::DaemonSetAvailable,
                "Deployment" => ReadinessRule::DeploymentAvailable,
                "StatefulSet" => ReadinessRule::StatefulSetReady,
                "Job" => ReadinessRule::JobComplete,
                "BuildConfig" => ReadinessRule::BuildsComplete,
                _ => ReadinessRule::Exists,
            })
        } else if wait_for_logs.is_some() {
            Some(ReadinessRule::Exists)
        } else {
            None
        };

        Ok(Self { rule, wait_for_logs })
    }

    /// Whether the poller has anything to do
    pub fn waits(&self) -> bool {
        self.rule.is_some()
    }
}

fn int_at(value: &Value, pointer: &str) -> Option<i64> {
    value.pointer(pointer).and_then(Value::as_i64)
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> &'a str {
    value.pointer(pointer).and_then(Value::as_str).unwrap_or_default()
}

/// `k=v,...` selector from `spec.selector.matchLabels`
pub fn match_labels_selector(object: &DynamicObject) -> Option<String> {
    let labels: BTreeMap<String, String> = object
        .data
        .pointer("/spec/selector/matchLabels")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())?;
    crate::node_cache::selector_string(&labels)
}

fn has_condition(object: &DynamicObject, type_: &str) -> bool {
    object
        .data
        .pointer("/status/conditions")
        .and_then(Value::as_array)
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| str_at(c, "/type") == type_ && str_at(c, "/status") == "True")
        })
}

async fn daemonset_available(ctx: &ReconcileContext, ds: &DynamicObject) -> Result<bool, ControllerError> {
    let data = &ds.data;
    let desired = int_at(data, "/status/desiredNumberScheduled").unwrap_or(0);
    let available = int_at(data, "/status/numberAvailable").unwrap_or(0);
    let unavailable = int_at(data, "/status/numberUnavailable").unwrap_or(0);
    if desired != available || unavailable != 0 {
        debug!("DaemonSet {:?}: {}/{} available", ds.metadata.name, available, desired);
        return Ok(false);
    }
    if str_at(data, "/spec/updateStrategy/type") != "OnDelete" {
        return Ok(true);
    }
    let generation = ds.metadata.generation.unwrap_or_default().to_string();
    let pods = ctx
        .client()
        .list(
            &cluster_client::gvk_from("v1", "Pod"),
            ds.metadata.namespace.as_deref(),
            match_labels_selector(ds).as_deref(),
        )
        .await?;
    Ok(pods.iter().all(|pod| {
        pod.metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(POD_TEMPLATE_GENERATION_LABEL))
            == Some(&generation)
    }))
}

async fn deployment_available(ctx: &ReconcileContext, deployment: &DynamicObject) -> Result<bool, ControllerError> {
    let replica_sets = ctx
        .client()
        .list(
            &cluster_client::gvk_from("apps/v1", "ReplicaSet"),
            deployment.metadata.namespace.as_deref(),
            match_labels_selector(deployment).as_deref(),
        )
        .await?;
    // ReplicaSets scaled to zero are on their way out
    let live: Vec<_> = replica_sets
        .iter()
        .filter(|rs| int_at(&rs.data, "/status/replicas").unwrap_or(0) > 0)
        .collect();
    if live.is_empty() {
        return Ok(false);
    }
    Ok(live.iter().all(|rs| {
        int_at(&rs.data, "/status/availableReplicas").unwrap_or(0)
            == int_at(&rs.data, "/status/replicas").unwrap_or(0)
    }))
}

async fn builds_complete(ctx: &ReconcileContext, build_config: &DynamicObject) -> Result<bool, ControllerError> {
    let name = build_config.metadata.name.as_deref().unwrap_or_default();
    let builds = ctx
        .client()
        .list(
            &cluster_client::gvk_from("build.openshift.io/v1", "Build"),
            build_config.metadata.namespace.as_deref(),
            None,
        )
        .await?;
    let owned: Vec<_> = builds
        .iter()
        .filter(|b| {
            b.metadata.owner_references.as_ref().is_some_and(|refs| {
                refs.iter().any(|r| r.kind == "BuildConfig" && r.name == name)
            })
        })
        .collect();
    if owned.is_empty() {
        return Ok(false);
    }
    Ok(owned.iter().all(|b| str_at(&b.data, "/status/phase") == "Complete"))
}

async fn crd_established(ctx: &ReconcileContext, crd: &DynamicObject) -> Result<bool, ControllerError> {
    ctx.client().refresh_discovery().await?;
    let group = str_at(&crd.data, "/spec/group");
    let groups = ctx.client().server_groups().await?;
    Ok(groups.iter().any(|g| g == group))
}

/// Evaluates a rule against the live object
pub async fn check(ctx: &ReconcileContext, rule: ReadinessRule, live: &DynamicObject) -> Result<bool, ControllerError> {
    Ok(match rule {
        ReadinessRule::Exists => true,
        ReadinessRule::PodSucceeded => str_at(&live.data, "/status/phase") == "Succeeded",
        ReadinessRule::DaemonSetAvailable => daemonset_available(ctx, live).await?,
        ReadinessRule::DeploymentAvailable => deployment_available(ctx, live).await?,
        ReadinessRule::StatefulSetReady => {
            let wanted = int_at(&live.data, "/spec/replicas").unwrap_or(1);
            int_at(&live.data, "/status/currentReplicas").unwrap_or(0) == wanted
        }
        ReadinessRule::JobComplete => has_condition(live, "Complete"),
        ReadinessRule::BuildsComplete => builds_complete(ctx, live).await?,
        ReadinessRule::CrdEstablished => crd_established(ctx, live).await?,
    })
}

/// Last `LOG_TAIL_BYTES` of a log, cut at a character boundary
fn tail(log: &str) -> &str {
    let mut start = log.len().saturating_sub(LOG_TAIL_BYTES);
    while !log.is_char_boundary(start) {
        start += 1;
    }
    &log[start..]
}

async fn logs_match(ctx: &ReconcileContext, live: &DynamicObject, pattern: &Regex) -> Result<bool, ControllerError> {
    let Some(namespace) = live.metadata.namespace.as_deref() else {
        return Ok(false);
    };
    let app = live
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get("app"))
        .cloned()
        .or_else(|| live.metadata.name.clone())
        .unwrap_or_default();
    let pods = ctx
        .client()
        .list(&cluster_client::gvk_from("v1", "Pod"), Some(namespace), Some(&format!("app={}", app)))
        .await?;
    let Some(pod) = pods.first().and_then(|p| p.metadata.name.clone()) else {
        debug!("No pod with app={} yet", app);
        return Ok(false);
    };
    let log = match ctx.client().pod_logs(namespace, &pod).await {
        Ok(log) => log,
        Err(e) if e.is_not_found() => return Ok(false),
        Err(e) => return Err(ControllerError::cluster("Pod", &pod, e)),
    };
    Ok(pattern.is_match(tail(&log)))
}

/// Blocks until the contract holds for the object
pub async fn wait(
    ctx: &ReconcileContext,
    contract: &ReadinessContract,
    applied: &DynamicObject,
) -> Result<(), ControllerError> {
    let Some(rule) = contract.rule else {
        return Ok(());
    };
    let gvk = gvk_of(applied)?;
    let kind = gvk.kind.clone();
    let name = applied.metadata.name.clone().unwrap_or_default();
    let namespace = applied.metadata.namespace.clone();
    let deadline = Instant::now() + ctx.config.poll_timeout;

    info!("Waiting for {} {} ({:?})", kind, name, rule);
    loop {
        ctx.check_cancelled()?;
        let live = ctx
            .client()
            .get(&gvk, namespace.as_deref(), &name)
            .await
            .map_err(|e| ControllerError::cluster(&kind, &name, e))?;
        if let Some(live) = live {
            let ready = check(ctx, rule, &live).await?
                && match &contract.wait_for_logs {
                    Some(pattern) => logs_match(ctx, &live, pattern).await?,
                    None => true,
                };
            if ready {
                debug!("{} {} is ready", kind, name);
                return Ok(());
            }
        }
        if Instant::now() >= deadline {
            return Err(ControllerError::PollTimeout {
                kind,
                name,
                timeout: ctx.config.poll_timeout,
            });
        }
        ctx.sleep(ctx.config.poll_interval).await?;
    }
}

/// Polls until the object is gone
pub async fn wait_deleted(
    ctx: &ReconcileContext,
    gvk: &kube::api::GroupVersionKind,
    namespace: Option<&str>,
    name: &str,
) -> Result<(), ControllerError> {
    let deadline = Instant::now() + ctx.config.poll_timeout;
    loop {
        ctx.check_cancelled()?;
        let found = ctx
            .client()
            .get(gvk, namespace, name)
            .await
            .map_err(|e| ControllerError::cluster(&gvk.kind, name, e))?;
        if found.is_none() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(ControllerError::PollTimeout {
                kind: gvk.kind.clone(),
                name: name.to_string(),
                timeout: ctx.config.poll_timeout,
            });
        }
        ctx.sleep(ctx.config.poll_interval).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use cluster_client::MockClusterClient;
    use serde_json::json;

    fn object(value: Value) -> DynamicObject {
        serde_json::from_value(value).expect("valid object")
    }

    #[test]
    fn test_contract_from_annotations() {
        let ds = object(json!({
            "apiVersion": "apps/v1", "kind": "DaemonSet",
            "metadata": {"name": "ds", "annotations": {"specialresource.openshift.io/wait": "true"}}
        }));
        assert_eq!(ReadinessContract::for_object(&ds).expect("valid").rule, Some(ReadinessRule::DaemonSetAvailable));

        let cm = object(json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "cm"}}));
        assert!(!ReadinessContract::for_object(&cm).expect("valid").waits());

        let crd = object(json!({"apiVersion": "apiextensions.k8s.io/v1", "kind": "CustomResourceDefinition", "metadata": {"name": "x"}}));
        assert_eq!(ReadinessContract::for_object(&crd).expect("valid").rule, Some(ReadinessRule::CrdEstablished));

        let bad = object(json!({
            "apiVersion": "v1", "kind": "Pod",
            "metadata": {"name": "p", "annotations": {"specialresource.openshift.io/wait-for-logs": "("}}
        }));
        assert!(ReadinessContract::for_object(&bad).is_err());
    }

    #[test]
    fn test_tail_respects_char_boundaries() {
        let log = format!("{}é{}", "x".repeat(10), "y".repeat(99));
        assert_eq!(tail(&log), "y".repeat(99));
        assert_eq!(tail("short"), "short");
    }

    #[tokio::test]
    async fn test_daemonset_rule() {
        let client = MockClusterClient::new();
        let ctx = test_context(&client, &BTreeMap::new());
        let ready = object(json!({
            "apiVersion": "apps/v1", "kind": "DaemonSet", "metadata": {"name": "ds", "namespace": "drv"},
            "status": {"desiredNumberScheduled": 2, "numberAvailable": 2}
        }));
        assert!(check(&ctx, ReadinessRule::DaemonSetAvailable, &ready).await.expect("checked"));
        let rolling = object(json!({
            "apiVersion": "apps/v1", "kind": "DaemonSet", "metadata": {"name": "ds", "namespace": "drv"},
            "status": {"desiredNumberScheduled": 2, "numberAvailable": 1, "numberUnavailable": 1}
        }));
        assert!(!check(&ctx, ReadinessRule::DaemonSetAvailable, &rolling).await.expect("checked"));
    }

    #[tokio::test]
    async fn test_deployment_ignores_scaled_down_replica_sets() {
        let client = MockClusterClient::new();
        for (name, replicas, available) in [("old", 0, 0), ("new", 2, 2)] {
            client.add_object(object(json!({
                "apiVersion": "apps/v1", "kind": "ReplicaSet",
                "metadata": {"name": name, "namespace": "demo", "labels": {"app": "web"}},
                "status": {"replicas": replicas, "availableReplicas": available}
            })));
        }
        let ctx = test_context(&client, &BTreeMap::new());
        let deployment = object(json!({
            "apiVersion": "apps/v1", "kind": "Deployment", "metadata": {"name": "web", "namespace": "demo"},
            "spec": {"selector": {"matchLabels": {"app": "web"}}}
        }));
        assert!(check(&ctx, ReadinessRule::DeploymentAvailable, &deployment).await.expect("checked"));
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let client = MockClusterClient::new();
        let job = object(json!({
            "apiVersion": "batch/v1", "kind": "Job",
            "metadata": {"name": "j", "namespace": "demo", "annotations": {"specialresource.openshift.io/wait": "true"}}
        }));
        client.add_object(job.clone());
        let ctx = test_context(&client, &BTreeMap::new());
        let contract = ReadinessContract::for_object(&job).expect("valid");
        let err = wait(&ctx, &contract, &job).await.expect_err("never completes");
        assert!(matches!(err, ControllerError::PollTimeout { .. }));
    }

    #[tokio::test]
    async fn test_wait_for_logs() {
        let client = MockClusterClient::new();
        let pod = object(json!({
            "apiVersion": "v1", "kind": "Pod",
            "metadata": {"name": "drv-abc", "namespace": "drv", "labels": {"app": "drv"},
                         "annotations": {"specialresource.openshift.io/wait-for-logs": "driver loaded"}}
        }));
        client.add_object(pod.clone());
        client.set_pod_log("drv", "drv-abc", "building...\ndriver loaded\n");
        let ctx = test_context(&client, &BTreeMap::new());
        let contract = ReadinessContract::for_object(&pod).expect("valid");
        wait(&ctx, &contract, &pod).await.expect("log matched");
    }

    #[tokio::test]
    async fn test_wait_is_cancellable() {
        let client = MockClusterClient::new();
        let job = object(json!({
            "apiVersion": "batch/v1", "kind": "Job",
            "metadata": {"name": "j", "namespace": "demo", "annotations": {"specialresource.openshift.io/wait": "true"}}
        }));
        client.add_object(job.clone());
        let ctx = test_context(&client, &BTreeMap::new());
        ctx.cancel.cancel();
        let contract = ReadinessContract::for_object(&job).expect("valid");
        let err = wait(&ctx, &contract, &job).await.expect_err("cancelled");
        assert!(err.is_cancelled());
    }
}
