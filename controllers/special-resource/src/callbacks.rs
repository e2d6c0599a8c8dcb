//! Hooks around CRUD
//!
//! Pre-apply callbacks are selected by the `callback` annotation. The
//! image pull check runs on driver-container DaemonSets before waiting
//! on them.

use crate::annotations::{CALLBACK, DRIVER_CONTAINER_VENDOR};
use crate::context::ReconcileContext;
use crate::error::ControllerError;
use crate::manifest::Manifest;
use crate::poller::match_labels_selector;
use base64::Engine;
use cluster_client::gvk_from;
use kube::api::DynamicObject;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Callback substituting the cluster Prometheus into a Grafana datasource ConfigMap
pub const GRAFANA_CALLBACK: &str = "specialresource-grafana-configmap";

const GRAFANA_SECRET_NAMESPACE: &str = "openshift-monitoring";
const GRAFANA_SECRET_NAME: &str = "grafana-datasources";
const GRAFANA_SECRET_KEY: &str = "prometheus.yaml";

/// Waiting reasons meaning the driver image does not exist (yet)
const IMAGE_PULL_FAILURES: &[&str] = &["ImagePullBackOff", "ErrImagePull"];

#[derive(Debug, Default, Deserialize)]
struct GrafanaDatasources {
    #[serde(default)]
    datasources: Vec<GrafanaDatasource>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GrafanaDatasource {
    #[serde(default)]
    url: String,
    #[serde(default)]
    basic_auth_user: String,
    #[serde(default)]
    basic_auth_password: String,
}

/// Runs the pre-apply callback named by the object's annotation, if any
pub async fn pre_apply(ctx: &ReconcileContext, manifest: &mut Manifest) -> Result<(), ControllerError> {
    let Some(name) = manifest.annotation(CALLBACK).map(str::to_string) else {
        return Ok(());
    };
    match name.as_str() {
        GRAFANA_CALLBACK => grafana_configmap(ctx, manifest).await,
        other => {
            warn!("Unknown callback {:?} on {} {}", other, manifest.kind(), manifest.name());
            Ok(())
        }
    }
}

async fn grafana_configmap(ctx: &ReconcileContext, manifest: &mut Manifest) -> Result<(), ControllerError> {
    let Manifest::ConfigMap(cm) = manifest else {
        warn!("{} callback only applies to ConfigMaps", GRAFANA_CALLBACK);
        return Ok(());
    };
    let secret = ctx
        .client()
        .get(&gvk_from("v1", "Secret"), Some(GRAFANA_SECRET_NAMESPACE), GRAFANA_SECRET_NAME)
        .await
        .map_err(|e| ControllerError::cluster("Secret", GRAFANA_SECRET_NAME, e))?
        .ok_or_else(|| ControllerError::Requeue(format!("secret {} not found", GRAFANA_SECRET_NAME)))?;

    let encoded = secret
        .data
        .get("data")
        .and_then(|d| d.get(GRAFANA_SECRET_KEY))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let raw = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| ControllerError::Serialization(format!("{}: {}", GRAFANA_SECRET_KEY, e)))?;
    let sources: GrafanaDatasources = serde_yaml::from_slice(&raw)?;
    let source = sources.datasources.into_iter().next().unwrap_or_default();

    if let Some(data) = cm.data.as_mut() {
        for value in data.values_mut() {
            *value = value
                .replace("REPLACE_PROMETHEUS_URL", &source.url)
                .replace("REPLACE_PROMETHEUS_USER", &source.basic_auth_user)
                .replace("REPLACE_PROMETHEUS_PASSWORD", &source.basic_auth_password);
        }
    }
    debug!("Substituted Prometheus datasource into ConfigMap {:?}", cm.metadata.name);
    Ok(())
}

fn waiting_reasons(pod: &DynamicObject) -> impl Iterator<Item = &str> {
    pod.data
        .pointer("/status/containerStatuses")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|s| s.pointer("/state/waiting/reason").and_then(Value::as_str))
}

/// Looks at one pod of a vendor-annotated DaemonSet.
///
/// A pull failure means the driver image has not been built for this
/// kernel: the vendor is flagged for rebuild and the step is requeued.
/// Otherwise any earlier rebuild request is cleared.
pub async fn check_image_pull(ctx: &mut ReconcileContext, daemonset: &DynamicObject) -> Result<(), ControllerError> {
    let Some(vendor) = daemonset
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(DRIVER_CONTAINER_VENDOR))
        .cloned()
    else {
        return Ok(());
    };
    let pods = ctx
        .client()
        .list(
            &gvk_from("v1", "Pod"),
            daemonset.metadata.namespace.as_deref(),
            match_labels_selector(daemonset).as_deref(),
        )
        .await?;
    let Some(pod) = pods.first() else {
        return Ok(());
    };

    if waiting_reasons(pod).any(|r| IMAGE_PULL_FAILURES.contains(&r)) {
        info!(
            "Pod {:?} cannot pull its driver image, requesting a {} rebuild",
            pod.metadata.name, vendor
        );
        ctx.update_vendor = Some(vendor.clone());
        return Err(ControllerError::Requeue(format!(
            "waiting for the {} driver container to be rebuilt",
            vendor
        )));
    }
    ctx.update_vendor = None;
    Ok(())
}
