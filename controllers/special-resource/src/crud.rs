//! Create/update engine
//!
//! Desired objects are stamped with their content hash and compared with
//! the live object's recorded hash; nothing is written when they agree.

use crate::annotations::{DAEMONSET_TEMPLATE_GENERATION, DRIVER_CONTAINER_VENDOR};
use crate::context::ReconcileContext;
use crate::error::ControllerError;
use crate::hash;
use cluster_client::{gvk_of, kind_of, ClusterError};
use kube::api::DynamicObject;
use tracing::{debug, info};

/// Kinds never updated once created
const NOT_UPDATEABLE: &[&str] = &["ServiceAccount", "Pod"];

/// Kinds whose update must carry the live resourceVersion
const NEEDS_RESOURCE_VERSION: &[&str] = &[
    "Service",
    "Route",
    "BuildConfig",
    "ImageStream",
    "PrometheusRule",
    "ServiceMonitor",
    "CSIDriver",
    "Issuer",
    "CustomResourceDefinition",
    "Certificate",
    "OperatorGroup",
    "Subscription",
    "MutatingWebhookConfiguration",
    "ValidatingWebhookConfiguration",
    "Deployment",
    "SecurityContextConstraints",
    "SpecialResource",
];

/// What applying one object did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    /// Recorded hash matched
    Unchanged,
    /// Kind is not updated in place
    Skipped,
    /// BuildConfig created again after a rebuild request
    Recreated,
}

/// Result of applying one object
#[derive(Debug, Clone)]
pub struct Applied {
    pub outcome: ApplyOutcome,
    /// Object as stored by the API server
    pub live: DynamicObject,
}

fn object_name(object: &DynamicObject) -> &str {
    object.metadata.name.as_deref().unwrap_or_default()
}

fn annotation<'a>(object: &'a DynamicObject, key: &str) -> Option<&'a str> {
    object.metadata.annotations.as_ref()?.get(key).map(String::as_str)
}

/// Copies what the API server owns from the live object into the desired one
fn carry_over(kind: &str, found: &DynamicObject, desired: &mut DynamicObject) {
    if NEEDS_RESOURCE_VERSION.contains(&kind) {
        desired.metadata.resource_version = found.metadata.resource_version.clone();
    }
    match kind {
        "Service" => {
            for field in ["clusterIP", "clusterIPs"] {
                if let Some(value) = found.data.get("spec").and_then(|s| s.get(field)) {
                    if let Some(spec) = desired.data.get_mut("spec").and_then(|s| s.as_object_mut()) {
                        spec.insert(field.to_string(), value.clone());
                    }
                }
            }
        }
        "DaemonSet" => {
            if let Some(generation) = annotation(found, DAEMONSET_TEMPLATE_GENERATION) {
                desired
                    .metadata
                    .annotations
                    .get_or_insert_with(Default::default)
                    .insert(DAEMONSET_TEMPLATE_GENERATION.to_string(), generation.to_string());
            }
        }
        _ => {}
    }
}

/// Creates `desired`. An object appearing between the read and the
/// create counts as unchanged only when it carries the same hash.
async fn create(ctx: &ReconcileContext, desired: &DynamicObject, desired_hash: u64) -> Result<Applied, ControllerError> {
    let kind = kind_of(desired);
    let name = object_name(desired);
    let e = match ctx.client().create(desired).await {
        Ok(live) => {
            info!("Created {} {}", kind, name);
            return Ok(Applied {
                outcome: ApplyOutcome::Created,
                live,
            });
        }
        Err(e @ ClusterError::AlreadyExists(_)) => e,
        Err(e) => return Err(ControllerError::cluster(kind, name, e)),
    };

    let gvk = gvk_of(desired)?;
    let found = ctx
        .client()
        .get(&gvk, desired.metadata.namespace.as_deref(), name)
        .await
        .map_err(|e| ControllerError::cluster(kind, name, e))?;
    match found {
        Some(live) if live.metadata.deletion_timestamp.is_none() && hash::recorded_hash(&live) == Some(desired_hash) => {
            debug!("{} {} appeared concurrently with the same content", kind, name);
            Ok(Applied {
                outcome: ApplyOutcome::Unchanged,
                live,
            })
        }
        _ => Err(ControllerError::cluster(kind, name, e)),
    }
}

/// Whether `object` is a BuildConfig of the vendor awaiting a rebuild
fn rebuild_requested(ctx: &ReconcileContext, object: &DynamicObject) -> bool {
    let vendor = annotation(object, DRIVER_CONTAINER_VENDOR);
    vendor.is_some() && vendor == ctx.update_vendor.as_deref()
}

/// Creates or updates one decorated object
pub async fn apply(ctx: &mut ReconcileContext, mut desired: DynamicObject) -> Result<Applied, ControllerError> {
    let gvk = gvk_of(&desired)?;
    let kind = gvk.kind.clone();
    let name = object_name(&desired).to_string();
    let namespace = desired.metadata.namespace.clone();
    let desired_hash = hash::stamp(&mut desired)?;

    let found = ctx
        .client()
        .get(&gvk, namespace.as_deref(), &name)
        .await
        .map_err(|e| ControllerError::cluster(&kind, &name, e))?;
    let Some(found) = found else {
        let created = create(ctx, &desired, desired_hash).await?;
        if kind == "BuildConfig" && rebuild_requested(ctx, &desired) {
            info!("BuildConfig {} recreated, rebuild of {:?} requested", name, ctx.update_vendor);
            ctx.update_vendor = None;
            return Ok(Applied {
                outcome: ApplyOutcome::Recreated,
                live: created.live,
            });
        }
        return Ok(created);
    };

    if NOT_UPDATEABLE.contains(&kind.as_str()) {
        debug!("{} {} exists and is not updateable", kind, name);
        return Ok(Applied {
            outcome: ApplyOutcome::Skipped,
            live: found,
        });
    }

    // Deleted now, created on a later pass once the old one is gone. The
    // rebuild request stays set until then.
    if kind == "BuildConfig" {
        if found.metadata.deletion_timestamp.is_some() {
            return Err(ControllerError::Requeue(format!("BuildConfig {} is still being deleted", name)));
        }
        if rebuild_requested(ctx, &found) {
            info!("Deleting BuildConfig {} to rebuild vendor {:?}", name, ctx.update_vendor);
            ctx.client()
                .delete(&gvk, namespace.as_deref(), &name)
                .await
                .map_err(|e| ControllerError::cluster(&kind, &name, e))?;
            return Err(ControllerError::Requeue(format!("BuildConfig {} deleted for a rebuild", name)));
        }
        debug!("BuildConfig {} is only rebuilt on vendor request", name);
        return Ok(Applied {
            outcome: ApplyOutcome::Skipped,
            live: found,
        });
    }

    if hash::recorded_hash(&found) == Some(desired_hash) {
        debug!("{} {} unchanged", kind, name);
        return Ok(Applied {
            outcome: ApplyOutcome::Unchanged,
            live: found,
        });
    }

    carry_over(&kind, &found, &mut desired);
    let live = ctx
        .client()
        .update(&desired)
        .await
        .map_err(|e| ControllerError::cluster(&kind, &name, e))?;
    info!("Updated {} {}", kind, name);
    Ok(Applied {
        outcome: ApplyOutcome::Updated,
        live,
    })
}
