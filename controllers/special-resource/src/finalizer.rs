//! Finalizer and owned-object sweeper
//!
//! Deletion of a SpecialResource is gated by a finalizer. Cleanup removes
//! the stage labels, the namespace the SR created and any stray object
//! still carrying `owned=true` and an owner reference to the SR.

use crate::annotations::{FINALIZER, LEGACY_FINALIZER, OWNED_LABEL};
use crate::context::ReconcileContext;
use crate::error::ControllerError;
use crate::poller;
use crate::stage;
use cluster_client::{from_dynamic, gvk_from, to_dynamic, ClusterClientTrait};
use crds::SpecialResource;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

const SPECIAL_RESOURCE_KIND: &str = "SpecialResource";

/// Whether the object carries the current finalizer token
pub fn has_finalizer<K: Resource>(object: &K) -> bool {
    object.finalizers().iter().any(|f| f == FINALIZER)
}

async fn write_metadata<K>(client: &dyn ClusterClientTrait, object: &mut K) -> Result<(), ControllerError>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
{
    let kind = K::kind(&()).to_string();
    let name = object.name_any();
    let dynamic = to_dynamic(object).map_err(|e| ControllerError::cluster(&kind, &name, e))?;
    let stored = client
        .update(&dynamic)
        .await
        .map_err(|e| ControllerError::cluster(&kind, &name, e))?;
    *object = from_dynamic(stored).map_err(|e| ControllerError::cluster(&kind, &name, e))?;
    Ok(())
}

/// Adds the finalizer token, returning whether a write happened
pub async fn add<K>(client: &dyn ClusterClientTrait, object: &mut K) -> Result<bool, ControllerError>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
{
    if has_finalizer(object) {
        return Ok(false);
    }
    object.finalizers_mut().push(FINALIZER.to_string());
    write_metadata(client, object).await?;
    debug!("Added finalizer to {} {}", K::kind(&()), object.name_any());
    Ok(true)
}

/// Removes the current and legacy finalizer tokens
pub async fn remove<K>(client: &dyn ClusterClientTrait, object: &mut K) -> Result<(), ControllerError>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
{
    let before = object.finalizers().len();
    object
        .finalizers_mut()
        .retain(|f| f != FINALIZER && f != LEGACY_FINALIZER);
    if object.finalizers().len() == before {
        return Ok(());
    }
    write_metadata(client, object).await?;
    info!("Removed finalizer from {} {}", K::kind(&()), object.name_any());
    Ok(())
}

/// Deletes the namespace when a SpecialResource created it, waiting for it to go
pub async fn remove_owned_namespace(ctx: &ReconcileContext, namespace: &str) -> Result<(), ControllerError> {
    let gvk = gvk_from("v1", "Namespace");
    let Some(live) = ctx
        .client()
        .get(&gvk, None, namespace)
        .await
        .map_err(|e| ControllerError::cluster("Namespace", namespace, e))?
    else {
        return Ok(());
    };
    let owned = live
        .metadata
        .owner_references
        .as_ref()
        .is_some_and(|refs| refs.iter().any(|r| r.kind == SPECIAL_RESOURCE_KIND));
    if !owned {
        debug!("Namespace {} not created by a SpecialResource, keeping it", namespace);
        return Ok(());
    }
    info!("Deleting namespace {}", namespace);
    ctx.client()
        .delete(&gvk, None, namespace)
        .await
        .map_err(|e| ControllerError::cluster("Namespace", namespace, e))?;
    poller::wait_deleted(ctx, &gvk, None, namespace).await
}

/// Deletes every `owned=true` object in `namespace` (and cluster-wide)
/// whose owner references include `owner_uid`.
///
/// Kinds that cannot be listed are skipped; a failed delete aborts.
pub async fn sweep(ctx: &ReconcileContext, namespace: &str, owner_uid: &str) -> Result<usize, ControllerError> {
    let selector = format!("{}=true", OWNED_LABEL);
    let resources = match ctx.client().api_resources().await {
        Ok(resources) => resources,
        Err(e) => {
            warn!("Could not enumerate API resources, skipping sweep: {}", e);
            return Ok(0);
        }
    };

    let mut deleted = 0;
    for resource in resources.iter().filter(|r| r.listable && r.deletable) {
        ctx.check_cancelled()?;
        let scope = resource.namespaced.then_some(namespace);
        let objects = match ctx.client().list(&resource.gvk, scope, Some(&selector)).await {
            Ok(objects) => objects,
            Err(e) => {
                debug!("Skipping {} during sweep: {}", resource.gvk.kind, e);
                continue;
            }
        };
        for object in objects {
            let owned_by = object
                .metadata
                .owner_references
                .as_ref()
                .is_some_and(|refs| refs.iter().any(|r| r.uid == owner_uid));
            if !owned_by {
                continue;
            }
            let name = object.name_any();
            let object_namespace = object.metadata.namespace.as_deref();
            ctx.client()
                .delete(&resource.gvk, object_namespace, &name)
                .await
                .map_err(|e| ControllerError::cluster(&resource.gvk.kind, &name, e))?;
            debug!("Swept {} {}", resource.gvk.kind, name);
            deleted += 1;
        }
    }
    Ok(deleted)
}

/// Runs the full cleanup of a SpecialResource marked for deletion
pub async fn finalize_special_resource(ctx: &mut ReconcileContext, sr: &mut SpecialResource) -> Result<(), ControllerError> {
    if !sr.finalizers().iter().any(|f| f == FINALIZER || f == LEGACY_FINALIZER) {
        return Ok(());
    }
    let name = sr.name_any();
    let namespace = sr.target_namespace();
    info!("Finalizing SpecialResource {}", name);

    stage::remove_all(ctx, &name).await?;
    remove_owned_namespace(ctx, &namespace).await?;
    if let Some(uid) = sr.uid() {
        let swept = sweep(ctx, &namespace, &uid).await?;
        if swept > 0 {
            info!("Swept {} object(s) owned by {}", swept, name);
        }
    }
    let client = std::sync::Arc::clone(&ctx.client);
    remove(client.as_ref(), sr).await
}
