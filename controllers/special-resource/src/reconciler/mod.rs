//! Reconciliation logic for the operator's custom resources.
//!
//! One `Reconciler` is shared by the three controllers. Each reconcile
//! gets its own [`ReconcileContext`]; the only state carried from one
//! reconcile to the next is the driver-container vendor flagged for a
//! rebuild.

mod apply;
mod module;
mod preflight;
mod special_resource;

use crate::backoff::BackoffTracker;
use crate::chart::source::ChartSource;
use crate::config::OperatorConfig;
use crate::context::ReconcileContext;
use crate::dynamic_watch::DynamicWatches;
use crate::error::ControllerError;
use crate::preflight::ReleaseResolver;
use crate::recipes::RecipeSource;
use cluster_client::{from_dynamic, gvk_for, gvk_from, ClusterClientTrait};
use crds::SpecialResource;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{DynamicObject, ObjectMeta};
use kube::ResourceExt;
use registry_client::RegistryClientTrait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Reconciles SpecialResources, SpecialResourceModules and PreflightValidations
pub struct Reconciler {
    client: Arc<dyn ClusterClientTrait>,
    registry: Arc<dyn RegistryClientTrait>,
    config: Arc<OperatorConfig>,
    charts: Arc<dyn ChartSource>,
    recipes: Arc<dyn RecipeSource>,
    releases: Arc<dyn ReleaseResolver>,
    watches: Arc<DynamicWatches>,
    /// Error backoff per SpecialResource
    pub sr_backoff: BackoffTracker,
    /// Error backoff per SpecialResourceModule
    pub module_backoff: BackoffTracker,
    update_vendor: Mutex<Option<String>>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a reconciler over the given cluster, registry and sources
    pub fn new(
        client: Arc<dyn ClusterClientTrait>,
        registry: Arc<dyn RegistryClientTrait>,
        config: Arc<OperatorConfig>,
        charts: Arc<dyn ChartSource>,
        recipes: Arc<dyn RecipeSource>,
        releases: Arc<dyn ReleaseResolver>,
        watches: Arc<DynamicWatches>,
    ) -> Self {
        Self {
            client,
            registry,
            config,
            charts,
            recipes,
            releases,
            watches,
            sr_backoff: BackoffTracker::for_special_resources(),
            module_backoff: BackoffTracker::for_modules(),
            update_vendor: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancels every reconcile in flight and any started later
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Operator configuration
    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    /// Fresh context for a reconcile of an object selecting `node_selector`
    fn context(&self, node_selector: &BTreeMap<String, String>) -> ReconcileContext {
        let update_vendor = match self.update_vendor.lock() {
            Ok(vendor) => vendor.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        ReconcileContext::new(
            Arc::clone(&self.client),
            Arc::clone(&self.config),
            self.shutdown.child_token(),
            update_vendor,
            node_selector,
        )
    }

    /// Carries the rebuild request of a finished reconcile over to the next one
    fn keep_update_vendor(&self, ctx: &ReconcileContext) {
        let mut vendor = match self.update_vendor.lock() {
            Ok(vendor) => vendor,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *vendor != ctx.update_vendor {
            debug!("Update vendor now {:?}", ctx.update_vendor);
            vendor.clone_from(&ctx.update_vendor);
        }
    }

    /// Every SpecialResource in the cluster by name
    async fn special_resources(&self) -> Result<BTreeMap<String, SpecialResource>, ControllerError> {
        let objects = self
            .client
            .list(&gvk_for::<SpecialResource>(), None, None)
            .await?;
        let mut special_resources = BTreeMap::new();
        for object in objects {
            match from_dynamic::<SpecialResource>(object) {
                Ok(sr) => {
                    special_resources.insert(sr.name_any(), sr);
                }
                Err(e) => warn!("Skipping unreadable SpecialResource: {}", e),
            }
        }
        Ok(special_resources)
    }
}

/// Controller owner reference to `owner`, which must have been stored
fn owner_reference<K>(owner: &K) -> Result<OwnerReference, ControllerError>
where
    K: kube::Resource<DynamicType = ()>,
{
    owner.controller_owner_ref(&()).ok_or_else(|| {
        ControllerError::InvalidConfig(format!("{} {} has no uid yet", K::kind(&()), owner.name_any()))
    })
}

/// Creates the target namespace, owned by `owner`, unless it already exists
async fn ensure_namespace(
    ctx: &mut ReconcileContext,
    namespace: &str,
    owner: &OwnerReference,
) -> Result<(), ControllerError> {
    let gvk = gvk_from("v1", "Namespace");
    let found = ctx
        .client()
        .get(&gvk, None, namespace)
        .await
        .map_err(|e| ControllerError::cluster("Namespace", namespace, e))?;
    if found.is_some() {
        return Ok(());
    }
    let desired = Namespace {
        metadata: ObjectMeta {
            name: Some(namespace.to_string()),
            owner_references: Some(vec![owner.clone()]),
            ..Default::default()
        },
        ..Default::default()
    };
    let desired: DynamicObject = cluster_client::to_dynamic(&desired)?;
    crate::crud::apply(ctx, desired).await?;
    Ok(())
}
