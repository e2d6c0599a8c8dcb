//! Applying rendered objects: decorate, callbacks, CRUD, readiness

use super::Reconciler;
use crate::callbacks;
use crate::chart::fanout::{self, Renderer};
use crate::chart::Template;
use crate::context::ReconcileContext;
use crate::crud;
use crate::decorator::Decorator;
use crate::error::ControllerError;
use crate::manifest::Manifest;
use crate::poller::{self, ReadinessContract};
use crate::runtime_info::RuntimeInformation;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Where rendered objects go and who owns them
pub(super) struct Target<'a> {
    pub release_name: &'a str,
    pub namespace: &'a str,
    pub owner: Option<&'a OwnerReference>,
    pub node_selector: &'a BTreeMap<String, String>,
}

impl Target<'_> {
    fn decorator<'a>(&'a self, runtime: &'a RuntimeInformation) -> Decorator<'a> {
        Decorator {
            namespace: self.namespace,
            release_name: self.release_name,
            owner: self.owner,
            node_selector: self.node_selector,
            runtime,
        }
    }
}

impl Reconciler {
    /// Applies objects one by one in the given order, each reaching its
    /// readiness contract before the next is touched
    pub(super) async fn apply_manifests(
        &self,
        ctx: &mut ReconcileContext,
        decorator: &Decorator<'_>,
        manifests: Vec<Manifest>,
    ) -> Result<(), ControllerError> {
        for mut manifest in manifests {
            ctx.check_cancelled()?;
            decorator.decorate(ctx.client(), &mut manifest).await?;
            callbacks::pre_apply(ctx, &mut manifest).await?;

            let desired = manifest.to_dynamic()?;
            let contract = ReadinessContract::for_object(&desired)?;
            let applied = crud::apply(ctx, desired).await?;
            debug!("{} {}: {:?}", manifest.kind(), manifest.name(), applied.outcome);

            if manifest.kind() == "DaemonSet" {
                callbacks::check_image_pull(ctx, &applied.live).await?;
            }
            if contract.waits() {
                poller::wait(ctx, &contract, &applied.live).await?;
            }
        }
        Ok(())
    }

    /// Applies one state template, once per kernel variant when it is
    /// kernel-affine.
    ///
    /// A failing replica does not stop the others so their image pulls and
    /// builds can proceed; the first error is returned at the end.
    pub(super) async fn apply_state(
        &self,
        ctx: &mut ReconcileContext,
        renderer: &Renderer<'_>,
        target: &Target<'_>,
        template: &Template,
        runtime: &RuntimeInformation,
    ) -> Result<(), ControllerError> {
        let mut first_error = None;
        for replica in fanout::replicas(template, runtime)? {
            let manifests = renderer.render_state(template, &replica.runtime)?;
            let decorator = target.decorator(&replica.runtime);
            match self.apply_manifests(ctx, &decorator, manifests).await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    if let Some(kernel) = &replica.kernel {
                        warn!("{} failed for kernel {}: {}", template.name, kernel, e);
                    }
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Applies every no-state template together
    pub(super) async fn apply_no_state(
        &self,
        ctx: &mut ReconcileContext,
        renderer: &Renderer<'_>,
        target: &Target<'_>,
        runtime: &RuntimeInformation,
    ) -> Result<(), ControllerError> {
        let manifests = renderer.render_no_state(runtime)?;
        if manifests.is_empty() {
            return Ok(());
        }
        self.apply_manifests(ctx, &target.decorator(runtime), manifests).await
    }
}
