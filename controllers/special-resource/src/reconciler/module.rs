//! SpecialResourceModule reconciliation
//!
//! A module renders its chart once per completed cluster version, using
//! the kernel and toolkit shipped by that version's release payload, so
//! driver containers exist before an upgrade rolls nodes onto the new
//! kernel.

use super::apply::Target;
use super::{ensure_namespace, owner_reference, Reconciler};
use crate::chart::fanout::Renderer;
use crate::chart::source::apply_configmap_override;
use crate::chart::Chart;
use crate::context::ReconcileContext;
use crate::error::ControllerError;
use crate::finalizer;
use crate::preflight::ResolverCache;
use crate::runtime_info::cluster::ClusterVersionInfo;
use crate::runtime_info::{self, RuntimeInformation};
use cluster_client::{from_dynamic, gvk_for, to_dynamic};
use crds::{SpecialResourceModule, SpecialResourceModuleStatus, SpecialResourceModuleVersionStatus};
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

impl Reconciler {
    /// Reconciles a SpecialResourceModule: watches first, then one
    /// rendering per completed cluster version
    #[instrument(skip_all, fields(module = %module.name_any()))]
    pub async fn reconcile_module(&self, module: &SpecialResourceModule) -> Result<(), ControllerError> {
        let name = module.name_any();
        let stored = self
            .client
            .get(&gvk_for::<SpecialResourceModule>(), None, &name)
            .await
            .map_err(|e| ControllerError::cluster("SpecialResourceModule", &name, e))?;
        let Some(stored) = stored else {
            debug!("SpecialResourceModule {} is gone", name);
            self.watches.unregister(&name)?;
            return Ok(());
        };
        let mut module: SpecialResourceModule = from_dynamic(stored)?;

        let mut ctx = self.context(&module.spec.selector);
        if module.metadata.deletion_timestamp.is_some() {
            return self.finalize_module(&mut ctx, &mut module).await;
        }
        let outcome = self.converge_module(&mut ctx, &mut module).await;
        self.keep_update_vendor(&ctx);
        outcome
    }

    async fn finalize_module(
        &self,
        ctx: &mut ReconcileContext,
        module: &mut SpecialResourceModule,
    ) -> Result<(), ControllerError> {
        let name = module.name_any();
        self.watches.unregister(&name)?;
        if !finalizer::has_finalizer(&*module) {
            return Ok(());
        }
        info!("Finalizing SpecialResourceModule {}", name);
        if let Some(uid) = module.uid() {
            let swept = finalizer::sweep(ctx, &module.target_namespace(), &uid).await?;
            if swept > 0 {
                info!("Swept {} object(s) owned by {}", swept, name);
            }
        }
        finalizer::remove(self.client.as_ref(), module).await
    }

    async fn converge_module(
        &self,
        ctx: &mut ReconcileContext,
        module: &mut SpecialResourceModule,
    ) -> Result<(), ControllerError> {
        let client = Arc::clone(&self.client);
        let name = module.name_any();
        let namespace = module.target_namespace();

        finalizer::add(client.as_ref(), module).await?;
        self.watches.register(&name, &module.spec.watch)?;

        let cluster = ClusterVersionInfo::from_cluster(client.as_ref()).await?;
        let versions = cluster.completed();
        if versions.is_empty() {
            warn!("No completed cluster version yet, nothing to render for {}", name);
            return Ok(());
        }

        let owner = owner_reference(&*module)?;
        ensure_namespace(ctx, &namespace, &owner).await?;
        let base = runtime_info::gather(
            ctx,
            Some(self.registry.as_ref()),
            &namespace,
            serde_json::to_value(&*module)?,
        )
        .await?;

        let mut chart = self.charts.load(&module.spec.chart).await?;
        apply_configmap_override(client.as_ref(), &mut chart, &namespace, &name).await?;
        let set = module.spec.set.clone();
        let node_selector = module.spec.selector.clone();
        let renderer = Renderer::new(&chart, &name, &namespace, set.as_ref());
        let target = Target {
            release_name: &name,
            namespace: &namespace,
            owner: Some(&owner),
            node_selector: &node_selector,
        };

        let mut resolver = ResolverCache::new(self.releases.as_ref());
        let mut progress = BTreeMap::new();
        let mut outcome = Ok(());
        for history in versions {
            let mut version_status = SpecialResourceModuleVersionStatus::default();
            let result = async {
                let release = resolver.resolve(&history.image).await?;
                let runtime = release.runtime(&base)?;
                self.apply_version(ctx, &renderer, &target, &chart, &runtime, &mut version_status)
                    .await
            }
            .await;
            version_status.complete = result.is_ok();
            progress.insert(history.version.clone(), version_status);
            if let Err(e) = result {
                warn!("Cluster version {} of {} not reconciled: {}", history.version, name, e);
                outcome = Err(e);
                break;
            }
            debug!("Cluster version {} of {} reconciled", history.version, name);
        }

        self.record_module_progress(module, progress).await?;
        outcome
    }

    /// Applies the chart for one cluster version, noting each state
    /// template as it completes
    async fn apply_version(
        &self,
        ctx: &mut ReconcileContext,
        renderer: &Renderer<'_>,
        target: &Target<'_>,
        chart: &Chart,
        runtime: &RuntimeInformation,
        status: &mut SpecialResourceModuleVersionStatus,
    ) -> Result<(), ControllerError> {
        for template in chart.state_templates() {
            ctx.check_cancelled()?;
            self.apply_state(ctx, renderer, target, template, runtime)
                .await
                .map_err(|e| e.in_state(&template.name))?;
            status.reconciled_templates.push(template.name.clone());
        }
        self.apply_no_state(ctx, renderer, target, runtime).await
    }

    async fn record_module_progress(
        &self,
        module: &mut SpecialResourceModule,
        versions: BTreeMap<String, SpecialResourceModuleVersionStatus>,
    ) -> Result<(), ControllerError> {
        let status = SpecialResourceModuleStatus { versions };
        if module.status.as_ref() == Some(&status) {
            return Ok(());
        }
        module.status = Some(status);
        let name = module.name_any();
        let object = to_dynamic(&*module).map_err(|e| ControllerError::cluster("SpecialResourceModule", &name, e))?;
        let stored = self
            .client
            .update_status(&object)
            .await
            .map_err(|e| ControllerError::cluster("SpecialResourceModule", &name, e))?;
        module.metadata.resource_version = stored.metadata.resource_version;
        Ok(())
    }
}
