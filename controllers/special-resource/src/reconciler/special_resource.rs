//! SpecialResource reconciliation

use super::apply::Target;
use super::{ensure_namespace, owner_reference, Reconciler};
use crate::chart::fanout::Renderer;
use crate::chart::parse_documents;
use crate::chart::source::apply_configmap_override;
use crate::context::ReconcileContext;
use crate::crud;
use crate::dependency::{self, PlanStep};
use crate::error::ControllerError;
use crate::finalizer;
use crate::manifest::Manifest;
use crate::runtime_info;
use crate::stage::{self, StageLabel, STAGE_READY};
use crate::status::{self, OperatorHealth};
use crds::SpecialResource;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

impl Reconciler {
    /// Reconciles a SpecialResource, its dependencies first.
    ///
    /// A dependency missing from the cluster is created from its bundled
    /// recipe and the reconcile is requeued without touching the parent.
    #[instrument(skip_all, fields(sr = %sr.name_any()))]
    pub async fn reconcile_special_resource(&self, sr: &SpecialResource) -> Result<(), ControllerError> {
        let name = sr.name_any();
        let special_resources = self.special_resources().await?;
        let Some(current) = special_resources.get(&name).cloned() else {
            debug!("SpecialResource {} is gone", name);
            return Ok(());
        };
        if current.is_deleted() {
            return self.reconcile_one(current).await.map_err(|e| e.in_reconcile(&name));
        }

        let steps = match dependency::plan(&name, &special_resources) {
            Ok(steps) => steps,
            Err(e) => return self.report_blocked(current, e.in_reconcile(&name)).await,
        };
        for step in steps {
            match step {
                PlanStep::Recipe(missing) => {
                    if let Err(e) = self.install_recipe(&missing).await {
                        return self.report_blocked(current, e.in_reconcile(&name)).await;
                    }
                    return Err(ControllerError::Requeue(format!(
                        "dependency {} created from its recipe",
                        missing
                    )));
                }
                PlanStep::Reconcile(next) if next == name => {
                    return self.reconcile_one(current).await.map_err(|e| e.in_reconcile(&name));
                }
                PlanStep::Reconcile(next) => {
                    let Some(dependency) = special_resources.get(&next).cloned() else {
                        continue;
                    };
                    info!("Reconciling dependency {} of {}", next, name);
                    self.reconcile_one(dependency).await.map_err(|e| e.in_reconcile(&next))?;
                }
            }
        }
        Ok(())
    }

    /// Surfaces an error that prevents the SR from being reconciled at all
    async fn report_blocked(&self, mut sr: SpecialResource, err: ControllerError) -> Result<(), ControllerError> {
        let outcome = Err(err);
        if let Err(e) = status::record_outcome(self.client.as_ref(), &mut sr, &outcome).await {
            warn!("Could not record the status of {}: {}", sr.name_any(), e);
        }
        outcome
    }

    /// Applies the bundled recipe of a dependency absent from the cluster
    async fn install_recipe(&self, dependency: &str) -> Result<(), ControllerError> {
        let files = self.recipes.recipe(dependency).await?;
        let mut ctx = self.context(&BTreeMap::new());
        for (file, text) in files {
            let documents = parse_documents(&text).map_err(|e| e.in_state(&file))?;
            for document in documents {
                let manifest = Manifest::from_value(document).map_err(|e| e.in_state(&file))?;
                crud::apply(&mut ctx, manifest.to_dynamic()?)
                    .await
                    .map_err(|e| e.in_state(&file))?;
            }
        }
        info!("Created dependency {} from its recipe", dependency);
        Ok(())
    }

    /// Reconciles one SR, ignoring its dependencies, and reports the outcome
    async fn reconcile_one(&self, mut sr: SpecialResource) -> Result<(), ControllerError> {
        let mut ctx = self.context(&sr.spec.node_selector);
        if sr.is_deleted() {
            return finalizer::finalize_special_resource(&mut ctx, &mut sr).await;
        }

        let outcome = self.converge(&mut ctx, &mut sr).await;
        self.keep_update_vendor(&ctx);

        if let Err(e) = status::record_outcome(self.client.as_ref(), &mut sr, &outcome).await {
            warn!("Could not record the status of {}: {}", sr.name_any(), e);
        }
        let message = match &outcome {
            Ok(()) => format!("SpecialResource {} reconciled", sr.name_any()),
            Err(e) => e.to_string(),
        };
        status::report_cluster_operator(
            self.client.as_ref(),
            OperatorHealth::from_outcome(&outcome),
            &self.config.operator_namespace,
            &self.config.release_version,
            &message,
        )
        .await;
        outcome
    }

    /// Drives the SR's chart onto the cluster, state by state
    async fn converge(&self, ctx: &mut ReconcileContext, sr: &mut SpecialResource) -> Result<(), ControllerError> {
        let client = Arc::clone(&self.client);
        let name = sr.name_any();
        let namespace = sr.target_namespace();

        finalizer::add(client.as_ref(), sr).await?;
        let owner = owner_reference(&*sr)?;
        ensure_namespace(ctx, &namespace, &owner).await?;

        let runtime = runtime_info::gather(
            ctx,
            Some(self.registry.as_ref()),
            &namespace,
            serde_json::to_value(&*sr)?,
        )
        .await?;

        let mut chart = self.charts.load(&sr.spec.chart).await?;
        apply_configmap_override(client.as_ref(), &mut chart, &namespace, &name).await?;
        let set = sr.spec.set.clone();
        let node_selector = sr.spec.node_selector.clone();
        let renderer = Renderer::new(&chart, &name, &namespace, set.as_ref());
        let target = Target {
            release_name: &name,
            namespace: &namespace,
            owner: Some(&owner),
            node_selector: &node_selector,
        };

        for template in chart.state_templates() {
            ctx.check_cancelled()?;
            status::record_state(client.as_ref(), sr, template.stem()).await?;
            if let Err(e) = self.apply_state(ctx, &renderer, &target, template, &runtime).await {
                if matches!(e.root(), ControllerError::PollTimeout { .. }) {
                    if let Err(status_err) = status::record_stalled_state(client.as_ref(), sr, template.stem()).await {
                        warn!("Could not record the stalled state of {}: {}", name, status_err);
                    }
                }
                return Err(e.in_state(&template.name));
            }
            if let Some(label) = StageLabel::for_template(&name, &template.name) {
                stage::stamp(ctx, &label).await.map_err(|e| e.in_state(&template.name))?;
            }
            debug!("State {} of {} ready", template.name, name);
        }

        self.apply_no_state(ctx, &renderer, &target, &runtime).await?;
        status::record_state(client.as_ref(), sr, STAGE_READY).await
    }
}
