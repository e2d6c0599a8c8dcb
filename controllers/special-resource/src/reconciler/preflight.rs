//! PreflightValidation reconciliation

use super::Reconciler;
use crate::chart::fanout::Renderer;
use crate::chart::source::apply_configmap_override;
use crate::error::ControllerError;
use crate::preflight::verify::{self, Verdict};
use crate::preflight::ResolverCache;
use crate::runtime_info;
use cluster_client::to_dynamic;
use crds::{PreflightValidation, SpecialResource, VerificationStatus};
use kube::ResourceExt;
use std::time::Duration;
use tracing::{debug, info, instrument};

impl Reconciler {
    /// Verifies every SpecialResource against the PreflightValidation's
    /// update image.
    ///
    /// SRs already verified are skipped without rendering or registry
    /// reads. Returns the delay before the next attempt, `None` once
    /// everything is verified.
    #[instrument(skip_all, fields(pv = %pv.name_any()))]
    pub async fn reconcile_preflight(&self, pv: &PreflightValidation) -> Result<Option<Duration>, ControllerError> {
        let mut pv = pv.clone();
        let mut status = pv.status.clone().unwrap_or_default();
        let special_resources = self.special_resources().await?;
        let mut resolver = ResolverCache::new(self.releases.as_ref());

        let mut pending = 0;
        for (name, sr) in &special_resources {
            if sr.is_deleted() || status.is_verified(name) {
                continue;
            }
            let verdict = match self.verify_special_resource(&mut resolver, sr, &pv.spec.update_image).await {
                Ok(verdict) => verdict,
                Err(e) => Verdict {
                    status: VerificationStatus::Error,
                    message: e.to_string(),
                },
            };
            if pv.spec.debug {
                info!("{}: {:?} {}", name, verdict.status, verdict.message);
            } else {
                debug!("{}: {:?} {}", name, verdict.status, verdict.message);
            }
            if verdict.status != VerificationStatus::True {
                pending += 1;
            }
            status.set(name, verdict.status, verdict.message);
        }

        if pv.status.as_ref() != Some(&status) {
            pv.status = Some(status);
            let pv_name = pv.name_any();
            let object =
                to_dynamic(&pv).map_err(|e| ControllerError::cluster("PreflightValidation", &pv_name, e))?;
            self.client
                .update_status(&object)
                .await
                .map_err(|e| ControllerError::cluster("PreflightValidation", &pv_name, e))?;
        }

        if pending == 0 {
            info!("All SpecialResources verified for {}", pv.spec.update_image);
            Ok(None)
        } else {
            Ok(Some(self.config.preflight_requeue))
        }
    }

    /// Renders the SR's chart as it would look after the upgrade and checks
    /// its driver containers
    async fn verify_special_resource(
        &self,
        resolver: &mut ResolverCache<'_>,
        sr: &SpecialResource,
        update_image: &str,
    ) -> Result<Verdict, ControllerError> {
        let name = sr.name_any();
        let namespace = sr.target_namespace();
        let release = resolver.resolve(update_image).await?;

        let mut ctx = self.context(&sr.spec.node_selector);
        let current = runtime_info::gather(
            &mut ctx,
            Some(self.registry.as_ref()),
            &namespace,
            serde_json::to_value(sr)?,
        )
        .await?;
        let runtime = release.runtime(&current)?;

        let mut chart = self.charts.load(&sr.spec.chart).await?;
        apply_configmap_override(self.client.as_ref(), &mut chart, &namespace, &name).await?;
        let renderer = Renderer::new(&chart, &name, &namespace, sr.spec.set.as_ref());
        let manifests = renderer.render_all(&runtime)?;

        Ok(verify::verify(
            self.registry.as_ref(),
            &manifests,
            &release.driver_toolkit.kernel_full_version,
        )
        .await)
    }
}
