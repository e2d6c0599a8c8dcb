//! Kernel-affine fan-out
//!
//! A state template referencing the kernel version is rendered once per
//! kernel present in the cluster, each time with the runtime information
//! of that kernel. Other templates are rendered once.

use super::engine::{self, Release};
use super::order::sort_for_install;
use super::values::compose;
use super::{parse_documents, Chart, Template};
use crate::error::ControllerError;
use crate::manifest::Manifest;
use crate::runtime_info::RuntimeInformation;
use tracing::debug;

/// Runtime information for one rendering of a state template
#[derive(Debug, Clone)]
pub struct Replica {
    /// Kernel the replica targets, `None` when the template is not kernel-affine
    pub kernel: Option<String>,
    /// Runtime information the replica renders with
    pub runtime: RuntimeInformation,
}

/// Replicas of a state template.
///
/// A kernel-affine template on a cluster without kernel information is
/// an error rather than a silent no-op.
pub fn replicas(template: &Template, runtime: &RuntimeInformation) -> Result<Vec<Replica>, ControllerError> {
    if !template.is_kernel_affine() {
        return Ok(vec![Replica {
            kernel: None,
            runtime: runtime.clone(),
        }]);
    }
    if runtime.cluster_upgrade_info.is_empty() {
        return Err(ControllerError::NoKernelDetected);
    }
    runtime
        .cluster_upgrade_info
        .iter()
        .map(|(kernel, node_version)| {
            Ok(Replica {
                kernel: Some(kernel.clone()),
                runtime: runtime.for_kernel(kernel, node_version)?,
            })
        })
        .collect()
}

/// Renders one chart for one owner
#[derive(Debug)]
pub struct Renderer<'a> {
    chart: &'a Chart,
    release: Release<'a>,
    /// Chart defaults with the owner's `set` tree merged on top
    base_values: serde_json::Value,
}

impl<'a> Renderer<'a> {
    /// Renderer for `chart` released as `release_name` into `namespace`
    pub fn new(
        chart: &'a Chart,
        release_name: &'a str,
        namespace: &'a str,
        set: Option<&serde_json::Value>,
    ) -> Self {
        let base_values = compose([&chart.values, set.unwrap_or(&serde_json::Value::Null)]);
        Self {
            chart,
            release: Release {
                name: release_name,
                namespace,
                chart_name: &chart.name,
                chart_version: &chart.version,
            },
            base_values,
        }
    }

    fn context(&self, runtime: &RuntimeInformation) -> Result<serde_json::Value, ControllerError> {
        let values = compose([&self.base_values, &runtime.to_values()?]);
        Ok(self.release.context(&values))
    }

    fn manifests(rendered: Vec<(String, String)>) -> Result<Vec<Manifest>, ControllerError> {
        let mut manifests = Vec::new();
        for (name, text) in rendered {
            for document in parse_documents(&text).map_err(|e| ControllerError::Chart(format!("{}: {}", name, e)))? {
                manifests.push(Manifest::from_value(document)?);
            }
        }
        sort_for_install(&mut manifests);
        Ok(manifests)
    }

    /// Objects of one state template, with the no-state templates available for inclusion
    pub fn render_state(&self, template: &Template, runtime: &RuntimeInformation) -> Result<Vec<Manifest>, ControllerError> {
        let includes = self.chart.no_state_templates();
        let rendered = engine::render(&[template], &includes, &self.context(runtime)?)?;
        let manifests = Self::manifests(rendered)?;
        debug!("{} rendered {} object(s)", template.name, manifests.len());
        Ok(manifests)
    }

    /// Objects of every no-state template together
    pub fn render_no_state(&self, runtime: &RuntimeInformation) -> Result<Vec<Manifest>, ControllerError> {
        let includes = self.chart.no_state_templates();
        let targets: Vec<&Template> = includes.iter().copied().filter(|t| t.renders_objects()).collect();
        if targets.is_empty() {
            return Ok(Vec::new());
        }
        Self::manifests(engine::render(&targets, &includes, &self.context(runtime)?)?)
    }

    /// Every object of the chart for one runtime, kernel-affine state
    /// templates fanned out. Used where nothing is applied.
    pub fn render_all(&self, runtime: &RuntimeInformation) -> Result<Vec<Manifest>, ControllerError> {
        let mut manifests = Vec::new();
        for template in self.chart.state_templates() {
            for replica in replicas(template, runtime)? {
                manifests.extend(self.render_state(template, &replica.runtime)?);
            }
        }
        manifests.extend(self.render_no_state(runtime)?);
        Ok(manifests)
    }
}
