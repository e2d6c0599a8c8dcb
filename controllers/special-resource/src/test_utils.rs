//! Test utilities for unit testing reconcilers
//!
//! This module provides helpers for creating test data and setting up test scenarios.

#[cfg(test)]
use crate::annotations::{KERNEL_VERSION_LABEL, OS_RELEASE_ID_LABEL, OS_RELEASE_MAJOR_LABEL, OS_RELEASE_MINOR_LABEL};
#[cfg(test)]
use crate::chart::source::ChartSource;
#[cfg(test)]
use crate::chart::{Chart, Template};
#[cfg(test)]
use crate::config::OperatorConfig;
#[cfg(test)]
use crate::context::ReconcileContext;
#[cfg(test)]
use crate::dynamic_watch::DynamicWatches;
#[cfg(test)]
use crate::error::ControllerError;
#[cfg(test)]
use crate::preflight::{ReleaseInfo, ReleaseResolver};
#[cfg(test)]
use crate::reconciler::Reconciler;
#[cfg(test)]
use crate::recipes::RecipeSource;
#[cfg(test)]
use cluster_client::MockClusterClient;
#[cfg(test)]
use crds::{HelmChart, SpecialResource, SpecialResourceDependency, SpecialResourceSpec};
#[cfg(test)]
use k8s_openapi::api::core::v1::{Node, NodeSpec, NodeStatus, NodeSystemInfo, Taint};
#[cfg(test)]
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
#[cfg(test)]
use registry_client::{MockRegistryClient, RegistryError};
#[cfg(test)]
use std::collections::{BTreeMap, HashMap};
#[cfg(test)]
use std::sync::{Arc, Mutex};
#[cfg(test)]
use std::time::Duration;
#[cfg(test)]
use tokio_util::sync::CancellationToken;

/// Configuration with a fast readiness poll
#[cfg(test)]
pub fn test_config() -> OperatorConfig {
    OperatorConfig {
        poll_interval: Duration::from_millis(5),
        poll_timeout: Duration::from_millis(50),
        preflight_requeue: Duration::from_millis(50),
        ..Default::default()
    }
}

/// Reconcile context over the mock cluster
#[cfg(test)]
pub fn test_context(client: &MockClusterClient, node_selector: &BTreeMap<String, String>) -> ReconcileContext {
    ReconcileContext::new(
        Arc::new(client.clone()),
        Arc::new(test_config()),
        CancellationToken::new(),
        None,
        node_selector,
    )
}

/// Helper to create a worker node as labelled by node-feature-discovery
#[cfg(test)]
pub fn test_node(name: &str, kernel: &str, os: (&str, &str, &str), labels: &[(&str, &str)]) -> Node {
    let (release, major, minor) = os;
    let mut all_labels = BTreeMap::from([
        (KERNEL_VERSION_LABEL.to_string(), kernel.to_string()),
        (OS_RELEASE_ID_LABEL.to_string(), release.to_string()),
        (OS_RELEASE_MAJOR_LABEL.to_string(), major.to_string()),
        (OS_RELEASE_MINOR_LABEL.to_string(), minor.to_string()),
    ]);
    for (key, value) in labels {
        all_labels.insert((*key).to_string(), (*value).to_string());
    }
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(all_labels),
            ..Default::default()
        },
        spec: Some(NodeSpec::default()),
        status: Some(NodeStatus {
            node_info: Some(NodeSystemInfo {
                kernel_version: kernel.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
    }
}

/// Adds a taint with the given effect
#[cfg(test)]
pub fn tainted(mut node: Node, effect: &str) -> Node {
    node.spec
        .get_or_insert_with(Default::default)
        .taints
        .get_or_insert_with(Vec::new)
        .push(Taint {
            key: "node.example.com/maintenance".to_string(),
            effect: effect.to_string(),
            ..Default::default()
        });
    node
}

/// Stores a ClusterVersion whose history holds one completed update
#[cfg(test)]
pub fn add_cluster_version(client: &MockClusterClient, version: &str, image: &str) {
    let object = serde_json::from_value(serde_json::json!({
        "apiVersion": "config.openshift.io/v1",
        "kind": "ClusterVersion",
        "metadata": {"name": "version"},
        "status": {
            "history": [{"state": "Completed", "version": version, "image": image}]
        }
    }))
    .expect("valid ClusterVersion");
    client.add_object(object);
}

/// Helper to create a test SpecialResource rendering the chart of the same name
#[cfg(test)]
pub fn test_sr(name: &str, depends_on: &[&str]) -> SpecialResource {
    SpecialResource::new(
        name,
        SpecialResourceSpec {
            chart: HelmChart {
                name: name.to_string(),
                version: "0.0.1".to_string(),
                ..Default::default()
            },
            depends_on: depends_on
                .iter()
                .map(|dep| SpecialResourceDependency {
                    name: (*dep).to_string(),
                    image_reference: None,
                })
                .collect(),
            ..Default::default()
        },
    )
}

/// Chart named `name` made of `(file, text)` templates
#[cfg(test)]
pub fn test_chart(name: &str, templates: &[(&str, &str)]) -> Chart {
    Chart {
        name: name.to_string(),
        version: "0.0.1".to_string(),
        values: serde_json::json!({}),
        templates: templates.iter().map(|(file, text)| Template::new(*file, *text)).collect(),
    }
}

/// Charts served from memory by name
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct StaticCharts {
    charts: Arc<Mutex<HashMap<String, Chart>>>,
}

#[cfg(test)]
impl StaticCharts {
    pub fn insert(&self, chart: Chart) {
        self.charts.lock().unwrap().insert(chart.name.clone(), chart);
    }
}

#[cfg(test)]
#[async_trait::async_trait]
impl ChartSource for StaticCharts {
    async fn load(&self, reference: &HelmChart) -> Result<Chart, ControllerError> {
        self.charts
            .lock()
            .unwrap()
            .get(&reference.name)
            .cloned()
            .ok_or_else(|| ControllerError::Chart(format!("chart {} not found", reference.name)))
    }
}

/// Recipes served from memory by name
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct StaticRecipes {
    recipes: Arc<Mutex<HashMap<String, Vec<(String, String)>>>>,
}

#[cfg(test)]
impl StaticRecipes {
    pub fn insert(&self, name: &str, files: &[(&str, &str)]) {
        self.recipes.lock().unwrap().insert(
            name.to_string(),
            files.iter().map(|(f, t)| ((*f).to_string(), (*t).to_string())).collect(),
        );
    }
}

#[cfg(test)]
#[async_trait::async_trait]
impl RecipeSource for StaticRecipes {
    async fn recipe(&self, name: &str) -> Result<Vec<(String, String)>, ControllerError> {
        self.recipes
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| ControllerError::RecipeMissing(name.to_string()))
    }
}

/// Release payloads resolved from memory, counting lookups
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct StaticReleases {
    releases: Arc<Mutex<HashMap<String, ReleaseInfo>>>,
    lookups: Arc<Mutex<usize>>,
}

#[cfg(test)]
impl StaticReleases {
    pub fn insert(&self, image: &str, release: ReleaseInfo) {
        self.releases.lock().unwrap().insert(image.to_string(), release);
    }

    pub fn lookups(&self) -> usize {
        *self.lookups.lock().unwrap()
    }
}

#[cfg(test)]
#[async_trait::async_trait]
impl ReleaseResolver for StaticReleases {
    async fn resolve(&self, release_image: &str) -> Result<ReleaseInfo, ControllerError> {
        *self.lookups.lock().unwrap() += 1;
        self.releases
            .lock()
            .unwrap()
            .get(release_image)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(release_image.to_string()).into())
    }
}

/// Mocks and in-memory sources behind a test reconciler
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct TestCluster {
    pub client: MockClusterClient,
    pub registry: MockRegistryClient,
    pub charts: StaticCharts,
    pub recipes: StaticRecipes,
    pub releases: StaticReleases,
    pub watches: Arc<DynamicWatches>,
}

#[cfg(test)]
impl TestCluster {
    /// Reconciler wired to this cluster
    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            Arc::new(self.client.clone()),
            Arc::new(self.registry.clone()),
            Arc::new(test_config()),
            Arc::new(self.charts.clone()),
            Arc::new(self.recipes.clone()),
            Arc::new(self.releases.clone()),
            Arc::clone(&self.watches),
        )
    }
}
