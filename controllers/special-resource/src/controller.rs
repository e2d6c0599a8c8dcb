//! Main controller implementation.
//!
//! Wires the API clients, chart and recipe sources and the reconciler
//! together and runs one watcher per custom resource kind plus the
//! dynamic watch spawner until one of them stops.

use crate::chart::source::LocalChartSource;
use crate::config::OperatorConfig;
use crate::dynamic_watch::DynamicWatches;
use crate::error::ControllerError;
use crate::preflight::release::RegistryReleaseResolver;
use crate::reconciler::Reconciler;
use crate::recipes::DirectoryRecipes;
use crate::watcher::Watcher;
use base64::Engine;
use cluster_client::{gvk_from, ClusterClient, ClusterClientTrait};
use kube::Client;
use registry_client::{RegistryClient, RegistryClientTrait};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Namespace and name of the cluster-wide pull secret
const PULL_SECRET: (&str, &str) = ("openshift-config", "pull-secret");

/// Main controller for SpecialResources and their companions
pub struct Controller {
    reconciler: Arc<Reconciler>,
    special_resource_watcher: JoinHandle<Result<(), ControllerError>>,
    module_watcher: JoinHandle<Result<(), ControllerError>>,
    preflight_watcher: JoinHandle<Result<(), ControllerError>>,
    dynamic_watcher: JoinHandle<Result<(), ControllerError>>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller").finish_non_exhaustive()
    }
}

/// Registry credentials from the cluster pull secret, when there is one
async fn pull_secret(client: &dyn ClusterClientTrait) -> Option<Vec<u8>> {
    let (namespace, name) = PULL_SECRET;
    let secret = match client.get(&gvk_from("v1", "Secret"), Some(namespace), name).await {
        Ok(secret) => secret?,
        Err(e) => {
            debug!("Cannot read {}/{}: {}", namespace, name, e);
            return None;
        }
    };
    let encoded = secret.data.pointer("/data/.dockerconfigjson")?.as_str()?;
    match base64::engine::general_purpose::STANDARD.decode(encoded) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            warn!("Ignoring malformed {}/{}: {}", namespace, name, e);
            None
        }
    }
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: OperatorConfig) -> Result<Self, ControllerError> {
        info!("Initializing Special Resource Operator");

        let kube_client = Client::try_default()
            .await
            .map_err(|e| ControllerError::Api(e.into()))?;
        let cluster: Arc<dyn ClusterClientTrait> = Arc::new(ClusterClient::new(kube_client.clone()));

        let mut registry = RegistryClient::new(config.registry_insecure)?;
        if let Some(credentials) = pull_secret(cluster.as_ref()).await {
            registry = registry.with_pull_secret(&credentials)?;
            info!("Using the cluster pull secret for registry access");
        }
        let registry: Arc<dyn RegistryClientTrait> = Arc::new(registry);

        let (new_resources_tx, new_resources_rx) = futures::channel::mpsc::unbounded();
        let (requeue_tx, requeue_rx) = futures::channel::mpsc::unbounded();
        let watches = Arc::new(DynamicWatches::connected(new_resources_tx, requeue_tx));

        let reconciler = Arc::new(Reconciler::new(
            cluster,
            Arc::clone(&registry),
            Arc::new(config.clone()),
            Arc::new(LocalChartSource::new(&config.charts_dir)),
            Arc::new(DirectoryRecipes::new(&config.recipes_dir)),
            Arc::new(RegistryReleaseResolver::new(registry)),
            Arc::clone(&watches),
        ));

        let watcher = Arc::new(Watcher::new(Arc::clone(&reconciler), kube_client));

        let special_resource_watcher = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.watch_special_resources().await })
        };
        let module_watcher = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.watch_modules(requeue_rx).await })
        };
        let preflight_watcher = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.watch_preflight_validations().await })
        };
        let dynamic_watcher = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.watch_dynamic(watches, new_resources_rx).await })
        };

        Ok(Self {
            reconciler,
            special_resource_watcher,
            module_watcher,
            preflight_watcher,
            dynamic_watcher,
        })
    }

    /// Runs the controller until a watcher stops or the process is interrupted.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Special Resource Operator running");

        tokio::select! {
            result = &mut self.special_resource_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("SpecialResource watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("SpecialResource watcher error: {}", e)))?;
            }
            result = &mut self.module_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("SpecialResourceModule watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("SpecialResourceModule watcher error: {}", e)))?;
            }
            result = &mut self.preflight_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("PreflightValidation watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("PreflightValidation watcher error: {}", e)))?;
            }
            result = &mut self.dynamic_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Dynamic watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("Dynamic watcher error: {}", e)))?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, cancelling reconciles in flight");
                self.reconciler.shutdown();
            }
        }

        Ok(())
    }
}
