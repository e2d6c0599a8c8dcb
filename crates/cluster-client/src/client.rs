//! Kubernetes API client
//!
//! Implements `ClusterClientTrait` on top of a `kube::Client`. Kinds are
//! resolved to API resources through a cached discovery run which is
//! refreshed on demand (a CRD installed by a chart is picked up after
//! `refresh_discovery`).

use crate::cluster_trait::ClusterClientTrait;
use crate::error::ClusterError;
use crate::object::{gvk_of, ApiResourceInfo};
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, LogParams, Patch,
    PatchParams, PostParams,
};
use kube::discovery::{verbs, ApiCapabilities, Discovery, Scope};
use kube::Client;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Field manager used for status patches
const FIELD_MANAGER: &str = "special-resource-operator";

/// Kubernetes API client
pub struct ClusterClient {
    client: Client,
    discovery: RwLock<Option<Arc<Discovery>>>,
}

impl std::fmt::Debug for ClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterClient").finish_non_exhaustive()
    }
}

impl ClusterClient {
    /// Create a new cluster client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            discovery: RwLock::new(None),
        }
    }

    /// Create a client from the in-cluster or kubeconfig environment
    pub async fn try_default() -> Result<Self, ClusterError> {
        let client = Client::try_default().await?;
        Ok(Self::new(client))
    }

    /// The underlying kube client
    pub fn kube_client(&self) -> Client {
        self.client.clone()
    }

    async fn discovery(&self) -> Result<Arc<Discovery>, ClusterError> {
        if let Some(discovery) = self.discovery.read().await.as_ref() {
            return Ok(Arc::clone(discovery));
        }
        let mut guard = self.discovery.write().await;
        if let Some(discovery) = guard.as_ref() {
            return Ok(Arc::clone(discovery));
        }
        debug!("Running API discovery");
        let discovery = Arc::new(Discovery::new(self.client.clone()).run().await?);
        *guard = Some(Arc::clone(&discovery));
        Ok(discovery)
    }

    /// Resolves a GVK, refreshing discovery once when the kind is unknown
    async fn resolve(
        &self,
        gvk: &GroupVersionKind,
    ) -> Result<(ApiResource, ApiCapabilities), ClusterError> {
        if let Some(found) = self.discovery().await?.resolve_gvk(gvk) {
            return Ok(found);
        }
        self.refresh_discovery().await?;
        self.discovery().await?.resolve_gvk(gvk).ok_or_else(|| {
            ClusterError::NotFound(format!(
                "no API resource serves {}/{} {}",
                gvk.group, gvk.version, gvk.kind
            ))
        })
    }

    async fn api(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
    ) -> Result<Api<DynamicObject>, ClusterError> {
        let (resource, caps) = self.resolve(gvk).await?;
        Ok(match (caps.scope, namespace) {
            (Scope::Namespaced, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &resource),
            _ => Api::all_with(self.client.clone(), &resource),
        })
    }

    async fn api_for(&self, object: &DynamicObject) -> Result<Api<DynamicObject>, ClusterError> {
        let gvk = gvk_of(object)?;
        self.api(&gvk, object.metadata.namespace.as_deref()).await
    }
}

fn object_name(object: &DynamicObject) -> Result<&str, ClusterError> {
    object
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| ClusterError::Invalid("object has no metadata.name".to_string()))
}

#[async_trait::async_trait]
impl ClusterClientTrait for ClusterClient {
    async fn is_namespaced(&self, gvk: &GroupVersionKind) -> Result<bool, ClusterError> {
        let (_, caps) = self.resolve(gvk).await?;
        Ok(caps.scope == Scope::Namespaced)
    }

    async fn get(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, ClusterError> {
        let api = self.api(gvk, namespace).await?;
        Ok(api.get_opt(name).await?)
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>, ClusterError> {
        let api = self.api(gvk, namespace).await?;
        let mut params = ListParams::default();
        if let Some(selector) = label_selector.filter(|s| !s.is_empty()) {
            params = params.labels(selector);
        }
        let list = api.list(&params).await?;
        Ok(list.items)
    }

    async fn create(&self, object: &DynamicObject) -> Result<DynamicObject, ClusterError> {
        let api = self.api_for(object).await?;
        Ok(api.create(&PostParams::default(), object).await?)
    }

    async fn update(&self, object: &DynamicObject) -> Result<DynamicObject, ClusterError> {
        let api = self.api_for(object).await?;
        let name = object_name(object)?;
        Ok(api.replace(name, &PostParams::default(), object).await?)
    }

    async fn update_status(&self, object: &DynamicObject) -> Result<DynamicObject, ClusterError> {
        let api = self.api_for(object).await?;
        let name = object_name(object)?;
        let status = object
            .data
            .get("status")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let patch = serde_json::json!({ "status": status });
        Ok(api
            .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?)
    }

    async fn delete(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), ClusterError> {
        let api = self.api(gvk, namespace).await?;
        match api.delete(name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(e) => match ClusterError::from(e) {
                ClusterError::NotFound(_) => Ok(()),
                other => Err(other),
            },
        }
    }

    async fn list_nodes(&self, label_selector: Option<&str>) -> Result<Vec<Node>, ClusterError> {
        let api: Api<Node> = Api::all(self.client.clone());
        let mut params = ListParams::default();
        if let Some(selector) = label_selector.filter(|s| !s.is_empty()) {
            params = params.labels(selector);
        }
        Ok(api.list(&params).await?.items)
    }

    async fn update_node(&self, node: &Node) -> Result<Node, ClusterError> {
        let api: Api<Node> = Api::all(self.client.clone());
        let name = node
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| ClusterError::Invalid("node has no metadata.name".to_string()))?;
        Ok(api.replace(name, &PostParams::default(), node).await?)
    }

    async fn pod_logs(&self, namespace: &str, name: &str) -> Result<String, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.logs(name, &LogParams::default()).await?)
    }

    async fn api_resources(&self) -> Result<Vec<ApiResourceInfo>, ClusterError> {
        let discovery = self.discovery().await?;
        let mut resources = Vec::new();
        for group in discovery.groups() {
            for (resource, caps) in group.recommended_resources() {
                resources.push(ApiResourceInfo {
                    gvk: GroupVersionKind::gvk(&resource.group, &resource.version, &resource.kind),
                    plural: resource.plural.clone(),
                    namespaced: caps.scope == Scope::Namespaced,
                    listable: caps.supports_operation(verbs::LIST),
                    deletable: caps.supports_operation(verbs::DELETE),
                });
            }
        }
        Ok(resources)
    }

    async fn refresh_discovery(&self) -> Result<(), ClusterError> {
        *self.discovery.write().await = None;
        Ok(())
    }

    async fn server_groups(&self) -> Result<Vec<String>, ClusterError> {
        let groups = self.client.list_api_groups().await?;
        Ok(groups.groups.into_iter().map(|g| g.name).collect())
    }
}
