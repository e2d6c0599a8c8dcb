//! ClusterClient trait for mocking
//!
//! This trait abstracts the Kubernetes API to the handful of operations the
//! controllers need. Objects travel as `DynamicObject` so charts may render
//! arbitrary kinds; nodes and pod logs get dedicated calls.

use crate::error::ClusterError;
use crate::object::ApiResourceInfo;
use k8s_openapi::api::core::v1::Node;
use kube::api::{DynamicObject, GroupVersionKind};

/// Trait for Kubernetes API operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ClusterClientTrait: Send + Sync {
    /// Whether objects of this kind live in a namespace
    async fn is_namespaced(&self, gvk: &GroupVersionKind) -> Result<bool, ClusterError>;

    /// Fetches one object, `None` when it does not exist
    async fn get(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, ClusterError>;

    /// Lists objects, optionally restricted to a namespace and a label selector
    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>, ClusterError>;

    /// Creates an object
    async fn create(&self, object: &DynamicObject) -> Result<DynamicObject, ClusterError>;

    /// Replaces an object; `metadata.resourceVersion` must be current when set
    async fn update(&self, object: &DynamicObject) -> Result<DynamicObject, ClusterError>;

    /// Writes the `status` subresource of an object
    async fn update_status(&self, object: &DynamicObject) -> Result<DynamicObject, ClusterError>;

    /// Deletes an object; deleting a missing object succeeds
    async fn delete(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), ClusterError>;

    /// Lists nodes matching a label selector
    async fn list_nodes(&self, label_selector: Option<&str>) -> Result<Vec<Node>, ClusterError>;

    /// Replaces a node
    async fn update_node(&self, node: &Node) -> Result<Node, ClusterError>;

    /// Full log of the first container of a pod
    async fn pod_logs(&self, namespace: &str, name: &str) -> Result<String, ClusterError>;

    /// Every API resource served by the cluster
    async fn api_resources(&self) -> Result<Vec<ApiResourceInfo>, ClusterError>;

    /// Drops cached discovery data (e.g. after installing a CRD)
    async fn refresh_discovery(&self) -> Result<(), ClusterError>;

    /// Names of the API groups served by the cluster
    async fn server_groups(&self) -> Result<Vec<String>, ClusterError>;
}
