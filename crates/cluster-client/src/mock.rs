//! Mock ClusterClient for unit testing
//!
//! This module provides an in-memory implementation of `ClusterClientTrait`
//! that can be used in unit tests without a running API server. Every
//! mutating call is recorded so tests can assert that a steady-state
//! reconcile performs no writes.

use crate::cluster_trait::ClusterClientTrait;
use crate::error::ClusterError;
use crate::object::{gvk_of, kind_of, to_dynamic, ApiResourceInfo};
use k8s_openapi::api::core::v1::Node;
use kube::api::{DynamicObject, GroupVersionKind};
use kube::Resource;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Kinds served cluster-wide by the mock unless overridden
const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "Namespace",
    "Node",
    "SpecialResource",
    "SpecialResourceModule",
    "PreflightValidation",
    "ClusterVersion",
    "ClusterOperator",
    "Proxy",
    "CustomResourceDefinition",
    "SecurityContextConstraints",
    "ClusterRole",
    "ClusterRoleBinding",
    "CSIDriver",
    "MutatingWebhookConfiguration",
    "ValidatingWebhookConfiguration",
    "PriorityClass",
    "RuntimeClass",
    "StorageClass",
    "MachineConfig",
];

/// A write performed against the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Object created
    Create { kind: String, namespace: Option<String>, name: String },
    /// Object replaced
    Update { kind: String, namespace: Option<String>, name: String },
    /// Status subresource written
    UpdateStatus { kind: String, namespace: Option<String>, name: String },
    /// Object deleted
    Delete { kind: String, namespace: Option<String>, name: String },
    /// Node replaced
    UpdateNode { name: String },
}

impl Mutation {
    /// Kind touched by the mutation
    pub fn kind(&self) -> &str {
        match self {
            Mutation::Create { kind, .. }
            | Mutation::Update { kind, .. }
            | Mutation::UpdateStatus { kind, .. }
            | Mutation::Delete { kind, .. } => kind,
            Mutation::UpdateNode { .. } => "Node",
        }
    }

    /// Name of the object touched by the mutation
    pub fn name(&self) -> &str {
        match self {
            Mutation::Create { name, .. }
            | Mutation::Update { name, .. }
            | Mutation::UpdateStatus { name, .. }
            | Mutation::Delete { name, .. }
            | Mutation::UpdateNode { name } => name,
        }
    }
}

type ObjectKey = (String, String, Option<String>, String);

/// Mock ClusterClient for testing
///
/// This mock stores objects in memory, keyed by group, kind, namespace and
/// name, and can be configured to return errors for specific scenarios.
#[derive(Clone, Default)]
pub struct MockClusterClient {
    pub(crate) objects: Arc<Mutex<BTreeMap<ObjectKey, DynamicObject>>>,
    pub(crate) nodes: Arc<Mutex<BTreeMap<String, Node>>>,
    pub(crate) logs: Arc<Mutex<HashMap<(String, String), String>>>,
    pub(crate) extra_cluster_scoped: Arc<Mutex<HashSet<String>>>,
    pub(crate) forbidden_kinds: Arc<Mutex<HashSet<String>>>,
    pub(crate) node_conflicts: Arc<Mutex<u32>>,
    pub(crate) hidden_gets: Arc<Mutex<u32>>,
    pub(crate) lingering_kinds: Arc<Mutex<HashSet<String>>>,
    pub(crate) mutations: Arc<Mutex<Vec<Mutation>>>,
    pub(crate) resource_version: Arc<Mutex<u64>>,
    pub(crate) discovery_refreshes: Arc<Mutex<u32>>,
}

impl std::fmt::Debug for MockClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockClusterClient").finish_non_exhaustive()
    }
}

fn key_for(gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) -> ObjectKey {
    (
        gvk.group.clone(),
        gvk.kind.clone(),
        namespace.map(str::to_string),
        name.to_string(),
    )
}

/// Matches `a=b,c!=d,e` style selectors against a label map
pub fn selector_matches(selector: &str, labels: &BTreeMap<String, String>) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| {
            if let Some((k, v)) = term.split_once("!=") {
                labels.get(k.trim()).map(String::as_str) != Some(v.trim())
            } else if let Some((k, v)) = term.split_once("==").or_else(|| term.split_once('=')) {
                labels.get(k.trim()).map(String::as_str) == Some(v.trim())
            } else {
                labels.contains_key(term)
            }
        })
}

impl MockClusterClient {
    /// Create an empty mock cluster
    pub fn new() -> Self {
        Self::default()
    }

    fn cluster_scoped(&self, kind: &str) -> bool {
        CLUSTER_SCOPED_KINDS.contains(&kind)
            || self.extra_cluster_scoped.lock().unwrap().contains(kind)
    }

    fn normalized_namespace<'a>(&self, kind: &str, namespace: Option<&'a str>) -> Option<&'a str> {
        if self.cluster_scoped(kind) {
            None
        } else {
            namespace
        }
    }

    fn next_resource_version(&self) -> String {
        let mut rv = self.resource_version.lock().unwrap();
        *rv += 1;
        rv.to_string()
    }

    fn record(&self, mutation: Mutation) {
        self.mutations.lock().unwrap().push(mutation);
    }

    /// Serve the given kind cluster-wide (for test setup)
    pub fn set_cluster_scoped(&self, kind: &str) {
        self.extra_cluster_scoped.lock().unwrap().insert(kind.to_string());
    }

    /// Insert or replace an object without recording a mutation (for test setup)
    pub fn add_object(&self, mut object: DynamicObject) {
        let Ok(gvk) = gvk_of(&object) else {
            return;
        };
        let name = object.metadata.name.clone().unwrap_or_default();
        let namespace = self
            .normalized_namespace(&gvk.kind, object.metadata.namespace.as_deref())
            .map(str::to_string);
        object.metadata.namespace = namespace.clone();
        if object.metadata.uid.is_none() {
            object.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        }
        object.metadata.resource_version = Some(self.next_resource_version());
        self.objects
            .lock()
            .unwrap()
            .insert(key_for(&gvk, namespace.as_deref(), &name), object);
    }

    /// Insert a typed resource (for test setup)
    pub fn add_typed<K>(&self, object: &K)
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        if let Ok(dynamic) = to_dynamic(object) {
            self.add_object(dynamic);
        }
    }

    /// Insert a node (for test setup)
    pub fn add_node(&self, node: Node) {
        let name = node.metadata.name.clone().unwrap_or_default();
        self.nodes.lock().unwrap().insert(name, node);
    }

    /// Register the log returned for a pod (for test setup)
    pub fn set_pod_log(&self, namespace: &str, name: &str, log: &str) {
        self.logs
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name.to_string()), log.to_string());
    }

    /// Make every create of this kind fail with 403 (for test setup)
    pub fn forbid_kind(&self, kind: &str) {
        self.forbidden_kinds.lock().unwrap().insert(kind.to_string());
    }

    /// Make the next `count` node updates fail with 409 (for test setup)
    pub fn conflict_next_node_updates(&self, count: u32) {
        *self.node_conflicts.lock().unwrap() = count;
    }

    /// Make the next `count` gets miss, as a lagging cache would (for test setup)
    pub fn hide_next_gets(&self, count: u32) {
        *self.hidden_gets.lock().unwrap() = count;
    }

    /// Deleting this kind only marks the object as terminating until
    /// `finish_deletes` runs (for test setup)
    pub fn linger_deletes(&self, kind: &str) {
        self.lingering_kinds.lock().unwrap().insert(kind.to_string());
    }

    /// Removes every object marked as terminating
    pub fn finish_deletes(&self) {
        self.objects
            .lock()
            .unwrap()
            .retain(|_, o| o.metadata.deletion_timestamp.is_none());
    }

    /// All writes recorded so far
    pub fn mutations(&self) -> Vec<Mutation> {
        self.mutations.lock().unwrap().clone()
    }

    /// Forget the recorded writes
    pub fn clear_mutations(&self) {
        self.mutations.lock().unwrap().clear();
    }

    /// Number of discovery refreshes requested
    pub fn discovery_refreshes(&self) -> u32 {
        *self.discovery_refreshes.lock().unwrap()
    }

    /// Stored object by kind, namespace and name (any group)
    pub fn object(&self, kind: &str, namespace: Option<&str>, name: &str) -> Option<DynamicObject> {
        let namespace = self.normalized_namespace(kind, namespace).map(str::to_string);
        self.objects
            .lock()
            .unwrap()
            .iter()
            .find(|((_, k, ns, n), _)| k == kind && *ns == namespace && n == name)
            .map(|(_, o)| o.clone())
    }

    /// Every stored object of a kind (any group)
    pub fn objects_of_kind(&self, kind: &str) -> Vec<DynamicObject> {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((_, k, _, _), _)| k == kind)
            .map(|(_, o)| o.clone())
            .collect()
    }

    /// Stored node by name
    pub fn node(&self, name: &str) -> Option<Node> {
        self.nodes.lock().unwrap().get(name).cloned()
    }

    /// Remove an object without recording a mutation (for test setup)
    pub fn remove_object(&self, kind: &str, namespace: Option<&str>, name: &str) {
        let namespace = self.normalized_namespace(kind, namespace).map(str::to_string);
        self.objects
            .lock()
            .unwrap()
            .retain(|(_, k, ns, n), _| !(k == kind && *ns == namespace && n == name));
    }
}

#[async_trait::async_trait]
impl ClusterClientTrait for MockClusterClient {
    async fn is_namespaced(&self, gvk: &GroupVersionKind) -> Result<bool, ClusterError> {
        Ok(!self.cluster_scoped(&gvk.kind))
    }

    async fn get(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, ClusterError> {
        {
            let mut hidden = self.hidden_gets.lock().unwrap();
            if *hidden > 0 {
                *hidden -= 1;
                return Ok(None);
            }
        }
        let namespace = self.normalized_namespace(&gvk.kind, namespace);
        Ok(self
            .objects
            .lock()
            .unwrap()
            .get(&key_for(gvk, namespace, name))
            .cloned())
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>, ClusterError> {
        let namespace = self.normalized_namespace(&gvk.kind, namespace);
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .iter()
            .filter(|((group, kind, ns, _), _)| {
                *group == gvk.group
                    && *kind == gvk.kind
                    && namespace.is_none_or(|wanted| ns.as_deref() == Some(wanted))
            })
            .filter(|(_, o)| {
                label_selector.is_none_or(|s| {
                    selector_matches(s, o.metadata.labels.as_ref().unwrap_or(&BTreeMap::new()))
                })
            })
            .map(|(_, o)| o.clone())
            .collect())
    }

    async fn create(&self, object: &DynamicObject) -> Result<DynamicObject, ClusterError> {
        let gvk = gvk_of(object)?;
        if self.forbidden_kinds.lock().unwrap().contains(&gvk.kind) {
            return Err(ClusterError::Forbidden(format!(
                "cannot create {} in the mock cluster",
                gvk.kind
            )));
        }
        let name = object
            .metadata
            .name
            .clone()
            .ok_or_else(|| ClusterError::Invalid("object has no metadata.name".to_string()))?;
        let namespace = self
            .normalized_namespace(&gvk.kind, object.metadata.namespace.as_deref())
            .map(str::to_string);
        let key = key_for(&gvk, namespace.as_deref(), &name);
        if self.objects.lock().unwrap().contains_key(&key) {
            return Err(ClusterError::AlreadyExists(format!("{} {}", gvk.kind, name)));
        }
        let mut stored = object.clone();
        stored.metadata.namespace = namespace.clone();
        stored.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        stored.metadata.resource_version = Some(self.next_resource_version());
        self.objects.lock().unwrap().insert(key, stored.clone());
        self.record(Mutation::Create {
            kind: gvk.kind,
            namespace,
            name,
        });
        Ok(stored)
    }

    async fn update(&self, object: &DynamicObject) -> Result<DynamicObject, ClusterError> {
        let gvk = gvk_of(object)?;
        let name = object.metadata.name.clone().unwrap_or_default();
        let namespace = self
            .normalized_namespace(&gvk.kind, object.metadata.namespace.as_deref())
            .map(str::to_string);
        let key = key_for(&gvk, namespace.as_deref(), &name);
        let existing = self
            .objects
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(format!("{} {}", gvk.kind, name)))?;
        if let Some(rv) = object.metadata.resource_version.as_deref() {
            if existing.metadata.resource_version.as_deref() != Some(rv) {
                return Err(ClusterError::Conflict(format!(
                    "{} {} has been modified",
                    gvk.kind, name
                )));
            }
        }
        let mut stored = object.clone();
        stored.metadata.namespace = namespace.clone();
        stored.metadata.uid = existing.metadata.uid.clone();
        stored.metadata.resource_version = Some(self.next_resource_version());
        self.objects.lock().unwrap().insert(key, stored.clone());
        self.record(Mutation::Update {
            kind: gvk.kind,
            namespace,
            name,
        });
        Ok(stored)
    }

    async fn update_status(&self, object: &DynamicObject) -> Result<DynamicObject, ClusterError> {
        let gvk = gvk_of(object)?;
        let name = object.metadata.name.clone().unwrap_or_default();
        let namespace = self
            .normalized_namespace(&gvk.kind, object.metadata.namespace.as_deref())
            .map(str::to_string);
        let key = key_for(&gvk, namespace.as_deref(), &name);
        let mut objects = self.objects.lock().unwrap();
        let stored = objects
            .get_mut(&key)
            .ok_or_else(|| ClusterError::NotFound(format!("{} {}", gvk.kind, name)))?;
        if let (Some(status), Some(data)) = (object.data.get("status"), stored.data.as_object_mut()) {
            data.insert("status".to_string(), status.clone());
        }
        let result = stored.clone();
        drop(objects);
        self.record(Mutation::UpdateStatus {
            kind: gvk.kind,
            namespace,
            name,
        });
        Ok(result)
    }

    async fn delete(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), ClusterError> {
        let namespace = self.normalized_namespace(&gvk.kind, namespace);
        let key = key_for(gvk, namespace, name);
        let removed = if self.lingering_kinds.lock().unwrap().contains(&gvk.kind) {
            self.objects.lock().unwrap().get_mut(&key).map(|o| {
                o.metadata.deletion_timestamp =
                    Some(serde_json::from_value(serde_json::json!("2024-01-01T00:00:00Z")).unwrap());
            })
        } else {
            self.objects.lock().unwrap().remove(&key).map(|_| ())
        };
        if removed.is_some() {
            self.record(Mutation::Delete {
                kind: gvk.kind.clone(),
                namespace: namespace.map(str::to_string),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    async fn list_nodes(&self, label_selector: Option<&str>) -> Result<Vec<Node>, ClusterError> {
        Ok(self
            .nodes
            .lock()
            .unwrap()
            .values()
            .filter(|n| {
                label_selector.is_none_or(|s| {
                    selector_matches(s, n.metadata.labels.as_ref().unwrap_or(&BTreeMap::new()))
                })
            })
            .cloned()
            .collect())
    }

    async fn update_node(&self, node: &Node) -> Result<Node, ClusterError> {
        let name = node.metadata.name.clone().unwrap_or_default();
        {
            let mut conflicts = self.node_conflicts.lock().unwrap();
            if *conflicts > 0 {
                *conflicts -= 1;
                return Err(ClusterError::Conflict(format!("node {} has been modified", name)));
            }
        }
        let mut nodes = self.nodes.lock().unwrap();
        if !nodes.contains_key(&name) {
            return Err(ClusterError::NotFound(format!("node {}", name)));
        }
        let mut stored = node.clone();
        stored.metadata.resource_version = Some(self.next_resource_version());
        nodes.insert(name.clone(), stored.clone());
        drop(nodes);
        self.record(Mutation::UpdateNode { name });
        Ok(stored)
    }

    async fn pod_logs(&self, namespace: &str, name: &str) -> Result<String, ClusterError> {
        self.logs
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(format!("logs for pod {}/{}", namespace, name)))
    }

    async fn api_resources(&self) -> Result<Vec<ApiResourceInfo>, ClusterError> {
        let kinds: BTreeSet<(String, String, String)> = self
            .objects
            .lock()
            .unwrap()
            .values()
            .filter_map(|o| gvk_of(o).ok())
            .map(|gvk| (gvk.group, gvk.version, gvk.kind))
            .collect();
        Ok(kinds
            .into_iter()
            .map(|(group, version, kind)| ApiResourceInfo {
                namespaced: !self.cluster_scoped(&kind),
                plural: format!("{}s", kind.to_lowercase()),
                gvk: GroupVersionKind::gvk(&group, &version, &kind),
                listable: true,
                deletable: true,
            })
            .collect())
    }

    async fn refresh_discovery(&self) -> Result<(), ClusterError> {
        *self.discovery_refreshes.lock().unwrap() += 1;
        Ok(())
    }

    async fn server_groups(&self) -> Result<Vec<String>, ClusterError> {
        let groups: BTreeSet<String> = self
            .objects
            .lock()
            .unwrap()
            .values()
            .filter_map(|o| gvk_of(o).ok())
            .map(|gvk| gvk.group)
            .collect();
        Ok(groups.into_iter().collect())
    }
}

impl MockClusterClient {
    /// Kinds of all stored objects, for debugging test failures
    pub fn stored_kinds(&self) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .values()
            .map(|o| kind_of(o).to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::gvk_from;
    use kube::api::{ObjectMeta, TypeMeta};

    fn config_map(name: &str, namespace: &str) -> DynamicObject {
        DynamicObject {
            types: Some(TypeMeta {
                api_version: "v1".to_string(),
                kind: "ConfigMap".to_string(),
            }),
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: serde_json::json!({"data": {"a": "b"}}),
        }
    }

    #[tokio::test]
    async fn test_create_get_update_delete() {
        let mock = MockClusterClient::new();
        let gvk = gvk_from("v1", "ConfigMap");
        let created = mock.create(&config_map("cm", "demo")).await.expect("created");
        assert!(created.metadata.uid.is_some());

        let found = mock.get(&gvk, Some("demo"), "cm").await.expect("get");
        assert!(found.is_some());

        let err = mock.create(&config_map("cm", "demo")).await;
        assert!(matches!(err, Err(ClusterError::AlreadyExists(_))));

        let mut stale = created.clone();
        stale.metadata.resource_version = Some("0".to_string());
        assert!(matches!(mock.update(&stale).await, Err(ClusterError::Conflict(_))));

        mock.update(&created).await.expect("updated");
        mock.delete(&gvk, Some("demo"), "cm").await.expect("deleted");
        assert!(mock.get(&gvk, Some("demo"), "cm").await.expect("get").is_none());
        assert_eq!(mock.mutations().len(), 3);
    }

    #[test]
    fn test_selector_matches() {
        let labels: BTreeMap<String, String> =
            [("app".to_string(), "drv".to_string())].into_iter().collect();
        assert!(selector_matches("app=drv", &labels));
        assert!(selector_matches("app", &labels));
        assert!(!selector_matches("app!=drv", &labels));
        assert!(!selector_matches("owned=true", &labels));
        assert!(selector_matches("", &labels));
    }
}
