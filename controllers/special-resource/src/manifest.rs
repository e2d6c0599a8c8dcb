//! Typed rendered objects
//!
//! Chart output is parsed into a typed variant for the kinds the engine
//! manipulates and an opaque dynamic object for everything else. The
//! decorator works through the capability methods here instead of poking
//! at untyped maps.

use crate::error::ControllerError;
use cluster_client::{gvk_for, gvk_from, split_api_version, to_dynamic};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, EnvVar, PodSpec, PodTemplateSpec, Pod, Secret, Service};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, OwnerReference};
use kube::api::{DynamicObject, GroupVersionKind, ObjectMeta};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// A rendered object
#[derive(Debug, Clone, PartialEq)]
pub enum Manifest {
    DaemonSet(DaemonSet),
    Deployment(Deployment),
    StatefulSet(StatefulSet),
    Pod(Pod),
    Job(Job),
    Service(Service),
    ConfigMap(ConfigMap),
    Secret(Secret),
    CustomResourceDefinition(CustomResourceDefinition),
    /// BuildConfig, BuildRun, Route, ImageStream and the long tail
    Opaque(DynamicObject),
}

/// Parses `value` into `K` when that loses nothing. k8s-openapi drops
/// fields it does not model, so a document carrying newer API fields
/// stays opaque.
fn typed<K: DeserializeOwned + Serialize>(value: &serde_json::Value) -> Option<K> {
    let parsed: K = match serde_json::from_value(value.clone()) {
        Ok(k) => k,
        Err(e) => {
            debug!("Falling back to an untyped object: {}", e);
            return None;
        }
    };
    let round_trip = serde_json::to_value(&parsed).ok()?;
    if without_nulls(&round_trip) != without_nulls(value) {
        debug!("Falling back to an untyped object: fields beyond the typed model");
        return None;
    }
    Some(parsed)
}

fn without_nulls(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), without_nulls(v)))
                .collect(),
        ),
        serde_json::Value::Array(items) => serde_json::Value::Array(items.iter().map(without_nulls).collect()),
        other => other.clone(),
    }
}

/// Pod spec location of an untyped object of a pod-carrying kind
fn opaque_pod_spec_path(object: &DynamicObject) -> Option<&'static [&'static str]> {
    let types = object.types.as_ref()?;
    let (group, _) = split_api_version(&types.api_version);
    match (group, types.kind.as_str()) {
        ("apps", "DaemonSet" | "Deployment" | "StatefulSet") | ("batch", "Job") => Some(&["spec", "template", "spec"][..]),
        ("", "Pod") => Some(&["spec"][..]),
        _ => None,
    }
}

fn opaque_is_workload(object: &DynamicObject) -> bool {
    object.types.as_ref().is_some_and(|t| {
        split_api_version(&t.api_version).0 == "apps"
            && matches!(t.kind.as_str(), "DaemonSet" | "Deployment" | "StatefulSet")
    })
}

fn merge_into(target: &mut Option<BTreeMap<String, String>>, entries: &BTreeMap<String, String>) {
    if entries.is_empty() {
        return;
    }
    let map = target.get_or_insert_with(BTreeMap::new);
    for (k, v) in entries {
        map.insert(k.clone(), v.clone());
    }
}

/// Walks `pointer` from `target`, turning anything in the way into an object
fn json_object_at<'a>(target: &'a mut serde_json::Value, pointer: &[&str]) -> Option<&'a mut serde_json::Map<String, serde_json::Value>> {
    let mut node = target;
    for segment in pointer {
        if !node.is_object() {
            *node = serde_json::json!({});
        }
        let serde_json::Value::Object(map) = node else {
            return None;
        };
        node = map.entry(segment.to_string()).or_insert(serde_json::Value::Null);
    }
    if !node.is_object() {
        *node = serde_json::json!({});
    }
    node.as_object_mut()
}

fn merge_json_map(target: &mut serde_json::Value, pointer: &[&str], entries: &BTreeMap<String, String>) {
    if entries.is_empty() {
        return;
    }
    if let Some(map) = json_object_at(target, pointer) {
        for (k, v) in entries {
            map.insert(k.clone(), serde_json::Value::String(v.clone()));
        }
    }
}

fn set_env_json(pod_spec: &mut serde_json::Map<String, serde_json::Value>, vars: &[(&str, &str)]) {
    for field in ["containers", "initContainers"] {
        let Some(containers) = pod_spec.get_mut(field).and_then(|c| c.as_array_mut()) else {
            continue;
        };
        for container in containers.iter_mut().filter_map(|c| c.as_object_mut()) {
            let env = container
                .entry("env".to_string())
                .or_insert_with(|| serde_json::json!([]));
            if !env.is_array() {
                *env = serde_json::json!([]);
            }
            let Some(env) = env.as_array_mut() else {
                continue;
            };
            for (name, value) in vars {
                let existing = env
                    .iter_mut()
                    .filter_map(|e| e.as_object_mut())
                    .find(|e| e.get("name").and_then(|n| n.as_str()) == Some(*name));
                match existing {
                    Some(existing) => {
                        existing.insert("value".to_string(), serde_json::json!(value));
                        existing.remove("valueFrom");
                    }
                    None => env.push(serde_json::json!({ "name": name, "value": value })),
                }
            }
        }
    }
}

fn set_env(containers: &mut [k8s_openapi::api::core::v1::Container], vars: &[(&str, &str)]) {
    for container in containers {
        let env = container.env.get_or_insert_with(Vec::new);
        for (name, value) in vars {
            match env.iter_mut().find(|e| e.name == *name) {
                Some(existing) => {
                    existing.value = Some(value.to_string());
                    existing.value_from = None;
                }
                None => env.push(EnvVar {
                    name: name.to_string(),
                    value: Some(value.to_string()),
                    value_from: None,
                }),
            }
        }
    }
}

impl Manifest {
    /// Parses one rendered document
    pub fn from_value(value: serde_json::Value) -> Result<Self, ControllerError> {
        let api_version = value
            .get("apiVersion")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let kind = value.get("kind").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        if api_version.is_empty() || kind.is_empty() {
            return Err(ControllerError::Chart(format!(
                "rendered object without apiVersion/kind: {}",
                value.get("metadata").map(|m| m.to_string()).unwrap_or_default()
            )));
        }

        let (group, _) = split_api_version(&api_version);
        let parsed = match (group, kind.as_str()) {
            ("apps", "DaemonSet") => typed(&value).map(Manifest::DaemonSet),
            ("apps", "Deployment") => typed(&value).map(Manifest::Deployment),
            ("apps", "StatefulSet") => typed(&value).map(Manifest::StatefulSet),
            ("batch", "Job") => typed(&value).map(Manifest::Job),
            ("", "Pod") => typed(&value).map(Manifest::Pod),
            ("", "Service") => typed(&value).map(Manifest::Service),
            ("", "ConfigMap") => typed(&value).map(Manifest::ConfigMap),
            ("", "Secret") => typed(&value).map(Manifest::Secret),
            ("apiextensions.k8s.io", "CustomResourceDefinition") if api_version.ends_with("/v1") => {
                typed(&value).map(Manifest::CustomResourceDefinition)
            }
            _ => None,
        };
        match parsed {
            Some(manifest) => Ok(manifest),
            None => Ok(Manifest::Opaque(serde_json::from_value(value)?)),
        }
    }

    /// Dynamic form sent to the API server
    pub fn to_dynamic(&self) -> Result<DynamicObject, ControllerError> {
        Ok(match self {
            Manifest::DaemonSet(o) => to_dynamic(o)?,
            Manifest::Deployment(o) => to_dynamic(o)?,
            Manifest::StatefulSet(o) => to_dynamic(o)?,
            Manifest::Pod(o) => to_dynamic(o)?,
            Manifest::Job(o) => to_dynamic(o)?,
            Manifest::Service(o) => to_dynamic(o)?,
            Manifest::ConfigMap(o) => to_dynamic(o)?,
            Manifest::Secret(o) => to_dynamic(o)?,
            Manifest::CustomResourceDefinition(o) => to_dynamic(o)?,
            Manifest::Opaque(o) => o.clone(),
        })
    }

    /// Object kind
    pub fn kind(&self) -> &str {
        match self {
            Manifest::DaemonSet(_) => "DaemonSet",
            Manifest::Deployment(_) => "Deployment",
            Manifest::StatefulSet(_) => "StatefulSet",
            Manifest::Pod(_) => "Pod",
            Manifest::Job(_) => "Job",
            Manifest::Service(_) => "Service",
            Manifest::ConfigMap(_) => "ConfigMap",
            Manifest::Secret(_) => "Secret",
            Manifest::CustomResourceDefinition(_) => "CustomResourceDefinition",
            Manifest::Opaque(o) => cluster_client::kind_of(o),
        }
    }

    /// Group, version and kind
    pub fn gvk(&self) -> GroupVersionKind {
        match self {
            Manifest::DaemonSet(_) => gvk_for::<DaemonSet>(),
            Manifest::Deployment(_) => gvk_for::<Deployment>(),
            Manifest::StatefulSet(_) => gvk_for::<StatefulSet>(),
            Manifest::Pod(_) => gvk_for::<Pod>(),
            Manifest::Job(_) => gvk_for::<Job>(),
            Manifest::Service(_) => gvk_for::<Service>(),
            Manifest::ConfigMap(_) => gvk_for::<ConfigMap>(),
            Manifest::Secret(_) => gvk_for::<Secret>(),
            Manifest::CustomResourceDefinition(_) => gvk_for::<CustomResourceDefinition>(),
            Manifest::Opaque(o) => o
                .types
                .as_ref()
                .map(|t| gvk_from(&t.api_version, &t.kind))
                .unwrap_or_else(|| GroupVersionKind::gvk("", "", "")),
        }
    }

    /// Object metadata
    pub fn meta(&self) -> &ObjectMeta {
        match self {
            Manifest::DaemonSet(o) => &o.metadata,
            Manifest::Deployment(o) => &o.metadata,
            Manifest::StatefulSet(o) => &o.metadata,
            Manifest::Pod(o) => &o.metadata,
            Manifest::Job(o) => &o.metadata,
            Manifest::Service(o) => &o.metadata,
            Manifest::ConfigMap(o) => &o.metadata,
            Manifest::Secret(o) => &o.metadata,
            Manifest::CustomResourceDefinition(o) => &o.metadata,
            Manifest::Opaque(o) => &o.metadata,
        }
    }

    /// Mutable object metadata
    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Manifest::DaemonSet(o) => &mut o.metadata,
            Manifest::Deployment(o) => &mut o.metadata,
            Manifest::StatefulSet(o) => &mut o.metadata,
            Manifest::Pod(o) => &mut o.metadata,
            Manifest::Job(o) => &mut o.metadata,
            Manifest::Service(o) => &mut o.metadata,
            Manifest::ConfigMap(o) => &mut o.metadata,
            Manifest::Secret(o) => &mut o.metadata,
            Manifest::CustomResourceDefinition(o) => &mut o.metadata,
            Manifest::Opaque(o) => &mut o.metadata,
        }
    }

    /// Object name, empty when unset
    pub fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }

    /// Annotation value
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.meta().annotations.as_ref()?.get(key).map(String::as_str)
    }

    /// Whether an annotation is `true`
    pub fn annotation_true(&self, key: &str) -> bool {
        crate::annotations::is_true(self.meta().annotations.as_ref(), key)
    }

    /// Sets one label
    pub fn set_label(&mut self, key: &str, value: &str) {
        self.meta_mut()
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.to_string());
    }

    /// Sets one annotation
    pub fn set_annotation(&mut self, key: &str, value: &str) {
        self.meta_mut()
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.to_string());
    }

    /// DaemonSet, Deployment or StatefulSet
    pub fn is_workload(&self) -> bool {
        match self {
            Manifest::DaemonSet(_) | Manifest::Deployment(_) | Manifest::StatefulSet(_) => true,
            Manifest::Opaque(o) => opaque_is_workload(o),
            _ => false,
        }
    }

    /// Image of the first container in the pod spec
    pub fn first_container_image(&self) -> Option<String> {
        let pod_spec = match self {
            Manifest::Pod(o) => o.spec.as_ref(),
            Manifest::DaemonSet(o) => o.spec.as_ref().and_then(|s| s.template.spec.as_ref()),
            Manifest::Deployment(o) => o.spec.as_ref().and_then(|s| s.template.spec.as_ref()),
            Manifest::StatefulSet(o) => o.spec.as_ref().and_then(|s| s.template.spec.as_ref()),
            Manifest::Job(o) => o.spec.as_ref().and_then(|s| s.template.spec.as_ref()),
            Manifest::Opaque(o) => {
                let mut node = &o.data;
                for segment in opaque_pod_spec_path(o)? {
                    node = node.get(segment)?;
                }
                return node
                    .pointer("/containers/0/image")
                    .and_then(|i| i.as_str())
                    .map(str::to_string);
            }
            _ => None,
        };
        pod_spec?.containers.first()?.image.clone()
    }

    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        match self {
            Manifest::DaemonSet(o) => Some(&mut o.spec.get_or_insert_with(Default::default).template),
            Manifest::Deployment(o) => Some(&mut o.spec.get_or_insert_with(Default::default).template),
            Manifest::StatefulSet(o) => Some(&mut o.spec.get_or_insert_with(Default::default).template),
            Manifest::Job(o) => Some(&mut o.spec.get_or_insert_with(Default::default).template),
            _ => None,
        }
    }

    fn selector_mut(&mut self) -> Option<&mut LabelSelector> {
        match self {
            Manifest::DaemonSet(o) => Some(&mut o.spec.get_or_insert_with(Default::default).selector),
            Manifest::Deployment(o) => Some(&mut o.spec.get_or_insert_with(Default::default).selector),
            Manifest::StatefulSet(o) => Some(&mut o.spec.get_or_insert_with(Default::default).selector),
            _ => None,
        }
    }

    fn pod_spec_mut(&mut self) -> Option<&mut PodSpec> {
        if let Manifest::Pod(pod) = self {
            return Some(pod.spec.get_or_insert_with(Default::default));
        }
        self.pod_template_mut()
            .map(|t| t.spec.get_or_insert_with(Default::default))
    }

    /// Merges node selector entries at the kind's node selector path
    /// (pod template for workloads and Jobs, `spec.nodeSelector` for Pods
    /// and BuildConfigs). Other kinds are left alone.
    pub fn set_node_selector(&mut self, entries: &BTreeMap<String, String>) {
        if let Manifest::Opaque(o) = self {
            if cluster_client::kind_of(o) == "BuildConfig" {
                merge_json_map(&mut o.data, &["spec", "nodeSelector"], entries);
            } else if let Some(path) = opaque_pod_spec_path(o) {
                merge_json_map(&mut o.data, &[path, &["nodeSelector"]].concat(), entries);
            }
            return;
        }
        if let Some(spec) = self.pod_spec_mut() {
            merge_into(&mut spec.node_selector, entries);
        }
    }

    /// Sets environment variables on every container (init containers included)
    pub fn set_container_env(&mut self, vars: &[(&str, &str)]) {
        if let Manifest::Opaque(o) = self {
            if let Some(spec) = opaque_pod_spec_path(o).and_then(|path| json_object_at(&mut o.data, path)) {
                set_env_json(spec, vars);
            }
            return;
        }
        if let Some(spec) = self.pod_spec_mut() {
            set_env(&mut spec.containers, vars);
            if let Some(init) = spec.init_containers.as_mut() {
                set_env(init, vars);
            }
        }
    }

    /// Merges labels into the pod template metadata
    pub fn set_pod_template_labels(&mut self, labels: &BTreeMap<String, String>) {
        if let Manifest::Opaque(o) = self {
            if opaque_pod_spec_path(o).is_some_and(|path| path.len() == 3) {
                merge_json_map(&mut o.data, &["spec", "template", "metadata", "labels"], labels);
            }
            return;
        }
        if let Some(template) = self.pod_template_mut() {
            merge_into(
                &mut template.metadata.get_or_insert_with(Default::default).labels,
                labels,
            );
        }
    }

    /// Merges labels into the workload's `spec.selector.matchLabels`
    pub fn set_selector_labels(&mut self, labels: &BTreeMap<String, String>) {
        if let Manifest::Opaque(o) = self {
            if opaque_is_workload(o) {
                merge_json_map(&mut o.data, &["spec", "selector", "matchLabels"], labels);
            }
            return;
        }
        if let Some(selector) = self.selector_mut() {
            merge_into(&mut selector.match_labels, labels);
        }
    }

    /// Adds an owner reference unless one with the same UID is present
    pub fn set_owner_ref(&mut self, owner: OwnerReference) {
        let refs = self.meta_mut().owner_references.get_or_insert_with(Vec::new);
        if !refs.iter().any(|r| r.uid == owner.uid) {
            refs.push(owner);
        }
    }

    /// Points a BuildRun at its (renamed) Build
    pub fn set_build_ref(&mut self, name: &str) {
        if let Manifest::Opaque(o) = self {
            if cluster_client::kind_of(o) == "BuildRun" {
                if let Some(spec) = o.data.get_mut("spec").and_then(|s| s.as_object_mut()) {
                    spec.insert("buildRef".to_string(), serde_json::json!({ "name": name }));
                } else if let Some(data) = o.data.as_object_mut() {
                    data.insert("spec".to_string(), serde_json::json!({ "buildRef": { "name": name } }));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn daemonset() -> Manifest {
        Manifest::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "DaemonSet",
            "metadata": {"name": "drv", "annotations": {"specialresource.openshift.io/wait": "true"}},
            "spec": {
                "selector": {"matchLabels": {"app": "drv"}},
                "template": {
                    "metadata": {"labels": {"app": "drv"}},
                    "spec": {"containers": [{"name": "c", "image": "drv:latest", "env": [{"name": "HTTP_PROXY", "value": "old"}]}]}
                }
            }
        }))
        .expect("valid")
    }

    #[test]
    fn test_known_kinds_are_typed() {
        assert!(matches!(daemonset(), Manifest::DaemonSet(_)));
        let route = Manifest::from_value(json!({
            "apiVersion": "route.openshift.io/v1", "kind": "Route", "metadata": {"name": "r"}
        }))
        .expect("valid");
        assert!(matches!(route, Manifest::Opaque(_)));
        assert_eq!(route.kind(), "Route");
    }

    #[test]
    fn test_missing_kind_is_a_chart_error() {
        let err = Manifest::from_value(json!({"metadata": {"name": "x"}})).expect_err("no kind");
        assert!(matches!(err, ControllerError::Chart(_)));
    }

    #[test]
    fn test_workload_node_selector_and_env() {
        let mut ds = daemonset();
        ds.set_node_selector(&BTreeMap::from([("gpu".to_string(), "true".to_string())]));
        ds.set_container_env(&[("HTTP_PROXY", "http://proxy:3128"), ("NO_PROXY", ".svc")]);

        let value = ds.to_dynamic().expect("serializable").data;
        assert_eq!(value["spec"]["template"]["spec"]["nodeSelector"]["gpu"], "true");
        let env = &value["spec"]["template"]["spec"]["containers"][0]["env"];
        assert_eq!(env.as_array().map(Vec::len), Some(2));
        assert_eq!(env[0]["value"], "http://proxy:3128");
    }

    #[test]
    fn test_build_config_node_selector_is_on_spec() {
        let mut bc = Manifest::from_value(json!({
            "apiVersion": "build.openshift.io/v1", "kind": "BuildConfig", "metadata": {"name": "b"}, "spec": {}
        }))
        .expect("valid");
        bc.set_node_selector(&BTreeMap::from([("k".to_string(), "v".to_string())]));
        assert_eq!(bc.to_dynamic().expect("dynamic").data["spec"]["nodeSelector"]["k"], "v");
    }

    #[test]
    fn test_owner_ref_is_not_duplicated() {
        let mut ds = daemonset();
        let owner = OwnerReference {
            api_version: "sro.openshift.io/v1beta1".to_string(),
            kind: "SpecialResource".to_string(),
            name: "drv".to_string(),
            uid: "uid-1".to_string(),
            ..Default::default()
        };
        ds.set_owner_ref(owner.clone());
        ds.set_owner_ref(owner);
        assert_eq!(ds.meta().owner_references.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn test_build_ref() {
        let mut run = Manifest::from_value(json!({
            "apiVersion": "shipwright.io/v1alpha1", "kind": "BuildRun", "metadata": {"name": "br"},
            "spec": {"buildRef": {"name": "old"}}
        }))
        .expect("valid");
        run.set_build_ref("br-1234");
        assert_eq!(run.to_dynamic().expect("dynamic").data["spec"]["buildRef"]["name"], "br-1234");
    }

    #[test]
    fn test_unmodelled_fields_survive() {
        let mut ds = Manifest::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "DaemonSet",
            "metadata": {"name": "drv", "creationTimestamp": null},
            "spec": {
                "selector": {"matchLabels": {"app": "drv"}},
                "template": {
                    "metadata": {"labels": {"app": "drv"}},
                    "spec": {"newerApiField": true, "containers": [{"name": "c", "image": "i"}]}
                }
            }
        }))
        .expect("valid");
        assert!(matches!(ds, Manifest::Opaque(_)));
        assert!(ds.is_workload());
        assert_eq!(ds.first_container_image().as_deref(), Some("i"));

        let app = BTreeMap::from([("app".to_string(), "drv-1234".to_string())]);
        ds.set_node_selector(&BTreeMap::from([("gpu".to_string(), "true".to_string())]));
        ds.set_container_env(&[("HTTP_PROXY", "http://proxy:3128")]);
        ds.set_selector_labels(&app);
        ds.set_pod_template_labels(&app);

        let value = ds.to_dynamic().expect("dynamic").data;
        let pod_spec = &value["spec"]["template"]["spec"];
        assert_eq!(pod_spec["newerApiField"], true);
        assert_eq!(pod_spec["nodeSelector"]["gpu"], "true");
        assert_eq!(pod_spec["containers"][0]["env"][0]["value"], "http://proxy:3128");
        assert_eq!(value["spec"]["selector"]["matchLabels"]["app"], "drv-1234");
        assert_eq!(value["spec"]["template"]["metadata"]["labels"]["app"], "drv-1234");
    }

    #[test]
    fn test_nulls_do_not_block_typing() {
        let cm = Manifest::from_value(json!({
            "apiVersion": "v1", "kind": "ConfigMap",
            "metadata": {"name": "c", "creationTimestamp": null}, "data": {"k": "v"}
        }))
        .expect("valid");
        assert!(matches!(cm, Manifest::ConfigMap(_)));
    }
}
