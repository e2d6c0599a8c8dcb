//! Object decoration
//!
//! Every rendered object passes through here before CRUD: it is scoped
//! to the target namespace, marked as owned, annotated for Helm, renamed
//! and pinned when kernel-affine, given proxy settings and the owner's
//! node selector, and finally owner-referenced.

use crate::annotations::{
    HELM_RELEASE_NAME, HELM_RELEASE_NAMESPACE, KERNEL_AFFINE, KERNEL_VERSION_LABEL, MANAGED_BY_LABEL,
    OWNED_LABEL, PROXY,
};
use crate::error::ControllerError;
use crate::hash::kernel_affine_suffix;
use crate::manifest::Manifest;
use crate::runtime_info::RuntimeInformation;
use cluster_client::ClusterClientTrait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use std::collections::BTreeMap;
use tracing::debug;

/// Value of the managed-by label
const MANAGED_BY: &str = "Helm";

/// Kind that never gets an owner reference
const SPECIAL_RESOURCE_KIND: &str = "SpecialResource";

/// Decoration inputs for one chart application
#[derive(Debug, Clone, Copy)]
pub struct Decorator<'a> {
    /// Namespace for namespaced kinds
    pub namespace: &'a str,
    /// Helm release name (the owner's name)
    pub release_name: &'a str,
    /// Owner of every decorated object
    pub owner: Option<&'a OwnerReference>,
    /// Owner's node selector
    pub node_selector: &'a BTreeMap<String, String>,
    /// Runtime information the object was rendered with
    pub runtime: &'a RuntimeInformation,
}

impl Decorator<'_> {
    /// Decorates an object, asking the API server whether its kind is namespaced
    pub async fn decorate(
        &self,
        client: &dyn ClusterClientTrait,
        manifest: &mut Manifest,
    ) -> Result<(), ControllerError> {
        let gvk = manifest.gvk();
        let namespaced = match client.is_namespaced(&gvk).await {
            Ok(namespaced) => namespaced,
            // CRs of a CRD installed earlier in this reconcile may not be discovered yet
            Err(e) if e.is_not_found() => {
                debug!("Kind {} not discovered yet, assuming namespaced", gvk.kind);
                true
            }
            Err(e) => return Err(ControllerError::cluster(&gvk.kind, manifest.name(), e)),
        };
        self.decorate_scoped(manifest, namespaced)
    }

    /// Decorates an object whose scope is already known
    pub fn decorate_scoped(&self, manifest: &mut Manifest, namespaced: bool) -> Result<(), ControllerError> {
        manifest.meta_mut().namespace = namespaced.then(|| self.namespace.to_string());

        manifest.set_label(OWNED_LABEL, "true");
        if manifest.is_workload() {
            manifest.set_pod_template_labels(&BTreeMap::from([(OWNED_LABEL.to_string(), "true".to_string())]));
        }

        manifest.set_annotation(HELM_RELEASE_NAME, self.release_name);
        manifest.set_annotation(HELM_RELEASE_NAMESPACE, self.namespace);
        manifest.set_label(MANAGED_BY_LABEL, MANAGED_BY);

        if manifest.annotation_true(KERNEL_AFFINE) {
            self.pin_to_kernel(manifest)?;
        }

        if manifest.annotation_true(PROXY) {
            manifest.set_container_env(&self.runtime.proxy.env_vars());
        }

        manifest.set_node_selector(self.node_selector);

        if let Some(owner) = self.owner {
            if manifest.kind() != SPECIAL_RESOURCE_KIND {
                manifest.set_owner_ref(owner.clone());
            }
        }
        Ok(())
    }

    fn pin_to_kernel(&self, manifest: &mut Manifest) -> Result<(), ControllerError> {
        let kernel = &self.runtime.kernel_full_version;
        if kernel.is_empty() {
            return Err(ControllerError::NoKernelDetected);
        }
        let name = format!(
            "{}-{}",
            manifest.name(),
            kernel_affine_suffix(&self.runtime.operating_system_major_minor, kernel)
        );
        debug!("Kernel-affine {} {} becomes {}", manifest.kind(), manifest.name(), name);
        manifest.meta_mut().name = Some(name.clone());

        manifest.set_node_selector(&BTreeMap::from([(KERNEL_VERSION_LABEL.to_string(), kernel.clone())]));

        if manifest.is_workload() {
            let app = BTreeMap::from([("app".to_string(), name.clone())]);
            manifest.set_label("app", &name);
            manifest.set_selector_labels(&app);
            manifest.set_pod_template_labels(&app);
        }
        manifest.set_build_ref(&name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::fnv64a;
    use crate::runtime_info::proxy::ProxyConfiguration;
    use serde_json::json;

    fn runtime() -> RuntimeInformation {
        RuntimeInformation {
            kernel_full_version: "4.18.0-305.19.1.el8_4.x86_64".to_string(),
            operating_system_major_minor: "rhel8.4".to_string(),
            proxy: ProxyConfiguration {
                http_proxy: "http://proxy:3128".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn owner() -> OwnerReference {
        OwnerReference {
            api_version: "sro.openshift.io/v1beta1".to_string(),
            kind: "SpecialResource".to_string(),
            name: "drv".to_string(),
            uid: "uid-drv".to_string(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    fn ds(annotations: serde_json::Value) -> Manifest {
        Manifest::from_value(json!({
            "apiVersion": "apps/v1",
            "kind": "DaemonSet",
            "metadata": {"name": "drv", "annotations": annotations},
            "spec": {
                "selector": {"matchLabels": {"app": "drv"}},
                "template": {"metadata": {"labels": {"app": "drv"}}, "spec": {"containers": [{"name": "c", "image": "i"}]}}
            }
        }))
        .expect("valid")
    }

    #[test]
    fn test_kernel_affine_daemonset() {
        let info = runtime();
        let owner = owner();
        let selector = BTreeMap::from([("gpu".to_string(), "true".to_string())]);
        let decorator = Decorator {
            namespace: "drv",
            release_name: "drv",
            owner: Some(&owner),
            node_selector: &selector,
            runtime: &info,
        };
        let mut manifest = ds(json!({"specialresource.openshift.io/kernel-affine": "true", "specialresource.openshift.io/proxy": "true"}));
        decorator.decorate_scoped(&mut manifest, true).expect("decorated");

        let expected = format!("drv-{:x}", fnv64a(b"rhel8.4-4.18.0-305.19.1.el8-4.x86-64"));
        assert_eq!(manifest.name(), expected);

        let obj = manifest.to_dynamic().expect("dynamic");
        assert_eq!(obj.metadata.namespace.as_deref(), Some("drv"));
        assert_eq!(obj.metadata.labels.as_ref().and_then(|l| l.get("app")), Some(&expected));
        assert_eq!(obj.metadata.labels.as_ref().and_then(|l| l.get(OWNED_LABEL)).map(String::as_str), Some("true"));
        let spec = &obj.data["spec"];
        assert_eq!(spec["selector"]["matchLabels"]["app"], expected.as_str());
        assert_eq!(spec["template"]["metadata"]["labels"]["app"], expected.as_str());
        assert_eq!(spec["template"]["metadata"]["labels"][OWNED_LABEL], "true");
        assert_eq!(spec["template"]["spec"]["nodeSelector"][KERNEL_VERSION_LABEL], "4.18.0-305.19.1.el8_4.x86_64");
        assert_eq!(spec["template"]["spec"]["nodeSelector"]["gpu"], "true");
        assert_eq!(spec["template"]["spec"]["containers"][0]["env"][0]["name"], "HTTP_PROXY");
        assert_eq!(obj.metadata.owner_references.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn test_cluster_scoped_object_has_no_namespace() {
        let info = runtime();
        let selector = BTreeMap::new();
        let decorator = Decorator {
            namespace: "drv",
            release_name: "drv",
            owner: None,
            node_selector: &selector,
            runtime: &info,
        };
        let mut role = Manifest::from_value(json!({
            "apiVersion": "rbac.authorization.k8s.io/v1", "kind": "ClusterRole",
            "metadata": {"name": "drv", "namespace": "elsewhere"}
        }))
        .expect("valid");
        decorator.decorate_scoped(&mut role, false).expect("decorated");
        assert_eq!(role.meta().namespace, None);
        assert_eq!(role.annotation(HELM_RELEASE_NAME), Some("drv"));
    }

    #[test]
    fn test_special_resource_is_not_owned() {
        let info = runtime();
        let owner = owner();
        let selector = BTreeMap::new();
        let decorator = Decorator {
            namespace: "drv",
            release_name: "drv",
            owner: Some(&owner),
            node_selector: &selector,
            runtime: &info,
        };
        let mut sr = Manifest::from_value(json!({
            "apiVersion": "sro.openshift.io/v1beta1", "kind": "SpecialResource", "metadata": {"name": "base"}
        }))
        .expect("valid");
        decorator.decorate_scoped(&mut sr, false).expect("decorated");
        assert!(sr.meta().owner_references.is_none());
    }

    #[test]
    fn test_kernel_affine_without_kernel_fails() {
        let info = RuntimeInformation::default();
        let selector = BTreeMap::new();
        let decorator = Decorator {
            namespace: "drv",
            release_name: "drv",
            owner: None,
            node_selector: &selector,
            runtime: &info,
        };
        let mut manifest = ds(json!({"specialresource.openshift.io/kernel-affine": "true"}));
        let err = decorator.decorate_scoped(&mut manifest, true).expect_err("no kernel");
        assert!(matches!(err, ControllerError::NoKernelDetected));
    }
}
