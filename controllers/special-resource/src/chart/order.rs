//! Install order
//!
//! Helm's kind order, extended so in-cluster builds, image streams and
//! security context constraints exist before the services that use them.

use crate::manifest::Manifest;

/// Kinds in installation order. Unknown kinds go last.
pub const INSTALL_ORDER: &[&str] = &[
    "Namespace",
    "NetworkPolicy",
    "ResourceQuota",
    "LimitRange",
    "PodSecurityPolicy",
    "PodDisruptionBudget",
    "ServiceAccount",
    "Secret",
    "SecretList",
    "ConfigMap",
    "StorageClass",
    "PersistentVolume",
    "PersistentVolumeClaim",
    "CustomResourceDefinition",
    "ClusterRole",
    "ClusterRoleList",
    "ClusterRoleBinding",
    "ClusterRoleBindingList",
    "Role",
    "RoleList",
    "RoleBinding",
    "RoleBindingList",
    "BuildConfig",
    "ImageStream",
    "SecurityContextConstraints",
    "Service",
    "DaemonSet",
    "Pod",
    "ReplicationController",
    "ReplicaSet",
    "Deployment",
    "HorizontalPodAutoscaler",
    "StatefulSet",
    "Job",
    "CronJob",
    "IngressClass",
    "Ingress",
    "APIService",
];

fn rank(kind: &str) -> usize {
    INSTALL_ORDER
        .iter()
        .position(|k| *k == kind)
        .unwrap_or(INSTALL_ORDER.len())
}

/// Sorts manifests into install order, keeping the rendered order among equals
pub fn sort_for_install(manifests: &mut [Manifest]) {
    manifests.sort_by_key(|m| rank(m.kind()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manifest(api_version: &str, kind: &str, name: &str) -> Manifest {
        Manifest::from_value(json!({"apiVersion": api_version, "kind": kind, "metadata": {"name": name}}))
            .expect("valid manifest")
    }

    #[test]
    fn test_builds_precede_services() {
        let mut manifests = vec![
            manifest("v1", "Service", "svc"),
            manifest("apps/v1", "DaemonSet", "ds"),
            manifest("build.openshift.io/v1", "BuildConfig", "bc"),
            manifest("example.com/v1", "Widget", "w"),
            manifest("image.openshift.io/v1", "ImageStream", "is"),
            manifest("v1", "ConfigMap", "cm"),
        ];
        sort_for_install(&mut manifests);
        let kinds: Vec<_> = manifests.iter().map(Manifest::kind).collect();
        assert_eq!(
            kinds,
            vec!["ConfigMap", "BuildConfig", "ImageStream", "Service", "DaemonSet", "Widget"]
        );
    }

    #[test]
    fn test_sort_is_stable() {
        let mut manifests = vec![manifest("v1", "ConfigMap", "b"), manifest("v1", "ConfigMap", "a")];
        sort_for_install(&mut manifests);
        assert_eq!(manifests[0].name(), "b");
    }
}
