//! Well-known annotation, label and finalizer keys

/// Controller-managed content hash of a rendered object
pub const HASH: &str = "specialresource.openshift.io/hash";

/// Stage grouping of a rendered object
pub const STATE: &str = "specialresource.openshift.io/state";

/// Block until the object is available
pub const WAIT: &str = "specialresource.openshift.io/wait";

/// Regex a pod log must match before the object counts as ready
pub const WAIT_FOR_LOGS: &str = "specialresource.openshift.io/wait-for-logs";

/// Inject the cluster proxy environment
pub const PROXY: &str = "specialresource.openshift.io/proxy";

/// Rendered once per kernel and pinned to nodes running it
pub const KERNEL_AFFINE: &str = "specialresource.openshift.io/kernel-affine";

/// Rebuild discriminator shared by a BuildConfig and its DaemonSet
pub const DRIVER_CONTAINER_VENDOR: &str = "specialresource.openshift.io/driver-container-vendor";

/// Pre-apply callback name
pub const CALLBACK: &str = "specialresource.openshift.io/callback";

/// Queryable marker on every object owned by an SR
pub const OWNED_LABEL: &str = "specialresource.openshift.io/owned";

/// Prefix of the per-stage node labels
pub const STATE_LABEL_PREFIX: &str = "specialresource.openshift.io/state-";

/// Node Feature Discovery label holding the full kernel version
pub const KERNEL_VERSION_LABEL: &str = "feature.node.kubernetes.io/kernel-version.full";

/// Node Feature Discovery os-release labels
pub const OS_RELEASE_ID_LABEL: &str = "feature.node.kubernetes.io/system-os_release.ID";
/// Major OS version label
pub const OS_RELEASE_MAJOR_LABEL: &str = "feature.node.kubernetes.io/system-os_release.VERSION_ID.major";
/// Minor OS version label
pub const OS_RELEASE_MINOR_LABEL: &str = "feature.node.kubernetes.io/system-os_release.VERSION_ID.minor";

/// Finalizer set on every SR and SRModule
pub const FINALIZER: &str = "sro.openshift.io/finalizer";

/// Finalizer written by earlier releases
pub const LEGACY_FINALIZER: &str = "specialresource.openshift.io/finalizer";

/// Helm release accounting
pub const HELM_RELEASE_NAME: &str = "meta.helm.sh/release-name";
/// Helm release namespace
pub const HELM_RELEASE_NAMESPACE: &str = "meta.helm.sh/release-namespace";
/// Managed-by label
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Kept across DaemonSet updates so rolling updates stay stable
pub const DAEMONSET_TEMPLATE_GENERATION: &str = "deprecated.daemonset.template.generation";

/// Whether an annotation is set to `true`
pub fn is_true(annotations: Option<&std::collections::BTreeMap<String, String>>, key: &str) -> bool {
    annotations
        .and_then(|a| a.get(key))
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}
