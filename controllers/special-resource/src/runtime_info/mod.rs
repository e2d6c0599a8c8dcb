//! Runtime information handed to chart templates
//!
//! A snapshot of the cluster (version, kernels, OS, proxy, driver
//! toolkit) built once per reconcile. Kernel-affine templates render once
//! per entry of `cluster_upgrade_info` via [`RuntimeInformation::for_kernel`].

pub mod cluster;
pub mod dtk;
pub mod kernel;
pub mod proxy;

use crate::context::ReconcileContext;
use crate::error::ControllerError;
use cluster::ClusterVersionInfo;
use proxy::ProxyConfiguration;
use registry_client::RegistryClientTrait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Driver toolkit matching one kernel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverToolkitEntry {
    pub image_url: String,
    pub kernel_full_version: String,
    pub rt_kernel_full_version: String,
    pub os_version: String,
}

/// Everything known about one kernel variant present in the cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeVersion {
    /// e.g. `8.4`
    pub os_version: String,
    /// e.g. `rhel8`
    pub os_major: String,
    /// e.g. `rhel8.4`
    pub os_major_minor: String,
    pub cluster_version: String,
    pub driver_toolkit: DriverToolkitEntry,
}

/// Stable names of the conventional stages
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceGroupName {
    pub driver_build: String,
    pub driver_container: String,
    pub runtime_enablement: String,
    pub device_plugin: String,
    pub device_monitoring: String,
    pub device_dashboard: String,
    pub device_feature_discovery: String,
    pub csi_driver: String,
}

impl Default for ResourceGroupName {
    fn default() -> Self {
        Self {
            driver_build: "driver-build".to_string(),
            driver_container: "driver-container".to_string(),
            runtime_enablement: "runtime-enablement".to_string(),
            device_plugin: "device-plugin".to_string(),
            device_monitoring: "device-monitoring".to_string(),
            device_dashboard: "device-dashboard".to_string(),
            device_feature_discovery: "device-feature-discovery".to_string(),
            csi_driver: "csi-driver".to_string(),
        }
    }
}

/// Chart input describing the cluster. Serialized camelCase into `.Values`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeInformation {
    pub kernel_full_version: String,
    pub kernel_patch_version: String,
    pub operating_system_major: String,
    pub operating_system_major_minor: String,
    pub operating_system_decimal: String,
    pub cluster_version: String,
    pub cluster_version_major_minor: String,
    /// Kernel full version to everything known about it
    pub cluster_upgrade_info: BTreeMap<String, NodeVersion>,
    pub driver_toolkit_image: String,
    #[serde(rename = "osImageURL")]
    pub os_image_url: String,
    pub platform: String,
    pub push_secret_name: String,
    pub proxy: ProxyConfiguration,
    pub group_name: ResourceGroupName,
    /// Copy of the object being reconciled
    pub special_resource: serde_json::Value,
}

impl RuntimeInformation {
    /// Copy with the kernel-specific fields taken from one upgrade-info entry
    pub fn for_kernel(&self, kernel: &str, node_version: &NodeVersion) -> Result<Self, ControllerError> {
        let mut info = self.clone();
        info.kernel_full_version = kernel.to_string();
        info.kernel_patch_version = kernel::patch_version(kernel)?;
        info.operating_system_decimal = node_version.os_version.clone();
        info.operating_system_major = node_version.os_major.clone();
        info.operating_system_major_minor = node_version.os_major_minor.clone();
        info.cluster_version_major_minor = cluster::major_minor(&node_version.cluster_version);
        info.driver_toolkit_image = node_version.driver_toolkit.image_url.clone();
        Ok(info)
    }

    /// Flattened form merged over the chart values
    pub fn to_values(&self) -> Result<serde_json::Value, ControllerError> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Gathers the runtime information for an object targeting the nodes in
/// `ctx.nodes` and living in `namespace`.
///
/// Tainted nodes do not contribute kernels. A node whose OS cannot be
/// derived fails the gathering; toolkit lookups are best effort.
pub async fn gather(
    ctx: &mut ReconcileContext,
    registry: Option<&dyn RegistryClientTrait>,
    namespace: &str,
    special_resource: serde_json::Value,
) -> Result<RuntimeInformation, ControllerError> {
    let client = Arc::clone(&ctx.client);
    let cluster = ClusterVersionInfo::from_cluster(client.as_ref()).await?;
    let platform = cluster::platform(client.as_ref()).await?;
    let release_image = Some(cluster.release_image.as_str()).filter(|s| !s.is_empty());

    let mut info = RuntimeInformation {
        cluster_version: cluster.version.clone(),
        cluster_version_major_minor: cluster.major_minor.clone(),
        platform: platform.to_string(),
        special_resource,
        ..Default::default()
    };

    let nodes = ctx.nodes.schedulable(client.as_ref()).await?;
    if nodes.is_empty() {
        warn!("No schedulable node matches selector {:?}", ctx.nodes.selector());
    }
    for node in &nodes {
        let Some(kernel) = kernel::kernel_of(node) else {
            debug!(
                "Node {} reports no kernel version",
                node.metadata.name.as_deref().unwrap_or_default()
            );
            continue;
        };
        let os = kernel::os_of(node)?;
        if info.kernel_full_version.is_empty() {
            info.kernel_full_version = kernel.clone();
            info.kernel_patch_version = kernel::patch_version(&kernel)?;
            info.operating_system_major = os.major.clone();
            info.operating_system_major_minor = os.major_minor.clone();
            info.operating_system_decimal = os.decimal.clone();
        }
        if info.cluster_upgrade_info.contains_key(&kernel) {
            continue;
        }
        let os_build = kernel::rhcos_build_of(node);
        let driver_toolkit = dtk::lookup(client.as_ref(), registry, os_build.as_deref(), release_image).await;
        info.cluster_upgrade_info.insert(
            kernel,
            NodeVersion {
                os_version: os.decimal,
                os_major: os.major,
                os_major_minor: os.major_minor,
                cluster_version: cluster.version.clone(),
                driver_toolkit,
            },
        );
    }
    if let Some(current) = info.cluster_upgrade_info.get(&info.kernel_full_version) {
        info.driver_toolkit_image = current.driver_toolkit.image_url.clone();
    }

    info.proxy = ProxyConfiguration::from_cluster(client.as_ref()).await?;
    info.os_image_url = cluster::os_image_url(client.as_ref()).await;
    info.push_secret_name = cluster::push_secret_name(client.as_ref(), namespace, platform).await?;

    debug!(
        "Runtime information: kernel {} on {}, {} kernel variant(s), cluster {:?}",
        info.kernel_full_version,
        info.operating_system_major_minor,
        info.cluster_upgrade_info.len(),
        info.cluster_version
    );
    Ok(info)
}

#[cfg(test)]
mod runtime_info_test;
