//! Cluster-level facts: version history, platform, OS image URL, push secret

use crate::error::ControllerError;
use cluster_client::{gvk_from, ClusterClientTrait};
use serde::Deserialize;
use tracing::{debug, warn};

/// Name of the cluster version singleton
const CLUSTER_VERSION_NAME: &str = "version";

/// API group only OpenShift clusters serve
const OPENSHIFT_CONFIG_GROUP: &str = "config.openshift.io";

/// Where the machine-config operator publishes the OS image
const OS_IMAGE_URL_NAMESPACE: &str = "openshift-machine-config-operator";
const OS_IMAGE_URL_CONFIGMAP: &str = "machine-config-osimageurl";
const OS_IMAGE_URL_KEY: &str = "osImageURL";

/// Secrets usable for pushing in-cluster builds contain this in their name
const PUSH_SECRET_MARKER: &str = "builder-dockercfg";

/// Platform identifiers handed to charts
pub const PLATFORM_OPENSHIFT: &str = "OCP";
pub const PLATFORM_KUBERNETES: &str = "K8S";

/// One entry of `ClusterVersion.status.history`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UpdateHistory {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub image: String,
}

/// Cluster version and update history, newest first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterVersionInfo {
    pub version: String,
    pub major_minor: String,
    pub release_image: String,
    pub history: Vec<UpdateHistory>,
}

impl ClusterVersionInfo {
    /// Builds the info from a history list (newest first). The current
    /// version is the most recent completed entry.
    pub fn from_history(history: Vec<UpdateHistory>) -> Self {
        let current = history.iter().find(|h| h.state == "Completed").cloned().unwrap_or_default();
        Self {
            major_minor: major_minor(&current.version),
            version: current.version,
            release_image: current.image,
            history,
        }
    }

    /// Distinct completed versions with their payload images, newest first
    pub fn completed(&self) -> Vec<&UpdateHistory> {
        let mut seen = std::collections::BTreeSet::new();
        self.history
            .iter()
            .filter(|h| h.state == "Completed" && !h.version.is_empty())
            .filter(|h| seen.insert(h.version.as_str()))
            .collect()
    }

    /// Reads the `config.openshift.io/v1` ClusterVersion singleton; empty on
    /// clusters without one
    pub async fn from_cluster(client: &dyn ClusterClientTrait) -> Result<Self, ControllerError> {
        let gvk = gvk_from("config.openshift.io/v1", "ClusterVersion");
        let version = match client.get(&gvk, None, CLUSTER_VERSION_NAME).await {
            Ok(version) => version,
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(ControllerError::cluster("ClusterVersion", CLUSTER_VERSION_NAME, e)),
        };
        let Some(version) = version else {
            debug!("No ClusterVersion found, assuming a non-OpenShift cluster");
            return Ok(Self::default());
        };
        let history: Vec<UpdateHistory> = version
            .data
            .pointer("/status/history")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();
        Ok(Self::from_history(history))
    }
}

/// First two dot-separated components of a version
pub fn major_minor(version: &str) -> String {
    version.splitn(3, '.').take(2).collect::<Vec<_>>().join(".")
}

/// `OCP` when the cluster serves the OpenShift config API, `K8S` otherwise
pub async fn platform(client: &dyn ClusterClientTrait) -> Result<&'static str, ControllerError> {
    let groups = client.server_groups().await?;
    Ok(if groups.iter().any(|g| g == OPENSHIFT_CONFIG_GROUP) {
        PLATFORM_OPENSHIFT
    } else {
        PLATFORM_KUBERNETES
    })
}

/// OS image published by the machine-config operator, empty when unknown
pub async fn os_image_url(client: &dyn ClusterClientTrait) -> String {
    let gvk = gvk_from("v1", "ConfigMap");
    match client
        .get(&gvk, Some(OS_IMAGE_URL_NAMESPACE), OS_IMAGE_URL_CONFIGMAP)
        .await
    {
        Ok(Some(cm)) => cm
            .data
            .pointer(&format!("/data/{}", OS_IMAGE_URL_KEY))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        Ok(None) => String::new(),
        Err(e) => {
            debug!("Could not read {}: {}", OS_IMAGE_URL_CONFIGMAP, e);
            String::new()
        }
    }
}

/// First secret in `namespace` usable for pushing builds
pub async fn push_secret_name(
    client: &dyn ClusterClientTrait,
    namespace: &str,
    platform: &str,
) -> Result<String, ControllerError> {
    let secrets = client.list(&gvk_from("v1", "Secret"), Some(namespace), None).await?;
    let found = secrets
        .iter()
        .filter_map(|s| s.metadata.name.as_deref())
        .find(|name| name.contains(PUSH_SECRET_MARKER));
    match found {
        Some(name) => Ok(name.to_string()),
        None => {
            if platform == PLATFORM_OPENSHIFT {
                warn!("No {} secret in namespace {} yet", PUSH_SECRET_MARKER, namespace);
            } else {
                debug!("No {} secret in namespace {}", PUSH_SECRET_MARKER, namespace);
            }
            Ok(String::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_client::MockClusterClient;
    use kube::api::{ApiResource, DynamicObject};

    #[test]
    fn test_major_minor() {
        assert_eq!(major_minor("4.12.3"), "4.12");
        assert_eq!(major_minor("4.12"), "4.12");
        assert_eq!(major_minor(""), "");
    }

    #[tokio::test]
    async fn test_current_version_is_latest_completed() {
        let client = MockClusterClient::new();
        let ar = ApiResource::from_gvk(&gvk_from("config.openshift.io/v1", "ClusterVersion"));
        let mut cv = DynamicObject::new("version", &ar);
        cv.data = serde_json::json!({"status": {"history": [
            {"state": "Partial", "version": "4.13.0", "image": "img-4.13.0"},
            {"state": "Completed", "version": "4.12.3", "image": "img-4.12.3"},
            {"state": "Completed", "version": "4.11.9", "image": "img-4.11.9"}
        ]}});
        client.add_object(cv);

        let info = ClusterVersionInfo::from_cluster(&client).await.expect("readable");
        assert_eq!(info.version, "4.12.3");
        assert_eq!(info.major_minor, "4.12");
        assert_eq!(info.release_image, "img-4.12.3");
        assert_eq!(info.completed().len(), 2);
        assert_eq!(platform(&client).await.expect("groups"), PLATFORM_OPENSHIFT);
    }

    #[tokio::test]
    async fn test_plain_kubernetes() {
        let client = MockClusterClient::new();
        let info = ClusterVersionInfo::from_cluster(&client).await.expect("readable");
        assert_eq!(info, ClusterVersionInfo::default());
        assert_eq!(platform(&client).await.expect("groups"), PLATFORM_KUBERNETES);
        assert_eq!(push_secret_name(&client, "demo", PLATFORM_KUBERNETES).await.expect("listable"), "");
    }
}
