//! Driver toolkit discovery
//!
//! The toolkit image is looked up in the cluster's `driver-toolkit`
//! image stream first and in the release payload second. Its kernel and
//! OS versions come from `etc/driver-toolkit-release.json` inside the
//! image.

use super::DriverToolkitEntry;
use crate::error::ControllerError;
use cluster_client::{gvk_from, ClusterClientTrait};
use registry_client::{
    DriverToolkitRelease, ImageReferences, RegistryClientTrait, RegistryError, ReleaseMetadata,
    DTK_RELEASE_PATH, IMAGE_REFERENCES_PATH, RELEASE_METADATA_PATH,
};
use serde::Deserialize;
use tracing::{debug, warn};

/// Namespace and name of the toolkit image stream
const IMAGE_STREAM_NAMESPACE: &str = "openshift";
const IMAGE_STREAM_NAME: &str = "driver-toolkit";

/// Payload component carrying the toolkit image
pub const DTK_TAG: &str = "driver-toolkit";

#[derive(Debug, Default, Deserialize)]
struct ImageStreamStatus {
    #[serde(default)]
    tags: Vec<NamedTagEventList>,
}

#[derive(Debug, Deserialize)]
struct NamedTagEventList {
    tag: String,
    #[serde(default)]
    items: Vec<TagEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TagEvent {
    #[serde(default)]
    created: String,
    docker_image_reference: String,
}

/// Picks the toolkit image from an image stream status.
///
/// The tag named after the RHCOS build wins; otherwise the most recently
/// created item across all tags.
fn pick_stream_image(status: &ImageStreamStatus, os_build: Option<&str>) -> Option<String> {
    if let Some(build) = os_build {
        if let Some(item) = status
            .tags
            .iter()
            .find(|t| t.tag == build)
            .and_then(|t| t.items.first())
        {
            return Some(item.docker_image_reference.clone());
        }
    }
    let mut items: Vec<&TagEvent> = status.tags.iter().flat_map(|t| t.items.iter()).collect();
    // RFC 3339 timestamps sort lexically
    items.sort_by(|a, b| b.created.cmp(&a.created));
    items.first().map(|i| i.docker_image_reference.clone())
}

/// Toolkit image from the `openshift/driver-toolkit` image stream, if any
pub async fn image_from_stream(
    client: &dyn ClusterClientTrait,
    os_build: Option<&str>,
) -> Result<Option<String>, ControllerError> {
    let gvk = gvk_from("image.openshift.io/v1", "ImageStream");
    let stream = match client.get(&gvk, Some(IMAGE_STREAM_NAMESPACE), IMAGE_STREAM_NAME).await {
        Ok(stream) => stream,
        Err(e) if e.is_not_found() => None,
        Err(e) => return Err(ControllerError::cluster("ImageStream", IMAGE_STREAM_NAME, e)),
    };
    let Some(stream) = stream else {
        return Ok(None);
    };
    let status: ImageStreamStatus = stream
        .data
        .get("status")
        .cloned()
        .map(serde_json::from_value)
        .transpose()?
        .unwrap_or_default();
    Ok(pick_stream_image(&status, os_build))
}

async fn last_layer_file(
    registry: &dyn RegistryClientTrait,
    image: &str,
    path: &str,
) -> Result<Vec<u8>, ControllerError> {
    registry
        .last_layer_file(image, path)
        .await?
        .ok_or_else(|| {
            ControllerError::Registry(RegistryError::NotFound(format!("{} in {}", path, image)))
        })
}

/// Version of a release payload, from `release-manifests/release-metadata`
pub async fn release_metadata(
    registry: &dyn RegistryClientTrait,
    release_image: &str,
) -> Result<ReleaseMetadata, ControllerError> {
    let raw = last_layer_file(registry, release_image, RELEASE_METADATA_PATH).await?;
    Ok(serde_json::from_slice(&raw)?)
}

/// Pull spec of the toolkit image shipped in a release payload
pub async fn image_from_release(
    registry: &dyn RegistryClientTrait,
    release_image: &str,
) -> Result<String, ControllerError> {
    let raw = last_layer_file(registry, release_image, IMAGE_REFERENCES_PATH).await?;
    let references: ImageReferences = serde_yaml::from_slice(&raw)?;
    references
        .image_for(DTK_TAG)
        .map(str::to_string)
        .ok_or_else(|| {
            ControllerError::Registry(RegistryError::NotFound(format!(
                "{} tag in {} of {}",
                DTK_TAG, IMAGE_REFERENCES_PATH, release_image
            )))
        })
}

/// Reads the toolkit release descriptor out of the top layer of the toolkit image
pub async fn describe_toolkit(
    registry: &dyn RegistryClientTrait,
    dtk_image: &str,
) -> Result<DriverToolkitEntry, ControllerError> {
    let raw = last_layer_file(registry, dtk_image, DTK_RELEASE_PATH).await?;
    let release: DriverToolkitRelease = serde_json::from_slice(&raw)?;
    Ok(DriverToolkitEntry {
        image_url: dtk_image.to_string(),
        kernel_full_version: release.kernel_version,
        rt_kernel_full_version: release.rt_kernel_version,
        os_version: release.rhel_version,
    })
}

/// Toolkit of a release payload: image-references, then the descriptor
pub async fn toolkit_from_release(
    registry: &dyn RegistryClientTrait,
    release_image: &str,
) -> Result<DriverToolkitEntry, ControllerError> {
    let dtk_image = image_from_release(registry, release_image).await?;
    describe_toolkit(registry, &dtk_image).await
}

/// Best-effort toolkit lookup for one node variant.
///
/// Failures are logged and yield whatever was found so far; a missing
/// toolkit only matters to charts that build on the cluster.
pub async fn lookup(
    client: &dyn ClusterClientTrait,
    registry: Option<&dyn RegistryClientTrait>,
    os_build: Option<&str>,
    release_image: Option<&str>,
) -> DriverToolkitEntry {
    let image = match image_from_stream(client, os_build).await {
        Ok(Some(image)) => Some(image),
        Ok(None) => None,
        Err(e) => {
            warn!("Could not read the driver-toolkit image stream: {}", e);
            None
        }
    };

    let Some(registry) = registry else {
        return DriverToolkitEntry {
            image_url: image.unwrap_or_default(),
            ..Default::default()
        };
    };

    let image = match (image, release_image) {
        (Some(image), _) => image,
        (None, Some(release)) => match image_from_release(registry, release).await {
            Ok(image) => image,
            Err(e) => {
                warn!("No driver-toolkit found in release {}: {}", release, e);
                return DriverToolkitEntry::default();
            }
        },
        (None, None) => {
            debug!("No driver-toolkit image stream and no release image");
            return DriverToolkitEntry::default();
        }
    };

    match describe_toolkit(registry, &image).await {
        Ok(entry) => entry,
        Err(e) => {
            warn!("Could not read {} from {}: {}", DTK_RELEASE_PATH, image, e);
            DriverToolkitEntry {
                image_url: image,
                ..Default::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_client::MockClusterClient;
    use kube::api::{ApiResource, DynamicObject};
    use registry_client::MockRegistryClient;

    const RELEASE: &str = "quay.io/openshift-release-dev/ocp-release:4.12.3-x86_64";
    const DTK: &str = "quay.io/openshift-release-dev/ocp-v4.0-art-dev@sha256:dtk";

    fn registry() -> MockRegistryClient {
        let registry = MockRegistryClient::new();
        let references = serde_json::json!({
            "spec": {"tags": [{"name": "driver-toolkit", "from": {"kind": "DockerImage", "name": DTK}}]}
        })
        .to_string();
        registry.add_image(
            RELEASE,
            vec![
                vec![],
                vec![
                    (IMAGE_REFERENCES_PATH, references.as_bytes()),
                    (RELEASE_METADATA_PATH, br#"{"version":"4.12.3"}"#.as_slice()),
                ],
            ],
        );
        registry.add_image(
            DTK,
            vec![vec![(
                DTK_RELEASE_PATH,
                br#"{"KERNEL_VERSION":"4.18.0-372.43.1.el8_6.x86_64","RT_KERNEL_VERSION":"4.18.0-372.43.1.rt7.200.el8_6.x86_64","RHEL_VERSION":"8.6"}"#
                    .as_slice(),
            )]],
        );
        registry
    }

    #[tokio::test]
    async fn test_toolkit_from_release() {
        let registry = registry();
        let entry = toolkit_from_release(&registry, RELEASE).await.expect("present");
        assert_eq!(entry.image_url, DTK);
        assert_eq!(entry.kernel_full_version, "4.18.0-372.43.1.el8_6.x86_64");
        assert_eq!(entry.os_version, "8.6");

        let metadata = release_metadata(&registry, RELEASE).await.expect("present");
        assert_eq!(metadata.version, "4.12.3");
    }

    #[tokio::test]
    async fn test_lookup_prefers_image_stream() {
        let client = MockClusterClient::new();
        let ar = ApiResource::from_gvk(&gvk_from("image.openshift.io/v1", "ImageStream"));
        let mut stream = DynamicObject::new(IMAGE_STREAM_NAME, &ar).within(IMAGE_STREAM_NAMESPACE);
        stream.data = serde_json::json!({"status": {"tags": [
            {"tag": "412.86.202301311551-0", "items": [{"created": "2023-01-31T00:00:00Z", "dockerImageReference": "old"}]},
            {"tag": "412.86.202302091419-0", "items": [{"created": "2023-02-09T00:00:00Z", "dockerImageReference": DTK}]}
        ]}});
        client.add_object(stream);

        let entry = lookup(&client, Some(&registry()), None, None).await;
        assert_eq!(entry.image_url, DTK);
        assert_eq!(entry.os_version, "8.6");

        let pinned = lookup(&client, None, Some("412.86.202301311551-0"), None).await;
        assert_eq!(pinned.image_url, "old");
    }

    #[tokio::test]
    async fn test_lookup_is_best_effort() {
        let client = MockClusterClient::new();
        let entry = lookup(&client, Some(&MockRegistryClient::new()), None, Some(RELEASE)).await;
        assert_eq!(entry, DriverToolkitEntry::default());
    }
}
