//! Registry and release payload data models

use crate::error::RegistryError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Registry used when an image reference names no host
pub const DEFAULT_REGISTRY: &str = "registry-1.docker.io";

/// Path of the image references stream inside a release payload
pub const IMAGE_REFERENCES_PATH: &str = "release-manifests/image-references";

/// Path of the release metadata inside a release payload
pub const RELEASE_METADATA_PATH: &str = "release-manifests/release-metadata";

/// Path of the release descriptor inside a driver-toolkit image
pub const DTK_RELEASE_PATH: &str = "etc/driver-toolkit-release.json";

/// A parsed `registry/repository[:tag][@digest]` reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry host (with port)
    pub registry: String,
    /// Repository path
    pub repository: String,
    /// Tag or digest
    pub reference: String,
}

impl ImageReference {
    /// Parses an image pull spec.
    ///
    /// The first path component is a registry host when it contains a `.` or
    /// `:` or equals `localhost`. Digests win over tags; no tag means `latest`.
    pub fn parse(image: &str) -> Result<Self, RegistryError> {
        let image = image.trim();
        if image.is_empty() {
            return Err(RegistryError::InvalidReference("empty image".to_string()));
        }

        let (name, reference) = if let Some((name, digest)) = image.split_once('@') {
            (name, digest.to_string())
        } else {
            let last_slash = image.rfind('/').map_or(0, |i| i + 1);
            match image[last_slash..].rfind(':') {
                Some(i) => (&image[..last_slash + i], image[last_slash + i + 1..].to_string()),
                None => (image, "latest".to_string()),
            }
        };

        let (registry, repository) = match name.split_once('/') {
            Some((host, rest))
                if host.contains('.') || host.contains(':') || host == "localhost" =>
            {
                (host.to_string(), rest.to_string())
            }
            Some(_) => (DEFAULT_REGISTRY.to_string(), name.to_string()),
            None => (DEFAULT_REGISTRY.to_string(), format!("library/{}", name)),
        };

        if repository.is_empty() || reference.is_empty() {
            return Err(RegistryError::InvalidReference(image.to_string()));
        }

        Ok(Self {
            registry,
            repository,
            reference,
        })
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sep = if self.reference.contains(':') { '@' } else { ':' };
        write!(f, "{}/{}{}{}", self.registry, self.repository, sep, self.reference)
    }
}

/// Content descriptor of a manifest or layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type
    #[serde(default)]
    pub media_type: String,
    /// Content digest
    pub digest: String,
    /// Size in bytes
    #[serde(default)]
    pub size: u64,
    /// Platform, set on index entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

/// Platform of an index entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Platform {
    /// CPU architecture
    pub architecture: String,
    /// Operating system
    pub os: String,
}

/// Image manifest or manifest list / OCI index
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Schema version (2)
    #[serde(default)]
    pub schema_version: u32,
    /// Media type
    #[serde(default)]
    pub media_type: String,
    /// Layers, ordered base first
    #[serde(default)]
    pub layers: Vec<Descriptor>,
    /// Per-platform manifests when this is a list
    #[serde(default)]
    pub manifests: Vec<Descriptor>,
}

impl Manifest {
    /// Whether this is a manifest list / OCI index
    pub fn is_index(&self) -> bool {
        !self.manifests.is_empty() && self.layers.is_empty()
    }

    /// Picks the linux/amd64 entry of an index, else the first one
    pub fn platform_manifest(&self) -> Option<&Descriptor> {
        self.manifests
            .iter()
            .find(|d| {
                d.platform
                    .as_ref()
                    .is_some_and(|p| p.os == "linux" && p.architecture == "amd64")
            })
            .or_else(|| self.manifests.first())
    }
}

/// `etc/driver-toolkit-release.json` of a driver-toolkit image
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DriverToolkitRelease {
    /// Kernel the toolkit builds against
    #[serde(rename = "KERNEL_VERSION", default)]
    pub kernel_version: String,
    /// Realtime kernel the toolkit builds against
    #[serde(rename = "RT_KERNEL_VERSION", default)]
    pub rt_kernel_version: String,
    /// RHEL version of the toolkit, e.g. `8.4`
    #[serde(rename = "RHEL_VERSION", default)]
    pub rhel_version: String,
}

/// `release-manifests/image-references`, an image stream listing payload images
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ImageReferences {
    /// Image stream spec
    #[serde(default)]
    pub spec: ImageReferencesSpec,
}

/// Image stream spec
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ImageReferencesSpec {
    /// One tag per payload component
    #[serde(default)]
    pub tags: Vec<ImageReferenceTag>,
}

/// A payload component
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageReferenceTag {
    /// Component name, e.g. `driver-toolkit`
    pub name: String,
    /// Component image
    pub from: ImageReferenceFrom,
}

/// Image the tag points at
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageReferenceFrom {
    /// `DockerImage`
    #[serde(default)]
    pub kind: String,
    /// Pull spec
    pub name: String,
}

impl ImageReferences {
    /// Pull spec of the named payload component
    pub fn image_for(&self, tag: &str) -> Option<&str> {
        self.spec
            .tags
            .iter()
            .find(|t| t.name == tag)
            .map(|t| t.from.name.as_str())
    }
}

/// `release-manifests/release-metadata`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ReleaseMetadata {
    /// Cluster version of the payload, e.g. `4.12.3`
    #[serde(default)]
    pub version: String,
}

/// `.dockerconfigjson` content of a pull secret
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DockerConfig {
    /// Credentials per registry host
    #[serde(default)]
    pub auths: BTreeMap<String, DockerAuth>,
}

/// Credentials for one registry
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DockerAuth {
    /// base64 of `user:password`
    #[serde(default)]
    pub auth: String,
}
