//! SpecialResource CRD
//!
//! A cluster-scoped unit describing one special capability (driver,
//! device plugin, runtime enablement) to be rendered from a Helm chart
//! onto every kernel variant present in the cluster.

use crate::common::{preserve_unknown_fields, Condition, HelmChart};
use kube::CustomResource;
use kube::ResourceExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "sro.openshift.io",
    version = "v1beta1",
    kind = "SpecialResource",
    plural = "specialresources",
    shortname = "sr",
    status = "SpecialResourceStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SpecialResourceSpec {
    /// Enables verbose rendering output
    #[serde(default)]
    pub debug: bool,

    /// Chart rendered for this special resource
    pub chart: HelmChart,

    /// Namespace the rendered objects live in (defaults to the SR name)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    /// Free-form values merged over the chart defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub set: Option<serde_json::Value>,

    /// Driver container build and run configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_container: Option<DriverContainer>,

    /// Nodes targeted by this special resource
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    /// Special resources that must be reconciled first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<SpecialResourceDependency>,

    /// Extra environment handed to the chart
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment: Vec<EnvironmentVar>,
}

/// A dependency on another SpecialResource
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SpecialResourceDependency {
    /// Name of the SpecialResource (and of its bundled recipe)
    pub name: String,

    /// Optional image used by the dependency
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_reference: Option<String>,
}

/// Key/value passed as environment to the chart
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub struct EnvironmentVar {
    /// Variable name
    pub key: String,
    /// Variable value
    pub value: String,
}

/// Driver container description
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DriverContainer {
    /// Where the driver sources come from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<DriverContainerSource>,

    /// Build arguments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub build_args: Vec<DriverContainerArg>,

    /// Run arguments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub run_args: Vec<DriverContainerArg>,

    /// Artifacts copied into the driver container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<DriverContainerArtifacts>,
}

/// Source of the driver container build
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub struct DriverContainerSource {
    /// Git source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<DriverContainerGit>,
}

/// Git coordinates
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub struct DriverContainerGit {
    /// Git ref
    #[serde(default, rename = "ref")]
    pub ref_: String,
    /// Repository URI
    pub uri: String,
}

/// Named build or run argument
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub struct DriverContainerArg {
    /// Argument name
    pub name: String,
    /// Argument value
    pub value: String,
}

/// Artifacts mounted into the driver container
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DriverContainerArtifacts {
    /// Paths copied from the host
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub host_paths: Vec<DriverContainerArtifactPath>,

    /// Paths copied from images
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<DriverContainerArtifactImage>,

    /// Persistent volume claims
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub claims: Vec<DriverContainerArtifactClaim>,
}

/// Source/destination path pair
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DriverContainerArtifactPath {
    /// Path on the source
    pub source_path: String,
    /// Directory in the driver container
    pub destination_dir: String,
}

/// Artifacts pulled from an image
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub struct DriverContainerArtifactImage {
    /// Image name
    pub name: String,
    /// Image kind (`ImageStreamTag`, `DockerImage`)
    #[serde(default)]
    pub kind: String,
    /// Namespace of the image stream
    #[serde(default)]
    pub namespace: String,
    /// Paths to copy
    #[serde(default)]
    pub paths: Vec<DriverContainerArtifactPath>,
}

/// Persistent volume claim artifact
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DriverContainerArtifactClaim {
    /// Claim name
    pub name: String,
    /// Mount path in the driver container
    pub mount_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpecialResourceStatus {
    /// Name of the last stage that began reconciling
    #[serde(default)]
    pub state: String,

    /// Ready / Progressing / Errored conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl SpecialResource {
    /// Namespace managed by this special resource.
    ///
    /// The SR name doubles as the namespace unless `spec.namespace` is set.
    pub fn target_namespace(&self) -> String {
        if self.spec.namespace.is_empty() {
            self.name_any()
        } else {
            self.spec.namespace.clone()
        }
    }

    /// Current stage name, empty when never reconciled
    pub fn state(&self) -> &str {
        self.status.as_ref().map_or("", |s| s.state.as_str())
    }

    /// Whether a deletion has been requested
    pub fn is_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}
