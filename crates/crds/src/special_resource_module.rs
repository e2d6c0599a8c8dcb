//! SpecialResourceModule CRD
//!
//! Like a SpecialResource, but rendered once per cluster version found in
//! the cluster and re-triggered by arbitrary watched resources.

use crate::common::{preserve_unknown_fields, HelmChart};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "sro.openshift.io",
    version = "v1beta1",
    kind = "SpecialResourceModule",
    plural = "specialresourcemodules",
    shortname = "srm",
    status = "SpecialResourceModuleStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct SpecialResourceModuleSpec {
    /// Namespace the rendered objects live in (defaults to the module name)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    /// Chart rendered for this module
    pub chart: HelmChart,

    /// Free-form values merged over the chart defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub set: Option<serde_json::Value>,

    /// Node labels targeted by this module
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selector: BTreeMap<String, String>,

    /// Additional resources whose changes trigger a reconcile
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub watch: Vec<WatchedResource>,
}

/// A resource path watched on behalf of a module
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct WatchedResource {
    /// API version (`group/version` or `version` for the core group)
    pub api_version: String,

    /// Kind
    pub kind: String,

    /// Object name, all objects when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Object namespace, cluster-wide when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// JSONPath into the object, e.g. `$.status.history[*].image`
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpecialResourceModuleStatus {
    /// Per cluster version reconcile progress
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub versions: BTreeMap<String, SpecialResourceModuleVersionStatus>,
}

/// Progress for one cluster version
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SpecialResourceModuleVersionStatus {
    /// Templates applied so far
    #[serde(default)]
    pub reconciled_templates: Vec<String>,

    /// All templates applied
    #[serde(default)]
    pub complete: bool,
}

impl SpecialResourceModule {
    /// Namespace managed by this module
    pub fn target_namespace(&self) -> String {
        if self.spec.namespace.is_empty() {
            self.metadata.name.clone().unwrap_or_default()
        } else {
            self.spec.namespace.clone()
        }
    }
}
