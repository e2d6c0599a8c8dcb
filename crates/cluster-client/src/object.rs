//! Helpers for moving between typed and dynamic objects

use crate::error::ClusterError;
use kube::api::{DynamicObject, GroupVersionKind, TypeMeta};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// An API resource as reported by discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResourceInfo {
    /// Group, version and kind
    pub gvk: GroupVersionKind,
    /// Plural resource name
    pub plural: String,
    /// Whether objects live in namespaces
    pub namespaced: bool,
    /// Whether the resource supports `list`
    pub listable: bool,
    /// Whether the resource supports `delete`
    pub deletable: bool,
}

/// Splits an `apiVersion` into group and version. The core group is empty.
pub fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}

/// Builds a GVK from `apiVersion` and `kind`
pub fn gvk_from(api_version: &str, kind: &str) -> GroupVersionKind {
    let (group, version) = split_api_version(api_version);
    GroupVersionKind::gvk(group, version, kind)
}

/// GVK of a dynamic object, taken from its type meta
pub fn gvk_of(object: &DynamicObject) -> Result<GroupVersionKind, ClusterError> {
    let types = object.types.as_ref().ok_or_else(|| {
        ClusterError::Invalid(format!(
            "object {} has no apiVersion/kind",
            object.metadata.name.as_deref().unwrap_or("<unnamed>")
        ))
    })?;
    Ok(gvk_from(&types.api_version, &types.kind))
}

/// GVK of a statically typed resource
pub fn gvk_for<K>() -> GroupVersionKind
where
    K: Resource<DynamicType = ()>,
{
    GroupVersionKind::gvk(&K::group(&()), &K::version(&()), &K::kind(&()))
}

/// Converts a typed resource into a dynamic object
pub fn to_dynamic<K>(object: &K) -> Result<DynamicObject, ClusterError>
where
    K: Resource<DynamicType = ()> + Serialize,
{
    let mut value = serde_json::to_value(object)?;
    if let Some(map) = value.as_object_mut() {
        map.insert("apiVersion".to_string(), K::api_version(&()).into());
        map.insert("kind".to_string(), K::kind(&()).into());
    }
    let mut dynamic: DynamicObject = serde_json::from_value(value)?;
    dynamic.types = Some(TypeMeta {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
    });
    Ok(dynamic)
}

/// Converts a dynamic object into a typed resource
pub fn from_dynamic<K>(object: DynamicObject) -> Result<K, ClusterError>
where
    K: DeserializeOwned,
{
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

/// Kind of a dynamic object, empty when absent
pub fn kind_of(object: &DynamicObject) -> &str {
    object.types.as_ref().map_or("", |t| t.kind.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;

    #[test]
    fn test_split_api_version() {
        assert_eq!(split_api_version("apps/v1"), ("apps", "v1"));
        assert_eq!(split_api_version("v1"), ("", "v1"));
    }

    #[test]
    fn test_typed_round_trip_keeps_type_meta() {
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some("demo-cm".to_string()),
                namespace: Some("demo".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let dynamic = to_dynamic(&cm).expect("convertible");
        assert_eq!(kind_of(&dynamic), "ConfigMap");
        assert_eq!(gvk_of(&dynamic).expect("typed").version, "v1");

        let back: ConfigMap = from_dynamic(dynamic).expect("convertible");
        assert_eq!(back.metadata.name.as_deref(), Some("demo-cm"));
    }
}
