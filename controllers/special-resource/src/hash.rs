//! Content hashing
//!
//! The hash is FNV-1a 64 over the canonical JSON of an object with the
//! hash annotation itself and server-populated metadata removed. JSON
//! object keys are sorted, so the form is stable across renders.

use crate::annotations;
use crate::error::ControllerError;
use fnv::FnvHasher;
use kube::api::DynamicObject;
use std::hash::Hasher;

/// Metadata fields owned by the API server
const SERVER_FIELDS: &[&str] = &[
    "resourceVersion",
    "uid",
    "creationTimestamp",
    "generation",
    "managedFields",
    "selfLink",
];

/// FNV-1a 64 of raw bytes
pub fn fnv64a(bytes: &[u8]) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(bytes);
    hasher.finish()
}

/// Suffix appended to kernel-affine object names
pub fn kernel_affine_suffix(os_major_minor: &str, kernel_full_version: &str) -> String {
    let kernel = kernel_full_version.replace('_', "-");
    format!("{:x}", fnv64a(format!("{}-{}", os_major_minor, kernel).as_bytes()))
}

/// Content hash of a desired object
pub fn content_hash(object: &DynamicObject) -> Result<u64, ControllerError> {
    let mut value = serde_json::to_value(object)?;
    if let Some(metadata) = value.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        for field in SERVER_FIELDS {
            metadata.remove(*field);
        }
        let drop_annotations = match metadata.get_mut("annotations").and_then(|a| a.as_object_mut()) {
            Some(map) => {
                map.remove(annotations::HASH);
                map.is_empty()
            }
            None => false,
        };
        if drop_annotations {
            metadata.remove("annotations");
        }
    }
    if let Some(map) = value.as_object_mut() {
        map.remove("status");
    }
    Ok(fnv64a(serde_json::to_string(&value)?.as_bytes()))
}

/// Hash recorded on a live object, if any
pub fn recorded_hash(object: &DynamicObject) -> Option<u64> {
    object
        .metadata
        .annotations
        .as_ref()?
        .get(annotations::HASH)?
        .parse()
        .ok()
}

/// Records the content hash in the object's annotations
pub fn stamp(object: &mut DynamicObject) -> Result<u64, ControllerError> {
    let hash = content_hash(object)?;
    object
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(annotations::HASH.to_string(), hash.to_string());
    Ok(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::{ObjectMeta, TypeMeta};

    fn object(data: serde_json::Value) -> DynamicObject {
        DynamicObject {
            types: Some(TypeMeta {
                api_version: "v1".to_string(),
                kind: "ConfigMap".to_string(),
            }),
            metadata: ObjectMeta {
                name: Some("demo-cm".to_string()),
                ..Default::default()
            },
            data,
        }
    }

    #[test]
    fn test_fnv64a_known_vector() {
        // FNV-1a 64 of the empty input is the offset basis
        assert_eq!(fnv64a(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv64a(b"a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn test_hash_ignores_its_own_annotation_and_server_fields() {
        let mut desired = object(serde_json::json!({"data": {"a": "b"}}));
        let first = stamp(&mut desired).expect("hashable");

        let mut live = desired.clone();
        live.metadata.resource_version = Some("42".to_string());
        live.metadata.uid = Some("uid".to_string());
        assert_eq!(content_hash(&live).expect("hashable"), first);
        assert_eq!(recorded_hash(&live), Some(first));
    }

    #[test]
    fn test_hash_changes_with_body() {
        let a = content_hash(&object(serde_json::json!({"data": {"a": "b"}}))).expect("hashable");
        let b = content_hash(&object(serde_json::json!({"data": {"a": "c"}}))).expect("hashable");
        assert_ne!(a, b);
    }

    #[test]
    fn test_kernel_affine_suffix_sanitizes_underscores() {
        assert_eq!(
            kernel_affine_suffix("rhel8.4", "4.18.0-305.19.1.el8_4.x86_64"),
            kernel_affine_suffix("rhel8.4", "4.18.0-305.19.1.el8-4.x86_64"),
        );
        assert_ne!(
            kernel_affine_suffix("rhel9.0", "5.14.0-70.el9.x86_64"),
            kernel_affine_suffix("rhel9.2", "5.14.0-284.el9.x86_64"),
        );
    }
}
