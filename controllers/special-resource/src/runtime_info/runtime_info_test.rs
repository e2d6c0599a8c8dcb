//! Unit tests for runtime information gathering

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::test_utils::*;
    use cluster_client::MockClusterClient;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_one_entry_per_kernel() {
        let client = MockClusterClient::new();
        add_cluster_version(&client, "4.12.3", "quay.io/release:4.12.3");
        client.add_node(test_node("w1", "5.14.0-70.el9.x86_64", ("rhel", "9", "0"), &[]));
        client.add_node(test_node("w2", "5.14.0-70.el9.x86_64", ("rhel", "9", "0"), &[]));
        client.add_node(test_node("w3", "5.14.0-284.el9.x86_64", ("rhel", "9", "2"), &[]));

        let mut ctx = test_context(&client, &BTreeMap::new());
        let info = gather(&mut ctx, None, "demo", serde_json::json!({"metadata": {"name": "demo"}}))
            .await
            .expect("gathered");

        assert_eq!(info.cluster_upgrade_info.len(), 2);
        assert_eq!(info.cluster_version, "4.12.3");
        assert_eq!(info.cluster_version_major_minor, "4.12");
        assert_eq!(info.platform, "OCP");
        let newer = &info.cluster_upgrade_info["5.14.0-284.el9.x86_64"];
        assert_eq!(newer.os_major_minor, "rhel9.2");
        assert_eq!(newer.cluster_version, "4.12.3");
    }

    #[tokio::test]
    async fn test_tainted_nodes_do_not_contribute_kernels() {
        let client = MockClusterClient::new();
        client.add_node(test_node("w1", "5.14.0-70.el9.x86_64", ("rhel", "9", "0"), &[]));
        client.add_node(tainted(test_node("w2", "5.14.0-284.el9.x86_64", ("rhel", "9", "2"), &[]), "NoExecute"));

        let mut ctx = test_context(&client, &BTreeMap::new());
        let info = gather(&mut ctx, None, "demo", serde_json::Value::Null).await.expect("gathered");
        assert_eq!(info.cluster_upgrade_info.len(), 1);
        assert_eq!(info.kernel_full_version, "5.14.0-70.el9.x86_64");
        assert_eq!(info.kernel_patch_version, "5.14.0-70");
        assert_eq!(info.platform, "K8S");
    }

    #[tokio::test]
    async fn test_selector_restricts_nodes() {
        let client = MockClusterClient::new();
        client.add_node(test_node("gpu", "5.14.0-70.el9.x86_64", ("rhel", "9", "0"), &[("gpu", "true")]));
        client.add_node(test_node("cpu", "5.14.0-284.el9.x86_64", ("rhel", "9", "2"), &[]));

        let selector = BTreeMap::from([("gpu".to_string(), "true".to_string())]);
        let mut ctx = test_context(&client, &selector);
        let info = gather(&mut ctx, None, "demo", serde_json::Value::Null).await.expect("gathered");
        assert_eq!(info.cluster_upgrade_info.keys().collect::<Vec<_>>(), vec!["5.14.0-70.el9.x86_64"]);
    }

    #[test]
    fn test_for_kernel_substitutes_variant_fields() {
        let base = RuntimeInformation {
            kernel_full_version: "5.14.0-70.el9.x86_64".to_string(),
            ..Default::default()
        };
        let variant = NodeVersion {
            os_version: "9.2".to_string(),
            os_major: "rhel9".to_string(),
            os_major_minor: "rhel9.2".to_string(),
            cluster_version: "4.13.1".to_string(),
            driver_toolkit: DriverToolkitEntry {
                image_url: "dtk@sha256:abc".to_string(),
                ..Default::default()
            },
        };
        let info = base.for_kernel("5.14.0-284.el9.x86_64", &variant).expect("valid kernel");
        assert_eq!(info.kernel_full_version, "5.14.0-284.el9.x86_64");
        assert_eq!(info.kernel_patch_version, "5.14.0-284");
        assert_eq!(info.operating_system_decimal, "9.2");
        assert_eq!(info.cluster_version_major_minor, "4.13");
        assert_eq!(info.driver_toolkit_image, "dtk@sha256:abc");
    }

    #[test]
    fn test_values_are_camel_case() {
        let values = RuntimeInformation::default().to_values().expect("serializable");
        assert!(values.get("kernelFullVersion").is_some());
        assert!(values.get("osImageURL").is_some());
        assert_eq!(values["groupName"]["driverContainer"], "driver-container");
    }
}
