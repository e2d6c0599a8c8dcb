//! Integration tests for the registry client
//!
//! These tests require network access to a public registry.
//! Set SRO_TEST_IMAGE to override the image used.

use registry_client::{RegistryClient, RegistryClientTrait};

fn test_image() -> String {
    std::env::var("SRO_TEST_IMAGE").unwrap_or_else(|_| "quay.io/prometheus/busybox:latest".to_string())
}

#[tokio::test]
#[ignore] // Requires registry access
async fn test_list_layers() {
    let client = RegistryClient::new(false).expect("Failed to create client");

    let layers = client.layers(&test_image()).await.expect("Failed to list layers");
    assert!(!layers.is_empty());
}

#[tokio::test]
#[ignore]
async fn test_find_os_release() {
    let client = RegistryClient::new(false).expect("Failed to create client");

    let found = client
        .find_file(&test_image(), "etc/os-release")
        .await
        .expect("Failed to read layers");
    println!("os-release present: {}", found.is_some());
}
