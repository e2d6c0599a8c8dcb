//! Driver-container verification against a future kernel

use crate::annotations::DRIVER_CONTAINER_VENDOR;
use crate::manifest::Manifest;
use crds::VerificationStatus;
use registry_client::{DriverToolkitRelease, RegistryClientTrait, RegistryError, DTK_RELEASE_PATH};
use std::collections::BTreeSet;
use tracing::debug;

/// Message when every driver container can be rebuilt on the cluster
pub const PAIRED_BUILDS: &str = "Verification successful, all driver-containers have paired BuildConfigs";
/// Message when every driver container image already targets the kernel
pub const IMAGES_PRESENT: &str =
    "Verification successful, all driver-containers for the next kernel version are present";
/// Message when the chart ships no driver container
pub const NOTHING_TO_VERIFY: &str = "Verification successful, no driver-containers found";

/// Outcome for one SpecialResource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// Status written to the PreflightValidation
    pub status: VerificationStatus,
    /// Status reason
    pub message: String,
}

impl Verdict {
    fn new(status: VerificationStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Checks that every driver container in `manifests` is usable on `kernel`.
///
/// A driver-container DaemonSet passes when a BuildConfig of the same
/// vendor is rendered alongside it, or when the topmost toolkit release
/// file in its image names `kernel`.
pub async fn verify(registry: &dyn RegistryClientTrait, manifests: &[Manifest], kernel: &str) -> Verdict {
    let build_vendors: BTreeSet<&str> = manifests
        .iter()
        .filter(|m| m.kind() == "BuildConfig")
        .filter_map(|m| m.annotation(DRIVER_CONTAINER_VENDOR))
        .collect();

    let mut driver_containers = 0;
    let mut pulled = 0;
    for manifest in manifests {
        if manifest.kind() != "DaemonSet" {
            continue;
        }
        let Some(vendor) = manifest.annotation(DRIVER_CONTAINER_VENDOR) else {
            continue;
        };
        driver_containers += 1;
        if build_vendors.contains(vendor) {
            debug!("DaemonSet {} has a paired BuildConfig for vendor {}", manifest.name(), vendor);
            continue;
        }

        let Some(image) = manifest.first_container_image() else {
            return Verdict::new(
                VerificationStatus::False,
                format!("DaemonSet {} has no container image", manifest.name()),
            );
        };

        pulled += 1;
        match image_kernel(registry, &image).await {
            Ok(Some(found)) if found == kernel => {}
            Ok(Some(found)) => {
                return Verdict::new(
                    VerificationStatus::False,
                    format!(
                        "image {} of DaemonSet {} is built for kernel {}, not {}",
                        image,
                        manifest.name(),
                        found,
                        kernel
                    ),
                );
            }
            Ok(None) => {
                return Verdict::new(
                    VerificationStatus::False,
                    format!("image {} carries no {}", image, DTK_RELEASE_PATH),
                );
            }
            Err(e) => {
                return Verdict::new(
                    VerificationStatus::Error,
                    format!("failed to inspect image {}: {}", image, e),
                );
            }
        }
    }

    match (driver_containers, pulled) {
        (0, _) => Verdict::new(VerificationStatus::True, NOTHING_TO_VERIFY),
        (_, 0) => Verdict::new(VerificationStatus::True, PAIRED_BUILDS),
        _ => Verdict::new(VerificationStatus::True, IMAGES_PRESENT),
    }
}

/// Kernel of the topmost toolkit release file in `image`
async fn image_kernel(registry: &dyn RegistryClientTrait, image: &str) -> Result<Option<String>, RegistryError> {
    let layers = registry.layers(image).await?;
    for digest in layers.iter().rev() {
        if let Some(raw) = registry.extract_file(image, digest, DTK_RELEASE_PATH).await? {
            let release: DriverToolkitRelease = serde_json::from_slice(&raw)?;
            return Ok(Some(release.kernel_version));
        }
    }
    Ok(None)
}
