//! Release resolution against the image registry
//!
//! The release payload's top layer names the toolkit image
//! (`release-manifests/image-references`) and the cluster version
//! (`release-manifests/release-metadata`); the toolkit's top layer
//! describes the kernel it ships.

use super::{ReleaseInfo, ReleaseResolver};
use crate::error::ControllerError;
use crate::runtime_info::dtk;
use registry_client::RegistryClientTrait;
use std::sync::Arc;
use tracing::debug;

/// Resolves release images by reading their layers
pub struct RegistryReleaseResolver {
    registry: Arc<dyn RegistryClientTrait>,
}

impl std::fmt::Debug for RegistryReleaseResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryReleaseResolver").finish_non_exhaustive()
    }
}

impl RegistryReleaseResolver {
    /// Resolver reading from `registry`
    pub fn new(registry: Arc<dyn RegistryClientTrait>) -> Self {
        Self { registry }
    }
}

#[async_trait::async_trait]
impl ReleaseResolver for RegistryReleaseResolver {
    async fn resolve(&self, release_image: &str) -> Result<ReleaseInfo, ControllerError> {
        let registry = self.registry.as_ref();
        let metadata = dtk::release_metadata(registry, release_image).await?;
        let driver_toolkit = dtk::toolkit_from_release(registry, release_image).await?;
        debug!(
            "Release {} is {} with kernel {}",
            release_image, metadata.version, driver_toolkit.kernel_full_version
        );
        Ok(ReleaseInfo {
            cluster_version: metadata.version,
            driver_toolkit,
        })
    }
}
