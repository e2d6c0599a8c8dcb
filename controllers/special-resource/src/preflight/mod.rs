//! Preflight validation
//!
//! Decides, for a target release image, whether every SpecialResource
//! would still have a usable driver container after the upgrade.

pub mod release;
pub mod verify;

use crate::error::ControllerError;
use crate::runtime_info::kernel::{self, OsVersion};
use crate::runtime_info::{cluster, DriverToolkitEntry, NodeVersion, RuntimeInformation};
use std::collections::HashMap;

/// What a release image ships
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseInfo {
    /// Cluster version of the payload
    pub cluster_version: String,
    /// Driver toolkit of the payload
    pub driver_toolkit: DriverToolkitEntry,
}

impl ReleaseInfo {
    /// OS shipped with the release, from the toolkit's RHEL version
    pub fn os(&self) -> Result<OsVersion, ControllerError> {
        let (major, minor) = self
            .driver_toolkit
            .os_version
            .split_once('.')
            .ok_or_else(|| {
                ControllerError::InvalidConfig(format!(
                    "toolkit {} reports no RHEL version",
                    self.driver_toolkit.image_url
                ))
            })?;
        kernel::render_operating_system("rhel", major, minor)
    }

    /// Runtime information as it will look after the upgrade: a single
    /// kernel variant, the one the release ships.
    pub fn runtime(&self, current: &RuntimeInformation) -> Result<RuntimeInformation, ControllerError> {
        let os = self.os()?;
        let kernel = self.driver_toolkit.kernel_full_version.clone();
        let node_version = NodeVersion {
            os_version: os.decimal.clone(),
            os_major: os.major.clone(),
            os_major_minor: os.major_minor.clone(),
            cluster_version: self.cluster_version.clone(),
            driver_toolkit: self.driver_toolkit.clone(),
        };
        let mut info = current.clone();
        info.cluster_version = self.cluster_version.clone();
        info.cluster_upgrade_info = [(kernel.clone(), node_version.clone())].into_iter().collect();
        let mut info = info.for_kernel(&kernel, &node_version)?;
        info.cluster_version_major_minor = cluster::major_minor(&self.cluster_version);
        Ok(info)
    }
}

/// Resolves a release image to what it ships
#[async_trait::async_trait]
pub trait ReleaseResolver: Send + Sync {
    /// Release information of `release_image`
    async fn resolve(&self, release_image: &str) -> Result<ReleaseInfo, ControllerError>;
}

/// Per-reconcile memo in front of a resolver
pub struct ResolverCache<'a> {
    inner: &'a dyn ReleaseResolver,
    cache: HashMap<String, ReleaseInfo>,
}

impl std::fmt::Debug for ResolverCache<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverCache")
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl<'a> ResolverCache<'a> {
    /// Empty cache over `inner`
    pub fn new(inner: &'a dyn ReleaseResolver) -> Self {
        Self {
            inner,
            cache: HashMap::new(),
        }
    }

    /// Resolves once per image
    pub async fn resolve(&mut self, release_image: &str) -> Result<ReleaseInfo, ControllerError> {
        if let Some(info) = self.cache.get(release_image) {
            return Ok(info.clone());
        }
        let info = self.inner.resolve(release_image).await?;
        self.cache.insert(release_image.to_string(), info.clone());
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::StaticReleases;

    fn release() -> ReleaseInfo {
        ReleaseInfo {
            cluster_version: "4.13.1".to_string(),
            driver_toolkit: DriverToolkitEntry {
                image_url: "quay.io/dtk@sha256:1".to_string(),
                kernel_full_version: "5.14.0-284.el9.x86_64".to_string(),
                rt_kernel_full_version: String::new(),
                os_version: "9.2".to_string(),
            },
        }
    }

    #[test]
    fn test_runtime_after_upgrade() {
        let current = RuntimeInformation {
            kernel_full_version: "4.18.0-372.el8.x86_64".to_string(),
            platform: "OCP".to_string(),
            ..Default::default()
        };
        let info = release().runtime(&current).expect("runtime");
        assert_eq!(info.kernel_full_version, "5.14.0-284.el9.x86_64");
        assert_eq!(info.kernel_patch_version, "5.14.0-284");
        assert_eq!(info.operating_system_major_minor, "rhel9.2");
        assert_eq!(info.cluster_version_major_minor, "4.13");
        assert_eq!(info.driver_toolkit_image, "quay.io/dtk@sha256:1");
        assert_eq!(info.cluster_upgrade_info.len(), 1);
        assert_eq!(info.platform, "OCP");
    }

    #[test]
    fn test_missing_rhel_version() {
        let mut info = release();
        info.driver_toolkit.os_version.clear();
        assert!(info.runtime(&RuntimeInformation::default()).is_err());
    }

    #[tokio::test]
    async fn test_cache_resolves_once() {
        let releases = StaticReleases::default();
        releases.insert("quay.io/release:4.13.1", release());
        let mut cache = ResolverCache::new(&releases);
        cache.resolve("quay.io/release:4.13.1").await.expect("resolved");
        cache.resolve("quay.io/release:4.13.1").await.expect("resolved");
        assert_eq!(releases.lookups(), 1);
    }
}
