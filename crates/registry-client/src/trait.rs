//! RegistryClient trait for mocking
//!
//! This trait abstracts the registry operations needed to inspect release
//! payloads and driver container images, allowing for easy mocking in tests.

use crate::error::RegistryError;

/// Trait for container registry operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait RegistryClientTrait: Send + Sync {
    /// Layer digests of an image, base layer first
    async fn layers(&self, image: &str) -> Result<Vec<String>, RegistryError>;

    /// Content of `path` inside one layer, `None` when the layer lacks it
    async fn extract_file(
        &self,
        image: &str,
        layer_digest: &str,
        path: &str,
    ) -> Result<Option<Vec<u8>>, RegistryError>;

    /// Reads `path` from the last (top) layer of an image
    async fn last_layer_file(
        &self,
        image: &str,
        path: &str,
    ) -> Result<Option<Vec<u8>>, RegistryError> {
        let layers = self.layers(image).await?;
        let Some(last) = layers.last() else {
            return Err(RegistryError::NotFound(format!("image {} has no layers", image)));
        };
        self.extract_file(image, last, path).await
    }

    /// Reads `path` from the topmost layer that contains it
    async fn find_file(&self, image: &str, path: &str) -> Result<Option<Vec<u8>>, RegistryError> {
        for digest in self.layers(image).await?.iter().rev() {
            if let Some(content) = self.extract_file(image, digest, path).await? {
                return Ok(Some(content));
            }
        }
        Ok(None)
    }
}
