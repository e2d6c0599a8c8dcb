//! Mock RegistryClient for unit testing
//!
//! Images are lists of in-memory layers, each a map of file paths to
//! contents. Every layer listing is recorded so tests can assert that no
//! registry reads happened.

use crate::error::RegistryError;
use crate::registry_trait::RegistryClientTrait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

type Layer = BTreeMap<String, Vec<u8>>;

/// Mock RegistryClient for testing
#[derive(Debug, Clone, Default)]
pub struct MockRegistryClient {
    pub(crate) images: Arc<Mutex<HashMap<String, Vec<(String, Layer)>>>>,
    pub(crate) reads: Arc<Mutex<Vec<String>>>,
}

impl MockRegistryClient {
    /// Create an empty mock registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an image whose layers hold the given files, base layer first
    pub fn add_image(&self, image: &str, layers: Vec<Vec<(&str, &[u8])>>) {
        let layers = layers
            .into_iter()
            .enumerate()
            .map(|(i, files)| {
                let digest = format!("sha256:{}-{}", image.replace(['/', ':', '@'], "_"), i);
                let files = files
                    .into_iter()
                    .map(|(p, c)| (p.trim_start_matches('/').to_string(), c.to_vec()))
                    .collect();
                (digest, files)
            })
            .collect();
        self.images.lock().unwrap().insert(image.to_string(), layers);
    }

    /// Images whose layers were listed, in call order
    pub fn reads(&self) -> Vec<String> {
        self.reads.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl RegistryClientTrait for MockRegistryClient {
    async fn layers(&self, image: &str) -> Result<Vec<String>, RegistryError> {
        self.reads.lock().unwrap().push(image.to_string());
        self.images
            .lock()
            .unwrap()
            .get(image)
            .map(|layers| layers.iter().map(|(d, _)| d.clone()).collect())
            .ok_or_else(|| RegistryError::NotFound(format!("image {}", image)))
    }

    async fn extract_file(
        &self,
        image: &str,
        layer_digest: &str,
        path: &str,
    ) -> Result<Option<Vec<u8>>, RegistryError> {
        let images = self.images.lock().unwrap();
        let layers = images
            .get(image)
            .ok_or_else(|| RegistryError::NotFound(format!("image {}", image)))?;
        let (_, files) = layers
            .iter()
            .find(|(d, _)| d == layer_digest)
            .ok_or_else(|| RegistryError::NotFound(format!("blob {}", layer_digest)))?;
        Ok(files.get(path.trim_start_matches('/')).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_find_file_prefers_top_layer() {
        let mock = MockRegistryClient::new();
        mock.add_image(
            "quay.io/drv:1",
            vec![
                vec![("etc/version", b"old".as_slice())],
                vec![("etc/other", b"x".as_slice())],
                vec![("etc/version", b"new".as_slice())],
            ],
        );
        let found = mock.find_file("quay.io/drv:1", "etc/version").await.expect("readable");
        assert_eq!(found.as_deref(), Some(b"new".as_slice()));

        let last = mock
            .last_layer_file("quay.io/drv:1", "etc/other")
            .await
            .expect("readable");
        assert!(last.is_none());
        assert_eq!(mock.reads().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_image() {
        let mock = MockRegistryClient::new();
        assert!(mock.layers("quay.io/missing:1").await.is_err());
    }
}
