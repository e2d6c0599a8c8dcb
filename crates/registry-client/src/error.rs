//! Registry client errors

use thiserror::Error;

/// Errors that can occur when reading images from a container registry
#[derive(Debug, Error)]
pub enum RegistryError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Registry returned an unexpected status
    #[error("registry API error: {0}")]
    Api(String),

    /// Token exchange or basic auth rejected
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Image, manifest or blob not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Image reference could not be parsed
    #[error("invalid image reference: {0}")]
    InvalidReference(String),

    /// Layer is not a (gzipped) tarball or is truncated
    #[error("layer error: {0}")]
    Layer(String),

    /// JSON serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error while decoding a layer
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RegistryError {
    /// Whether the image or one of its blobs does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound(_))
    }
}
