//! Cluster client errors

use thiserror::Error;

/// Errors that can occur when talking to the Kubernetes API.
///
/// API responses are classified by status code so callers can drive the
/// create branch, retries and permission reporting without matching on
/// raw responses.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Object (or API resource) does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Object already exists
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Request rejected by RBAC
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Optimistic concurrency conflict, safe to retry
    #[error("conflict: {0}")]
    Conflict(String),

    /// Object failed validation
    #[error("invalid: {0}")]
    Invalid(String),

    /// Server or client side timeout
    #[error("timeout: {0}")]
    Timeout(String),

    /// Object could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Anything else
    #[error("{0}")]
    Unknown(String),
}

impl ClusterError {
    /// Whether the error is a 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }

    /// Whether the error is a 409 conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, ClusterError::Conflict(_))
    }

    /// Whether the error is a 403
    pub fn is_forbidden(&self) -> bool {
        matches!(self, ClusterError::Forbidden(_))
    }

    /// Whether retrying the same request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClusterError::Conflict(_) | ClusterError::Timeout(_) | ClusterError::Unknown(_)
        )
    }
}

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ref e) => {
                let message = e.message.clone();
                match e.code {
                    404 | 410 => ClusterError::NotFound(message),
                    403 => ClusterError::Forbidden(message),
                    409 if e.reason == "AlreadyExists" => ClusterError::AlreadyExists(message),
                    409 => ClusterError::Conflict(message),
                    400 | 422 => ClusterError::Invalid(message),
                    408 | 504 => ClusterError::Timeout(message),
                    _ => ClusterError::Unknown(err.to_string()),
                }
            }
            kube::Error::SerdeError(e) => ClusterError::Serialization(e),
            other => ClusterError::Unknown(other.to_string()),
        }
    }
}
