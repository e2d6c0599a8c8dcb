//! Controller-specific error types.
//!
//! API failures are wrapped with the object they concern, the state
//! template being applied and finally the SpecialResource being
//! reconciled, so the outermost layer can log a single line.

use cluster_client::ClusterError;
use registry_client::RegistryError;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in the special resource controllers.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error on a specific object
    #[error("{kind} {name}: {source}")]
    Cluster {
        /// Kind of the object
        kind: String,
        /// Name of the object
        name: String,
        /// Underlying API error
        #[source]
        source: ClusterError,
    },

    /// Kubernetes API error not tied to one object
    #[error("Kubernetes error: {0}")]
    Api(#[from] ClusterError),

    /// Container registry error
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Chart could not be loaded or rendered
    #[error("chart error: {0}")]
    Chart(String),

    /// Failure while applying one state template
    #[error("state {state}: {source}")]
    State {
        /// State template filename
        state: String,
        /// Underlying error
        #[source]
        source: Box<ControllerError>,
    },

    /// Failure while reconciling one SpecialResource
    #[error("{name}: {source}")]
    Reconcile {
        /// SpecialResource name
        name: String,
        /// Underlying error
        #[source]
        source: Box<ControllerError>,
    },

    /// Request rejected by RBAC
    #[error("permission denied on {kind} {name}, check the operator ClusterRole/RoleBinding: {message}")]
    Permission {
        /// Kind of the object
        kind: String,
        /// Name of the object
        name: String,
        /// API message
        message: String,
    },

    /// Object did not become ready in time
    #[error("timed out after {timeout:?} waiting for {kind} {name}")]
    PollTimeout {
        /// Kind of the object
        kind: String,
        /// Name of the object
        name: String,
        /// Poll ceiling
        timeout: Duration,
    },

    /// Reconcile context cancelled
    #[error("reconcile cancelled")]
    Cancelled,

    /// Kernel-affine template but no kernel found on any node
    #[error("no kernel detected: no schedulable node matches the node selector")]
    NoKernelDetected,

    /// Dependency has neither an SR nor a bundled recipe
    #[error("recipe for dependency {0} not found")]
    RecipeMissing(String),

    /// Dependencies form a cycle
    #[error("dependency cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Not an error: try again shortly
    #[error("requeue: {0}")]
    Requeue(String),

    /// JSON/YAML (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl From<serde_json::Error> for ControllerError {
    fn from(err: serde_json::Error) -> Self {
        ControllerError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for ControllerError {
    fn from(err: serde_yaml::Error) -> Self {
        ControllerError::Serialization(err.to_string())
    }
}

impl From<minijinja::Error> for ControllerError {
    fn from(err: minijinja::Error) -> Self {
        ControllerError::Chart(format!("{:#}", err))
    }
}

impl ControllerError {
    /// Wraps an API error with the object it concerns, turning 403s into
    /// permission errors
    pub fn cluster(kind: &str, name: &str, source: ClusterError) -> Self {
        match source {
            ClusterError::Forbidden(message) => ControllerError::Permission {
                kind: kind.to_string(),
                name: name.to_string(),
                message,
            },
            source => ControllerError::Cluster {
                kind: kind.to_string(),
                name: name.to_string(),
                source,
            },
        }
    }

    /// Wraps with the state template filename
    pub fn in_state(self, state: &str) -> Self {
        match self {
            ControllerError::Cancelled => ControllerError::Cancelled,
            other => ControllerError::State {
                state: state.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// Wraps with the SpecialResource name
    pub fn in_reconcile(self, name: &str) -> Self {
        match self {
            ControllerError::Cancelled => ControllerError::Cancelled,
            other => ControllerError::Reconcile {
                name: name.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// Innermost error, through the state and reconcile wrappers
    pub fn root(&self) -> &ControllerError {
        match self {
            ControllerError::State { source, .. } | ControllerError::Reconcile { source, .. } => {
                source.root()
            }
            other => other,
        }
    }

    /// Errors that will not go away without a spec or RBAC change
    pub fn is_fatal(&self) -> bool {
        match self.root() {
            ControllerError::Permission { .. }
            | ControllerError::NoKernelDetected
            | ControllerError::RecipeMissing(_)
            | ControllerError::DependencyCycle(_)
            | ControllerError::InvalidConfig(_)
            | ControllerError::Chart(_) => true,
            ControllerError::Cluster { source, .. } | ControllerError::Api(source) => {
                matches!(source, ClusterError::Invalid(_) | ClusterError::Forbidden(_))
            }
            _ => false,
        }
    }

    /// Whether this is a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), ControllerError::Cancelled)
    }

    /// Fixed requeue delay for transient outcomes, `None` leaves it to the backoff
    pub fn requeue_after(&self) -> Option<Duration> {
        match self.root() {
            ControllerError::Requeue(_) | ControllerError::Cancelled => Some(Duration::from_secs(1)),
            ControllerError::PollTimeout { .. } => Some(Duration::from_secs(5)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forbidden_becomes_permission() {
        let err = ControllerError::cluster("DaemonSet", "drv", ClusterError::Forbidden("denied".into()));
        assert!(matches!(err, ControllerError::Permission { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_wrapping_keeps_root() {
        let err = ControllerError::Requeue("vendor rebuild".into())
            .in_state("0001-ds.yaml")
            .in_reconcile("drv");
        assert!(!err.is_fatal());
        assert_eq!(err.requeue_after(), Some(Duration::from_secs(1)));
        assert_eq!(err.to_string(), "drv: state 0001-ds.yaml: requeue: vendor rebuild");
    }

    #[test]
    fn test_cancel_is_not_wrapped() {
        let err = ControllerError::Cancelled.in_state("0000-cm.yaml").in_reconcile("demo");
        assert!(matches!(err, ControllerError::Cancelled));
    }
}
