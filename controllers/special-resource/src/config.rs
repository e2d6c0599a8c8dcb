//! Operator configuration loaded from the environment

use crate::error::ControllerError;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration of the operator
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Namespace the operator runs in, reported on the ClusterOperator
    pub operator_namespace: String,
    /// Operand version reported on the ClusterOperator
    pub release_version: String,
    /// Root of the bundled dependency recipes
    pub recipes_dir: PathBuf,
    /// Root of the local chart repository
    pub charts_dir: PathBuf,
    /// Readiness poll interval
    pub poll_interval: Duration,
    /// Readiness poll ceiling
    pub poll_timeout: Duration,
    /// Delay before re-verifying an unfinished PreflightValidation
    pub preflight_requeue: Duration,
    /// Talk plain HTTP to registries
    pub registry_insecure: bool,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            operator_namespace: "openshift-special-resource-operator".to_string(),
            release_version: "0.0.1-snapshot".to_string(),
            recipes_dir: PathBuf::from("/opt/sro/recipes"),
            charts_dir: PathBuf::from("/charts"),
            poll_interval: Duration::from_secs(5),
            poll_timeout: Duration::from_secs(30),
            preflight_requeue: Duration::from_secs(60),
            registry_insecure: false,
        }
    }
}

fn seconds(name: &str, default: Duration) -> Result<Duration, ControllerError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ControllerError::InvalidConfig(format!("{} must be a number of seconds, got {:?}", name, raw))),
        Err(_) => Ok(default),
    }
}

impl OperatorConfig {
    /// Reads the configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self, ControllerError> {
        let defaults = Self::default();
        let config = Self {
            operator_namespace: env::var("OPERATOR_NAMESPACE").unwrap_or(defaults.operator_namespace),
            release_version: env::var("RELEASE_VERSION").unwrap_or(defaults.release_version),
            recipes_dir: env::var("SRO_RECIPES_DIR").map_or(defaults.recipes_dir, PathBuf::from),
            charts_dir: env::var("SRO_CHARTS_DIR").map_or(defaults.charts_dir, PathBuf::from),
            poll_interval: seconds("SRO_POLL_INTERVAL_SECS", defaults.poll_interval)?,
            poll_timeout: seconds("SRO_POLL_TIMEOUT_SECS", defaults.poll_timeout)?,
            preflight_requeue: seconds("SRO_PREFLIGHT_REQUEUE_SECS", defaults.preflight_requeue)?,
            registry_insecure: env::var("SRO_REGISTRY_INSECURE")
                .is_ok_and(|v| matches!(v.as_str(), "1" | "true" | "yes")),
        };

        if config.poll_interval.is_zero() || config.poll_interval > config.poll_timeout {
            return Err(ControllerError::InvalidConfig(format!(
                "poll interval {:?} must be non-zero and not exceed the poll timeout {:?}",
                config.poll_interval, config.poll_timeout
            )));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OperatorConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.poll_timeout, Duration::from_secs(30));
        assert_eq!(config.recipes_dir, PathBuf::from("/opt/sro/recipes"));
    }
}
