//! Cluster-wide proxy configuration

use crate::error::ControllerError;
use cluster_client::{gvk_from, ClusterClientTrait};
use serde::Serialize;
use tracing::debug;

/// Name of the cluster proxy singleton
const PROXY_NAME: &str = "cluster";

/// Proxy settings handed to the chart and injected into annotated workloads
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfiguration {
    pub http_proxy: String,
    pub https_proxy: String,
    pub no_proxy: String,
    pub trusted_ca: String,
}

impl ProxyConfiguration {
    /// Environment variables injected into containers
    pub fn env_vars(&self) -> [(&'static str, &str); 3] {
        [
            ("HTTP_PROXY", self.http_proxy.as_str()),
            ("HTTPS_PROXY", self.https_proxy.as_str()),
            ("NO_PROXY", self.no_proxy.as_str()),
        ]
    }

    /// Reads the `config.openshift.io/v1` Proxy singleton.
    ///
    /// Missing fields, a missing object or a cluster without the Proxy
    /// kind all yield empty settings.
    pub async fn from_cluster(client: &dyn ClusterClientTrait) -> Result<Self, ControllerError> {
        let gvk = gvk_from("config.openshift.io/v1", "Proxy");
        let proxy = match client.get(&gvk, None, PROXY_NAME).await {
            Ok(Some(proxy)) => proxy,
            Ok(None) => return Ok(Self::default()),
            Err(e) if e.is_not_found() => {
                debug!("Cluster serves no Proxy kind: {}", e);
                return Ok(Self::default());
            }
            Err(e) => return Err(ControllerError::cluster("Proxy", PROXY_NAME, e)),
        };

        let field = |section: &str, key: &str| {
            proxy
                .data
                .get(section)
                .and_then(|s| s.get(key))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        // status carries the effective values (noProxy gets the cluster
        // networks appended), spec is the fallback
        let pick = |key: &str| {
            let status = field("status", key);
            if status.is_empty() {
                field("spec", key)
            } else {
                status
            }
        };

        Ok(Self {
            http_proxy: pick("httpProxy"),
            https_proxy: pick("httpsProxy"),
            no_proxy: pick("noProxy"),
            trusted_ca: proxy
                .data
                .pointer("/spec/trustedCA/name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_client::MockClusterClient;
    use kube::api::{ApiResource, DynamicObject};

    #[tokio::test]
    async fn test_missing_proxy_defaults_to_empty() {
        let client = MockClusterClient::new();
        let proxy = ProxyConfiguration::from_cluster(&client).await.expect("best effort");
        assert_eq!(proxy, ProxyConfiguration::default());
    }

    #[tokio::test]
    async fn test_status_wins_over_spec() {
        let client = MockClusterClient::new();
        let ar = ApiResource::from_gvk(&gvk_from("config.openshift.io/v1", "Proxy"));
        let mut obj = DynamicObject::new("cluster", &ar);
        obj.data = serde_json::json!({
            "spec": {"httpProxy": "http://spec:3128", "noProxy": ".local", "trustedCA": {"name": "user-ca-bundle"}},
            "status": {"httpProxy": "http://proxy:3128", "httpsProxy": "http://proxy:3129"}
        });
        client.add_object(obj);

        let proxy = ProxyConfiguration::from_cluster(&client).await.expect("readable");
        assert_eq!(proxy.http_proxy, "http://proxy:3128");
        assert_eq!(proxy.https_proxy, "http://proxy:3129");
        assert_eq!(proxy.no_proxy, ".local");
        assert_eq!(proxy.trusted_ca, "user-ca-bundle");
        assert_eq!(proxy.env_vars()[0], ("HTTP_PROXY", "http://proxy:3128"));
    }
}
