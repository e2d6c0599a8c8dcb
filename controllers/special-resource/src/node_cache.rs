//! Node cache
//!
//! Nodes matching a selector, fetched once per reconcile and dropped when
//! a label update conflicts. Tainted nodes stay in the cache for stage
//! labeling but are skipped when deriving kernel and OS information.

use crate::error::ControllerError;
use cluster_client::ClusterClientTrait;
use k8s_openapi::api::core::v1::Node;
use std::collections::BTreeMap;
use tracing::debug;

/// Taint effects that keep a node out of kernel/OS derivation
const EXCLUDING_TAINT_EFFECTS: &[&str] = &["NoSchedule", "NoExecute"];

/// Renders a label map as a `k=v,k2=v2` selector, `None` when empty
pub fn selector_string(selector: &BTreeMap<String, String>) -> Option<String> {
    if selector.is_empty() {
        return None;
    }
    Some(
        selector
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(","),
    )
}

/// Whether a node carries no `NoSchedule`/`NoExecute` taint
pub fn is_schedulable(node: &Node) -> bool {
    let Some(spec) = node.spec.as_ref() else {
        return true;
    };
    if spec.unschedulable == Some(true) {
        return false;
    }
    !spec.taints.as_ref().is_some_and(|taints| {
        taints
            .iter()
            .any(|t| EXCLUDING_TAINT_EFFECTS.contains(&t.effect.as_str()))
    })
}

/// Per-reconcile cache of the nodes selected by an SR
#[derive(Debug, Clone, Default)]
pub struct NodeCache {
    selector: Option<String>,
    nodes: Option<Vec<Node>>,
}

impl NodeCache {
    /// Cache for the nodes matching `selector` (all nodes when empty)
    pub fn new(selector: &BTreeMap<String, String>) -> Self {
        Self {
            selector: selector_string(selector),
            nodes: None,
        }
    }

    /// Label selector the cache was built for
    pub fn selector(&self) -> Option<&str> {
        self.selector.as_deref()
    }

    /// Every node matching the selector, tainted or not
    pub async fn all(&mut self, client: &dyn ClusterClientTrait) -> Result<&[Node], ControllerError> {
        if self.nodes.is_none() {
            debug!("Listing nodes for selector {:?}", self.selector);
            let nodes = client.list_nodes(self.selector.as_deref()).await?;
            self.nodes = Some(nodes);
        }
        Ok(self.nodes.as_deref().unwrap_or_default())
    }

    /// Nodes usable for kernel and OS derivation
    pub async fn schedulable(
        &mut self,
        client: &dyn ClusterClientTrait,
    ) -> Result<Vec<Node>, ControllerError> {
        Ok(self
            .all(client)
            .await?
            .iter()
            .filter(|n| is_schedulable(n))
            .cloned()
            .collect())
    }

    /// Forces the next read to hit the API
    pub fn invalidate(&mut self) {
        self.nodes = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{NodeSpec, Taint};

    fn node_with_taint(effect: Option<&str>) -> Node {
        Node {
            spec: Some(NodeSpec {
                taints: effect.map(|e| {
                    vec![Taint {
                        key: "node-role.kubernetes.io/master".to_string(),
                        effect: e.to_string(),
                        ..Default::default()
                    }]
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_taints_exclude_from_derivation() {
        assert!(is_schedulable(&node_with_taint(None)));
        assert!(is_schedulable(&node_with_taint(Some("PreferNoSchedule"))));
        assert!(!is_schedulable(&node_with_taint(Some("NoSchedule"))));
        assert!(!is_schedulable(&node_with_taint(Some("NoExecute"))));
    }

    #[test]
    fn test_selector_string() {
        let mut selector = BTreeMap::new();
        assert_eq!(selector_string(&selector), None);
        selector.insert("a".to_string(), "1".to_string());
        selector.insert("b".to_string(), "2".to_string());
        assert_eq!(selector_string(&selector).as_deref(), Some("a=1,b=2"));
    }
}
