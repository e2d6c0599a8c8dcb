//! Stage labels on nodes
//!
//! A stage is an `NNNN-*.yaml` state template. Once every object of a
//! stage is ready, each node selected by the SpecialResource carries
//! `specialresource.openshift.io/state-<sr>-<NNNN>=Ready`.

use crate::annotations::STATE_LABEL_PREFIX;
use crate::context::ReconcileContext;
use crate::error::ControllerError;
use cluster_client::ClusterError;
use k8s_openapi::api::core::v1::Node;
use tracing::{debug, info};

/// Value of every stage label
pub const STAGE_READY: &str = "Ready";

/// A parsed stage label key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageLabel {
    /// Owning SpecialResource
    pub sr: String,
    /// Four-digit stage number
    pub stage: String,
}

/// Four leading digits of a state template name (`0001-ds.yaml` is `0001`)
pub fn stage_number(template: &str) -> Option<&str> {
    let base = template.rsplit('/').next().unwrap_or(template);
    let digits = base.get(..4)?;
    (digits.chars().all(|c| c.is_ascii_digit()) && base[4..].starts_with('-')).then_some(digits)
}

impl StageLabel {
    /// Label for the given SR and state template
    pub fn for_template(sr: &str, template: &str) -> Option<Self> {
        stage_number(template).map(|stage| Self {
            sr: sr.to_string(),
            stage: stage.to_string(),
        })
    }

    /// Node label key
    pub fn key(&self) -> String {
        format!("{}{}-{}", STATE_LABEL_PREFIX, self.sr, self.stage)
    }

    /// Parses a node label key. SR names may contain dashes, the stage is
    /// whatever follows the last one.
    pub fn parse(key: &str) -> Option<Self> {
        let rest = key.strip_prefix(STATE_LABEL_PREFIX)?;
        let (sr, stage) = rest.rsplit_once('-')?;
        (!sr.is_empty() && stage.len() == 4 && stage.chars().all(|c| c.is_ascii_digit())).then(|| Self {
            sr: sr.to_string(),
            stage: stage.to_string(),
        })
    }
}

/// Key written by releases that labeled nodes per SR rather than per stage
pub fn legacy_key(sr: &str) -> String {
    format!("{}{}", STATE_LABEL_PREFIX, sr)
}

fn node_name(node: &Node) -> &str {
    node.metadata.name.as_deref().unwrap_or_default()
}

fn label_error(ctx: &mut ReconcileContext, node: &Node, e: ClusterError) -> ControllerError {
    if e.is_conflict() {
        ctx.nodes.invalidate();
        return ControllerError::Requeue(format!("node {} changed while labeling", node_name(node)));
    }
    ControllerError::cluster("Node", node_name(node), e)
}

/// Stamps the stage label on every selected node lacking it.
///
/// Tainted nodes are labeled too. A conflicting update drops the node
/// cache and requeues.
pub async fn stamp(ctx: &mut ReconcileContext, label: &StageLabel) -> Result<(), ControllerError> {
    let key = label.key();
    let client = std::sync::Arc::clone(&ctx.client);
    let nodes = ctx.nodes.all(client.as_ref()).await?.to_vec();
    for mut node in nodes {
        let labels = node.metadata.labels.get_or_insert_with(Default::default);
        if labels.get(&key).map(String::as_str) == Some(STAGE_READY) {
            continue;
        }
        labels.insert(key.clone(), STAGE_READY.to_string());
        if let Err(e) = client.update_node(&node).await {
            return Err(label_error(ctx, &node, e));
        }
        debug!("Labeled node {} with {}", node_name(&node), key);
    }
    // keep the cache in step with what was written
    ctx.nodes.invalidate();
    Ok(())
}

/// Removes every stage label of `sr` (and its legacy key) from all nodes.
///
/// Nodes are listed without the SR's selector: a node that stopped
/// matching still carries the labels it was given while it matched.
pub async fn remove_all(ctx: &mut ReconcileContext, sr: &str) -> Result<(), ControllerError> {
    let legacy = legacy_key(sr);
    let client = std::sync::Arc::clone(&ctx.client);
    let nodes = client.list_nodes(None).await?;
    for mut node in nodes {
        let Some(labels) = node.metadata.labels.as_mut() else {
            continue;
        };
        let before = labels.len();
        labels.retain(|key, _| {
            *key != legacy && StageLabel::parse(key).is_none_or(|parsed| parsed.sr != sr)
        });
        if labels.len() == before {
            continue;
        }
        if let Err(e) = client.update_node(&node).await {
            return Err(label_error(ctx, &node, e));
        }
        info!("Removed {} stage labels from node {}", sr, node_name(&node));
    }
    ctx.nodes.invalidate();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use cluster_client::{MockClusterClient, Mutation};
    use std::collections::BTreeMap;

    #[test]
    fn test_stage_number() {
        assert_eq!(stage_number("0001-ds.yaml"), Some("0001"));
        assert_eq!(stage_number("templates/1000-cm.yaml"), Some("1000"));
        assert_eq!(stage_number("_helpers.tpl"), None);
        assert_eq!(stage_number("00012-x.yaml"), None);
    }

    #[test]
    fn test_parse_handles_dashed_names() {
        let label = StageLabel::for_template("simple-kmod", "0002-ds.yaml").expect("state template");
        assert_eq!(label.key(), "specialresource.openshift.io/state-simple-kmod-0002");
        assert_eq!(StageLabel::parse(&label.key()), Some(label));
        assert_eq!(StageLabel::parse("specialresource.openshift.io/state-simple-kmod"), None);
    }

    #[tokio::test]
    async fn test_stamp_is_idempotent_and_includes_tainted_nodes() {
        let client = MockClusterClient::new();
        client.add_node(test_node("w1", "5.14.0-70.el9.x86_64", ("rhel", "9", "0"), &[]));
        client.add_node(tainted(test_node("w2", "5.14.0-70.el9.x86_64", ("rhel", "9", "0"), &[]), "NoSchedule"));
        let mut ctx = test_context(&client, &BTreeMap::new());
        let label = StageLabel::for_template("drv", "0000-ds.yaml").expect("state template");

        stamp(&mut ctx, &label).await.expect("labeled");
        assert_eq!(client.mutations().len(), 2);
        for name in ["w1", "w2"] {
            let node = client.node(name).expect("node");
            assert_eq!(node.metadata.labels.expect("labels")[&label.key()], STAGE_READY);
        }

        client.clear_mutations();
        stamp(&mut ctx, &label).await.expect("labeled");
        assert!(client.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_conflict_requeues() {
        let client = MockClusterClient::new();
        client.add_node(test_node("w1", "5.14.0-70.el9.x86_64", ("rhel", "9", "0"), &[]));
        client.conflict_next_node_updates(1);
        let mut ctx = test_context(&client, &BTreeMap::new());
        let label = StageLabel::for_template("drv", "0000-ds.yaml").expect("state template");
        let err = stamp(&mut ctx, &label).await.expect_err("conflict");
        assert!(matches!(err, ControllerError::Requeue(_)));
        stamp(&mut ctx, &label).await.expect("second attempt succeeds");
    }

    #[tokio::test]
    async fn test_remove_only_touches_own_labels() {
        let client = MockClusterClient::new();
        client.add_node(test_node(
            "w1",
            "5.14.0-70.el9.x86_64",
            ("rhel", "9", "0"),
            &[
                ("specialresource.openshift.io/state-drv-0000", "Ready"),
                ("specialresource.openshift.io/state-drv", "Ready"),
                ("specialresource.openshift.io/state-drv-extra-0000", "Ready"),
            ],
        ));
        let mut ctx = test_context(&client, &BTreeMap::new());
        remove_all(&mut ctx, "drv").await.expect("removed");
        let labels = client.node("w1").expect("node").metadata.labels.expect("labels");
        assert!(!labels.contains_key("specialresource.openshift.io/state-drv-0000"));
        assert!(!labels.contains_key("specialresource.openshift.io/state-drv"));
        assert!(labels.contains_key("specialresource.openshift.io/state-drv-extra-0000"));
        assert!(matches!(client.mutations()[0], Mutation::UpdateNode { .. }));
    }

    #[tokio::test]
    async fn test_remove_reaches_nodes_outside_the_selector() {
        let client = MockClusterClient::new();
        client.add_node(test_node(
            "n1",
            "5.14.0-70.el9.x86_64",
            ("rhel", "9", "0"),
            &[("specialresource.openshift.io/state-drv-0000", "Ready")],
        ));
        let selector = BTreeMap::from([("gpu".to_string(), "true".to_string())]);
        let mut ctx = test_context(&client, &selector);

        remove_all(&mut ctx, "drv").await.expect("removed");
        let labels = client.node("n1").expect("node").metadata.labels.expect("labels");
        assert!(labels.keys().all(|key| StageLabel::parse(key).is_none()));
    }
}
