//! Per-reconcile context
//!
//! Everything the engine would otherwise keep in process-wide globals
//! (node cache, update vendor, cancellation) travels in one value owned
//! by the reconcile that created it.

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use crate::node_cache::NodeCache;
use cluster_client::ClusterClientTrait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// State threaded through one reconcile
pub struct ReconcileContext {
    /// Kubernetes API
    pub client: Arc<dyn ClusterClientTrait>,
    /// Operator configuration
    pub config: Arc<OperatorConfig>,
    /// Cancelled when the reconcile must stop
    pub cancel: CancellationToken,
    /// Vendor whose BuildConfig must be rebuilt
    pub update_vendor: Option<String>,
    /// Nodes selected by the object being reconciled
    pub nodes: NodeCache,
}

impl std::fmt::Debug for ReconcileContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcileContext")
            .field("update_vendor", &self.update_vendor)
            .field("selector", &self.nodes.selector())
            .finish_non_exhaustive()
    }
}

impl ReconcileContext {
    /// Context for a reconcile of an object with the given node selector
    pub fn new(
        client: Arc<dyn ClusterClientTrait>,
        config: Arc<OperatorConfig>,
        cancel: CancellationToken,
        update_vendor: Option<String>,
        node_selector: &BTreeMap<String, String>,
    ) -> Self {
        Self {
            client,
            config,
            cancel,
            update_vendor,
            nodes: NodeCache::new(node_selector),
        }
    }

    /// The API client as a trait object reference
    pub fn client(&self) -> &dyn ClusterClientTrait {
        self.client.as_ref()
    }

    /// Fails with `Cancelled` once the reconcile was cancelled
    pub fn check_cancelled(&self) -> Result<(), ControllerError> {
        if self.cancel.is_cancelled() {
            Err(ControllerError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleeps unless cancelled first
    pub async fn sleep(&self, duration: Duration) -> Result<(), ControllerError> {
        tokio::select! {
            () = self.cancel.cancelled() => Err(ControllerError::Cancelled),
            () = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
