//! Kubernetes API client for the special resource controllers
//!
//! A narrow, mockable view of the Kubernetes API. Rendered chart objects
//! can be of any kind, so everything travels as `DynamicObject` and kinds
//! are resolved through discovery.
//!
//! # Example
//!
//! ```no_run
//! use cluster_client::{gvk_from, ClusterClient, ClusterClientTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ClusterClient::try_default().await?;
//!
//! // Look up the cluster version singleton
//! let gvk = gvk_from("config.openshift.io/v1", "ClusterVersion");
//! let version = client.get(&gvk, None, "version").await?;
//!
//! // List labelled nodes
//! let nodes = client.list_nodes(Some("node-role.kubernetes.io/worker")).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Dynamic CRUD**: get/list/create/update/delete of any served kind
//! - **Discovery**: cached API resource table, refreshed on demand
//! - **Nodes and logs**: typed node updates and pod log retrieval
//! - **Mocking**: in-memory `MockClusterClient` behind the `test-util` feature

pub mod client;
#[path = "trait.rs"]
pub mod cluster_trait;
pub mod error;
#[cfg(feature = "test-util")]
pub mod mock;
pub mod object;

pub use client::ClusterClient;
pub use cluster_trait::ClusterClientTrait;
pub use error::ClusterError;
#[cfg(feature = "test-util")]
pub use mock::{MockClusterClient, Mutation};
pub use object::{
    from_dynamic, gvk_for, gvk_from, gvk_of, kind_of, split_api_version, to_dynamic,
    ApiResourceInfo,
};
