//! Container registry client
//!
//! Reads single files out of image layers without pulling whole images.
//! Used to inspect release payloads (`release-manifests/*`) and
//! driver-toolkit images (`etc/driver-toolkit-release.json`).
//!
//! # Example
//!
//! ```no_run
//! use registry_client::{RegistryClient, RegistryClientTrait, DTK_RELEASE_PATH};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = RegistryClient::new(false)?;
//!
//! // Look for the toolkit descriptor from the top layer down
//! let release = client
//!     .find_file("quay.io/openshift/driver-toolkit:latest", DTK_RELEASE_PATH)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod layer;
#[cfg(feature = "test-util")]
pub mod mock;
pub mod models;
#[path = "trait.rs"]
pub mod registry_trait;

pub use client::{basic_auth, AuthChallenge, RegistryClient};
pub use error::RegistryError;
#[cfg(feature = "test-util")]
pub use mock::MockRegistryClient;
pub use models::*;
pub use registry_trait::RegistryClientTrait;
