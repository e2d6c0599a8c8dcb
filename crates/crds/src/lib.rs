//! Special Resource Operator CRD Definitions
//!
//! Kubernetes Custom Resource Definitions served under `sro.openshift.io`:
//! - `SpecialResource`: a chart rendered onto every kernel variant of the cluster
//! - `SpecialResourceModule`: a chart rendered per cluster version, with dynamic watches
//! - `PreflightValidation`: upgrade readiness check against a target OS image

pub mod common;
pub mod preflight_validation;
pub mod special_resource;
pub mod special_resource_module;

pub use common::*;
pub use preflight_validation::*;
pub use special_resource::*;
pub use special_resource_module::*;
