//! PreflightValidation CRD
//!
//! Asks the operator whether every SpecialResource would still produce a
//! usable driver container on the kernel shipped by a target OS image.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "sro.openshift.io",
    version = "v1beta2",
    kind = "PreflightValidation",
    plural = "preflightvalidations",
    shortname = "pv",
    status = "PreflightValidationStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct PreflightValidationSpec {
    /// Release payload image of the target cluster version
    pub update_image: String,

    /// Verbose logging of verification steps
    #[serde(default)]
    pub debug: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PreflightValidationStatus {
    /// One entry per SpecialResource
    #[serde(default)]
    pub sr_statuses: Vec<SrStatus>,
}

/// Verification outcome for one SpecialResource
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SrStatus {
    /// SpecialResource name
    pub name: String,

    /// Outcome
    pub verification_status: VerificationStatus,

    /// Why the outcome was reached
    #[serde(default)]
    pub status_reason: String,

    /// When the outcome last changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// Preflight verification outcome
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum VerificationStatus {
    /// Driver container usable on the target kernel
    True,
    /// Driver container not usable on the target kernel
    False,
    /// Verification could not be carried out
    Error,
    /// Not yet verified
    #[default]
    Unknown,
}

impl PreflightValidationStatus {
    /// Status entry for the given SR
    pub fn get(&self, name: &str) -> Option<&SrStatus> {
        self.sr_statuses.iter().find(|s| s.name == name)
    }

    /// Records an outcome, bumping the transition time only when the
    /// outcome changed.
    pub fn set(&mut self, name: &str, status: VerificationStatus, reason: impl Into<String>) {
        let reason = reason.into();
        let now = Some(chrono::Utc::now());
        if let Some(entry) = self.sr_statuses.iter_mut().find(|s| s.name == name) {
            if entry.verification_status != status {
                entry.last_transition_time = now;
            }
            entry.verification_status = status;
            entry.status_reason = reason;
        } else {
            self.sr_statuses.push(SrStatus {
                name: name.to_string(),
                verification_status: status,
                status_reason: reason,
                last_transition_time: now,
            });
        }
    }

    /// Whether the SR has already been verified
    pub fn is_verified(&self, name: &str) -> bool {
        self.get(name)
            .is_some_and(|s| s.verification_status == VerificationStatus::True)
    }
}
