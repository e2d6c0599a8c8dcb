//! Kernel and operating system derivation from node data

use crate::annotations::{
    KERNEL_VERSION_LABEL, OS_RELEASE_ID_LABEL, OS_RELEASE_MAJOR_LABEL, OS_RELEASE_MINOR_LABEL,
};
use crate::error::ControllerError;
use k8s_openapi::api::core::v1::Node;

/// RHCOS 4.x minor to the RHEL minor it is based on
const RHCOS_TO_RHEL: &[(u32, &str)] = &[
    (4, "8.0"),
    (5, "8.1"),
    (6, "8.2"),
    (7, "8.3"),
    (8, "8.4"),
    (9, "8.4"),
    (10, "8.4"),
    (11, "8.6"),
    (12, "8.6"),
    (13, "9.2"),
    (14, "9.2"),
    (15, "9.2"),
    (16, "9.4"),
    (17, "9.4"),
    (18, "9.6"),
];

/// Normalized operating system of a node
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OsVersion {
    /// e.g. `rhel8`
    pub major: String,
    /// e.g. `rhel8.4`
    pub major_minor: String,
    /// e.g. `8.4`
    pub decimal: String,
}

/// Kernel "patch" version: everything up to the first `.` after the first `-`.
///
/// `4.18.0-305.19.1.el8_4.x86_64` becomes `4.18.0-305`.
pub fn patch_version(kernel_full_version: &str) -> Result<String, ControllerError> {
    let (base, rest) = kernel_full_version.split_once('-').ok_or_else(|| {
        ControllerError::InvalidConfig(format!("malformed kernel version {:?}", kernel_full_version))
    })?;
    let build = rest.split('.').next().unwrap_or(rest);
    Ok(format!("{}-{}", base, build))
}

/// Maps `(release, major, minor)` to the canonical triple.
///
/// RHCOS 4.x is reported as the RHEL release it is built from; anything
/// else passes through.
pub fn render_operating_system(rel: &str, major: &str, minor: &str) -> Result<OsVersion, ControllerError> {
    let (rel, major, minor) = if rel == "rhcos" && major == "4" {
        let ocp_minor: u32 = minor.parse().map_err(|_| {
            ControllerError::InvalidConfig(format!("malformed RHCOS minor version {:?}", minor))
        })?;
        let rhel = RHCOS_TO_RHEL
            .iter()
            .find(|(m, _)| *m == ocp_minor)
            .map(|(_, rhel)| *rhel)
            .ok_or_else(|| {
                ControllerError::InvalidConfig(format!("unknown RHCOS version 4.{}", ocp_minor))
            })?;
        let (maj, min) = rhel.split_once('.').unwrap_or((rhel, "0"));
        ("rhel".to_string(), maj.to_string(), min.to_string())
    } else {
        (rel.to_string(), major.to_string(), minor.to_string())
    };

    Ok(OsVersion {
        major: format!("{}{}", rel, major),
        major_minor: format!("{}{}.{}", rel, major, minor),
        decimal: format!("{}.{}", major, minor),
    })
}

/// Full kernel version of a node, from NFD labels or node status
pub fn kernel_of(node: &Node) -> Option<String> {
    node.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(KERNEL_VERSION_LABEL))
        .cloned()
        .or_else(|| {
            node.status
                .as_ref()
                .and_then(|s| s.node_info.as_ref())
                .map(|i| i.kernel_version.clone())
        })
        .filter(|k| !k.is_empty())
}

/// OS image string of a node (`status.nodeInfo.osImage`)
pub fn os_image_of(node: &Node) -> Option<&str> {
    node.status
        .as_ref()
        .and_then(|s| s.node_info.as_ref())
        .map(|i| i.os_image.as_str())
        .filter(|s| !s.is_empty())
}

/// RHCOS build id from an OS image string, e.g. `410.84.202205191234-0`
pub fn rhcos_build_of(node: &Node) -> Option<String> {
    let image = os_image_of(node)?;
    if !image.contains("CoreOS") {
        return None;
    }
    image
        .split_whitespace()
        .find(|t| t.chars().next().is_some_and(|c| c.is_ascii_digit()) && t.contains('.'))
        .map(str::to_string)
}

/// Derives the node's OS, preferring NFD os-release labels over the OS image string
pub fn os_of(node: &Node) -> Result<OsVersion, ControllerError> {
    let labels = node.metadata.labels.as_ref();
    let label = |key: &str| labels.and_then(|l| l.get(key)).map(String::as_str);
    if let (Some(rel), Some(major), Some(minor)) = (
        label(OS_RELEASE_ID_LABEL),
        label(OS_RELEASE_MAJOR_LABEL),
        label(OS_RELEASE_MINOR_LABEL),
    ) {
        return render_operating_system(rel, major, minor);
    }

    let image = os_image_of(node).ok_or_else(|| {
        ControllerError::InvalidConfig(format!(
            "node {} reports neither os-release labels nor an OS image",
            node.metadata.name.as_deref().unwrap_or_default()
        ))
    })?;
    parse_os_image(image)
}

/// Parses strings like `Red Hat Enterprise Linux CoreOS 410.84.202205191234-0 (Ootpa)`,
/// `Red Hat Enterprise Linux 8.6 (Ootpa)` or `Ubuntu 22.04.3 LTS`
pub fn parse_os_image(image: &str) -> Result<OsVersion, ControllerError> {
    let malformed = || ControllerError::InvalidConfig(format!("cannot derive OS from {:?}", image));
    let version = image
        .split_whitespace()
        .find(|t| t.chars().next().is_some_and(|c| c.is_ascii_digit()))
        .ok_or_else(malformed)?;

    if image.contains("CoreOS") {
        // 410.84.<timestamp>: OCP 4.10 on RHEL 8.4
        let mut parts = version.split('.');
        let ocp = parts.next().ok_or_else(malformed)?;
        let rhel = parts.next().unwrap_or_default();
        if rhel.len() == 2 && rhel.chars().all(|c| c.is_ascii_digit()) {
            return render_operating_system("rhel", &rhel[..1], &rhel[1..]);
        }
        if ocp.len() >= 2 {
            return render_operating_system("rhcos", &ocp[..1], &ocp[1..]);
        }
        return Err(malformed());
    }

    let rel = if image.starts_with("Red Hat Enterprise Linux") {
        "rhel".to_string()
    } else {
        image
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_lowercase()
    };
    let mut parts = version.split('.');
    let major = parts.next().ok_or_else(malformed)?;
    let minor = parts.next().unwrap_or("0");
    render_operating_system(&rel, major, minor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_version() {
        assert_eq!(
            patch_version("4.18.0-305.19.1.el8_4.x86_64").expect("valid"),
            "4.18.0-305"
        );
        assert_eq!(patch_version("5.14.0-70.el9.x86_64").expect("valid"), "5.14.0-70");
        assert!(patch_version("5.14.0").is_err());
    }

    #[test]
    fn test_rhcos_maps_to_rhel() {
        let os = render_operating_system("rhcos", "4", "10").expect("known");
        assert_eq!(os.major, "rhel8");
        assert_eq!(os.major_minor, "rhel8.4");
        assert_eq!(os.decimal, "8.4");
        assert!(render_operating_system("rhcos", "4", "99").is_err());
    }

    #[test]
    fn test_other_os_passes_through() {
        let os = render_operating_system("ubuntu", "22", "04").expect("valid");
        assert_eq!(os.major, "ubuntu22");
        assert_eq!(os.major_minor, "ubuntu22.04");
        assert_eq!(os.decimal, "22.04");
    }

    #[test]
    fn test_parse_os_image() {
        let os = parse_os_image("Red Hat Enterprise Linux CoreOS 410.84.202205191234-0 (Ootpa)")
            .expect("valid");
        assert_eq!(os.major_minor, "rhel8.4");

        let os = parse_os_image("Red Hat Enterprise Linux CoreOS 413.92.202303281804-0 (Plow)")
            .expect("valid");
        assert_eq!(os.major_minor, "rhel9.2");

        let os = parse_os_image("Red Hat Enterprise Linux 8.6 (Ootpa)").expect("valid");
        assert_eq!(os.major_minor, "rhel8.6");

        let os = parse_os_image("Ubuntu 22.04.3 LTS").expect("valid");
        assert_eq!(os.major_minor, "ubuntu22.04");
    }
}
