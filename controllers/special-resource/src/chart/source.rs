//! Chart sources
//!
//! Charts come from a local chart repository laid out as
//! `<root>/<name>/<version>/` or `<root>/<name>/`, each holding
//! `Chart.yaml`, `values.yaml` and `templates/`. A ConfigMap named after
//! the owner in its namespace may override templates and values.

use super::{Chart, Template};
use crate::error::ControllerError;
use cluster_client::{gvk_from, ClusterClientTrait};
use crds::HelmChart;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Loads charts by reference
#[async_trait::async_trait]
pub trait ChartSource: Send + Sync {
    /// The chart named by `reference`
    async fn load(&self, reference: &HelmChart) -> Result<Chart, ControllerError>;
}

/// Charts read from a directory tree
#[derive(Debug, Clone)]
pub struct LocalChartSource {
    root: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
struct ChartMetadata {
    #[serde(default)]
    name: String,
    #[serde(default)]
    version: String,
}

impl LocalChartSource {
    /// Charts under `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root for a reference: `file://` repositories point elsewhere
    fn root_for(&self, reference: &HelmChart) -> PathBuf {
        reference
            .repository
            .url
            .strip_prefix("file://")
            .filter(|path| !path.is_empty())
            .map_or_else(|| self.root.clone(), PathBuf::from)
    }

    async fn chart_dir(&self, reference: &HelmChart) -> Result<PathBuf, ControllerError> {
        let base = self.root_for(reference).join(&reference.name);
        let candidates = [base.join(&reference.version), base];
        for dir in candidates {
            if tokio::fs::metadata(dir.join("templates")).await.is_ok_and(|m| m.is_dir()) {
                return Ok(dir);
            }
        }
        Err(ControllerError::Chart(format!(
            "chart {} {} not found under {}",
            reference.name,
            reference.version,
            self.root_for(reference).display()
        )))
    }
}

async fn read_optional(path: &Path) -> Result<Option<String>, ControllerError> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ControllerError::Chart(format!("reading {}: {}", path.display(), e))),
    }
}

fn parse_values(text: &str, origin: &str) -> Result<serde_json::Value, ControllerError> {
    let values: serde_json::Value =
        serde_yaml::from_str(text).map_err(|e| ControllerError::Chart(format!("{}: {}", origin, e)))?;
    Ok(if values.is_null() {
        serde_json::Value::Object(serde_json::Map::new())
    } else {
        values
    })
}

#[async_trait::async_trait]
impl ChartSource for LocalChartSource {
    async fn load(&self, reference: &HelmChart) -> Result<Chart, ControllerError> {
        let dir = self.chart_dir(reference).await?;
        debug!("Loading chart {} from {}", reference.name, dir.display());

        let metadata = match read_optional(&dir.join("Chart.yaml")).await? {
            Some(text) => serde_yaml::from_str::<ChartMetadata>(&text)
                .map_err(|e| ControllerError::Chart(format!("Chart.yaml: {}", e)))?,
            None => ChartMetadata::default(),
        };
        let values = match read_optional(&dir.join("values.yaml")).await? {
            Some(text) => parse_values(&text, "values.yaml")?,
            None => serde_json::Value::Object(serde_json::Map::new()),
        };

        let templates_dir = dir.join("templates");
        let mut entries = tokio::fs::read_dir(&templates_dir)
            .await
            .map_err(|e| ControllerError::Chart(format!("reading {}: {}", templates_dir.display(), e)))?;
        let mut templates = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ControllerError::Chart(format!("reading {}: {}", templates_dir.display(), e)))?
        {
            if !entry.file_type().await.is_ok_and(|t| t.is_file()) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let text = tokio::fs::read_to_string(entry.path())
                .await
                .map_err(|e| ControllerError::Chart(format!("reading template {}: {}", name, e)))?;
            templates.push(Template::new(name, text));
        }
        templates.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(Chart {
            name: if metadata.name.is_empty() { reference.name.clone() } else { metadata.name },
            version: if metadata.version.is_empty() { reference.version.clone() } else { metadata.version },
            values,
            templates,
        })
    }
}

/// Applies the override ConfigMap `<namespace>/<name>`, when present.
///
/// Its `values.yaml` key replaces the default values; every other
/// `*.yaml`/`*.tpl` key adds or replaces the template of that name.
pub async fn apply_configmap_override(
    client: &dyn ClusterClientTrait,
    chart: &mut Chart,
    namespace: &str,
    name: &str,
) -> Result<(), ControllerError> {
    let gvk = gvk_from("v1", "ConfigMap");
    let configmap = match client.get(&gvk, Some(namespace), name).await {
        Ok(Some(configmap)) => configmap,
        Ok(None) => return Ok(()),
        Err(e) if e.is_not_found() => return Ok(()),
        Err(e) => return Err(ControllerError::cluster("ConfigMap", name, e)),
    };
    let Some(data) = configmap.data.get("data").and_then(|d| d.as_object()) else {
        return Ok(());
    };

    info!("Chart {} overridden by ConfigMap {}/{}", chart.name, namespace, name);
    for (key, value) in data {
        let Some(text) = value.as_str() else {
            continue;
        };
        if key == "values.yaml" {
            chart.values = parse_values(text, "override values.yaml")?;
        } else if key.ends_with(".yaml") || key.ends_with(".tpl") {
            chart.upsert_template(Template::new(key.clone(), text));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_client::MockClusterClient;
    use crds::HelmRepo;
    use serde_json::json;

    fn scratch_chart(version_dir: bool) -> (PathBuf, HelmChart) {
        let root = std::env::temp_dir().join(format!("sro-charts-{}", uuid::Uuid::new_v4()));
        let mut dir = root.join("driver");
        if version_dir {
            dir = dir.join("1.0.0");
        }
        std::fs::create_dir_all(dir.join("templates")).expect("chart dir");
        std::fs::write(dir.join("Chart.yaml"), "name: driver\nversion: 1.0.0\n").expect("write");
        std::fs::write(dir.join("values.yaml"), "image: quay.io/driver\n").expect("write");
        std::fs::write(dir.join("templates/0000-cm.yaml"), "kind: ConfigMap").expect("write");
        std::fs::write(dir.join("templates/_helpers.tpl"), "").expect("write");
        let reference = HelmChart {
            name: "driver".to_string(),
            version: "1.0.0".to_string(),
            ..Default::default()
        };
        (root, reference)
    }

    #[tokio::test]
    async fn test_loads_versioned_chart() {
        let (root, reference) = scratch_chart(true);
        let chart = LocalChartSource::new(&root).load(&reference).await.expect("chart");
        assert_eq!(chart.name, "driver");
        assert_eq!(chart.values["image"], "quay.io/driver");
        assert_eq!(chart.templates.len(), 2);
        assert_eq!(chart.state_templates().len(), 1);
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_file_repository_overrides_root() {
        let (root, mut reference) = scratch_chart(false);
        reference.repository = HelmRepo {
            name: "local".to_string(),
            url: format!("file://{}", root.display()),
            ..Default::default()
        };
        let chart = LocalChartSource::new("/nonexistent").load(&reference).await.expect("chart");
        assert_eq!(chart.version, "1.0.0");
        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn test_missing_chart_is_chart_error() {
        let reference = HelmChart {
            name: "absent".to_string(),
            ..Default::default()
        };
        let err = LocalChartSource::new("/nonexistent").load(&reference).await.expect_err("missing");
        assert!(matches!(err, ControllerError::Chart(_)));
    }

    #[tokio::test]
    async fn test_configmap_override() {
        let client = MockClusterClient::new();
        client.add_object(
            serde_json::from_value(json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": {"name": "demo", "namespace": "demo"},
                "data": {
                    "values.yaml": "replicas: 2\n",
                    "0000-cm.yaml": "kind: ConfigMap # overridden",
                    "0001-extra.yaml": "kind: Secret",
                    "README": "ignored"
                }
            }))
            .expect("configmap"),
        );
        let mut chart = Chart {
            name: "demo".to_string(),
            templates: vec![Template::new("0000-cm.yaml", "kind: ConfigMap")],
            ..Default::default()
        };
        apply_configmap_override(&client, &mut chart, "demo", "demo").await.expect("override");
        assert_eq!(chart.values, json!({"replicas": 2}));
        assert_eq!(chart.templates.len(), 2);
        assert!(chart.templates[0].text.contains("overridden"));

        let mut untouched = Chart::default();
        apply_configmap_override(&client, &mut untouched, "other", "demo").await.expect("no override");
        assert!(untouched.templates.is_empty());
    }
}
