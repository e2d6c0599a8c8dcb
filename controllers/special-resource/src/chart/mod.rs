//! Charts
//!
//! A chart is a set of templates plus default values. Templates named
//! `NNNN-*.yaml` are state templates, applied one stage at a time in name
//! order; every other template is a no-state template, available to
//! state templates for inclusion and applied once all stages are done.

pub mod engine;
pub mod fanout;
pub mod order;
pub mod source;
pub mod values;

use crate::error::ControllerError;
use crate::stage::stage_number;
use serde::Deserialize;

/// Marker of templates rendered once per kernel
pub const KERNEL_AFFINE_TOKEN: &str = ".Values.kernelFullVersion";

/// One chart template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    /// File name relative to `templates/`
    pub name: String,
    /// Raw template text
    pub text: String,
}

impl Template {
    /// Template with the given name and text
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }

    fn base_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    /// `NNNN-*.yaml`
    pub fn is_state(&self) -> bool {
        self.base_name().ends_with(".yaml") && stage_number(&self.name).is_some()
    }

    /// Partials (`_helpers.tpl`) and non-YAML files render no objects
    pub fn renders_objects(&self) -> bool {
        let base = self.base_name();
        !base.starts_with('_') && (base.ends_with(".yaml") || base.ends_with(".yml"))
    }

    /// File name without extension, used as the stage name
    pub fn stem(&self) -> &str {
        let base = self.base_name();
        base.rsplit_once('.').map_or(base, |(stem, _)| stem)
    }

    /// Whether the raw text references the kernel version
    pub fn is_kernel_affine(&self) -> bool {
        self.text.contains(KERNEL_AFFINE_TOKEN)
    }
}

/// A loaded chart
#[derive(Debug, Clone, Default)]
pub struct Chart {
    /// Chart name
    pub name: String,
    /// Chart version
    pub version: String,
    /// Default values (`values.yaml`)
    pub values: serde_json::Value,
    /// Every template of the chart
    pub templates: Vec<Template>,
}

impl Chart {
    /// State templates in installation order
    pub fn state_templates(&self) -> Vec<&Template> {
        let mut states: Vec<_> = self.templates.iter().filter(|t| t.is_state()).collect();
        states.sort_by(|a, b| a.name.cmp(&b.name));
        states
    }

    /// Templates outside the stage order
    pub fn no_state_templates(&self) -> Vec<&Template> {
        self.templates.iter().filter(|t| !t.is_state()).collect()
    }

    /// Adds or replaces a template by name
    pub fn upsert_template(&mut self, template: Template) {
        match self.templates.iter_mut().find(|t| t.name == template.name) {
            Some(existing) => *existing = template,
            None => self.templates.push(template),
        }
    }
}

/// Parses a YAML stream into its non-empty documents
pub fn parse_documents(text: &str) -> Result<Vec<serde_json::Value>, ControllerError> {
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(text) {
        let value = serde_json::Value::deserialize(document)
            .map_err(|e| ControllerError::Chart(format!("invalid YAML document: {}", e)))?;
        if !value.is_null() {
            documents.push(value);
        }
    }
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition() {
        let chart = Chart {
            templates: vec![
                Template::new("0001-ds.yaml", ""),
                Template::new("_helpers.tpl", ""),
                Template::new("0000-cm.yaml", ""),
                Template::new("rbac.yaml", ""),
            ],
            ..Default::default()
        };
        let states: Vec<_> = chart.state_templates().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(states, vec!["0000-cm.yaml", "0001-ds.yaml"]);
        let others: Vec<_> = chart.no_state_templates().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(others, vec!["_helpers.tpl", "rbac.yaml"]);
        assert!(!chart.templates[1].renders_objects());
        assert_eq!(chart.templates[0].stem(), "0001-ds");
    }

    #[test]
    fn test_kernel_affinity_from_raw_text() {
        assert!(Template::new("0000-ds.yaml", "image: drv:{{ .Values.kernelFullVersion }}").is_kernel_affine());
        assert!(!Template::new("0000-cm.yaml", "data: {}").is_kernel_affine());
    }

    #[test]
    fn test_parse_documents_drops_empty() {
        let docs = parse_documents("---\na: 1\n---\n\n---\n# comment only\n---\nb: 2\n").expect("valid");
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1]["b"], 2);
    }
}
