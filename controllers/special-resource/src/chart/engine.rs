//! Template engine
//!
//! Renders Helm-style templates with minijinja. Helm's leading-dot
//! references (`{{ .Values.x }}`, `{{ .Release.Namespace }}`) are
//! rewritten to plain variable lookups before compilation, and every
//! no-state template is registered so state templates can include it.

use super::Template;
use crate::error::ControllerError;
use base64::Engine as _;
use minijinja::{Environment, UndefinedBehavior};
use regex::Regex;
use serde_json::{json, Value};
use std::sync::LazyLock;

static LEADING_DOT: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"(?m)(^|[^\w\]\)])\.(Values|Release|Chart|Capabilities)\b"));

/// Rewrites `.Values` style references to `Values`
pub fn preprocess(text: &str) -> Result<String, ControllerError> {
    let pattern = LEADING_DOT
        .as_ref()
        .map_err(|e| ControllerError::Chart(format!("invalid reference pattern: {}", e)))?;
    Ok(pattern.replace_all(text, "${1}${2}").into_owned())
}

fn quote(value: minijinja::Value) -> String {
    let text = value.as_str().map_or_else(|| value.to_string(), str::to_string);
    format!("{:?}", text)
}

fn b64enc(value: String) -> String {
    base64::engine::general_purpose::STANDARD.encode(value)
}

fn toyaml(value: minijinja::Value) -> Result<String, minijinja::Error> {
    let rendered = serde_yaml::to_string(&value).map_err(|e| {
        minijinja::Error::new(minijinja::ErrorKind::InvalidOperation, format!("toyaml: {}", e))
    })?;
    Ok(rendered.trim_end().to_string())
}

fn nindent(value: String, width: usize) -> String {
    let pad = " ".repeat(width);
    let body = value
        .lines()
        .map(|line| if line.is_empty() { String::new() } else { format!("{}{}", pad, line) })
        .collect::<Vec<_>>()
        .join("\n");
    format!("\n{}", body)
}

/// Release and chart identity exposed to templates
#[derive(Debug, Clone, Copy)]
pub struct Release<'a> {
    /// Release name (the owner's name)
    pub name: &'a str,
    /// Release namespace
    pub namespace: &'a str,
    /// Chart name
    pub chart_name: &'a str,
    /// Chart version
    pub chart_version: &'a str,
}

impl Release<'_> {
    /// Template context for the given values
    pub fn context(&self, values: &Value) -> Value {
        json!({
            "Values": values,
            "Release": {
                "Name": self.name,
                "Namespace": self.namespace,
                "Service": "Helm",
                "IsInstall": true,
            },
            "Chart": {
                "Name": self.chart_name,
                "Version": self.chart_version,
            },
        })
    }
}

/// Renders `targets` with `includes` available to `{% include %}`.
///
/// Returns `(template name, rendered text)` per target.
pub fn render(
    targets: &[&Template],
    includes: &[&Template],
    context: &Value,
) -> Result<Vec<(String, String)>, ControllerError> {
    let sources = includes
        .iter()
        .chain(targets)
        .map(|t| Ok((t.name.clone(), preprocess(&t.text)?)))
        .collect::<Result<Vec<_>, ControllerError>>()?;

    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Chainable);
    env.set_trim_blocks(true);
    env.add_filter("quote", quote);
    env.add_filter("b64enc", b64enc);
    env.add_filter("toYaml", toyaml);
    env.add_filter("toyaml", toyaml);
    env.add_filter("nindent", nindent);
    for (name, source) in &sources {
        env.add_template(name, source)
            .map_err(|e| ControllerError::Chart(format!("{}: {:#}", name, e)))?;
    }

    targets
        .iter()
        .map(|target| {
            let template = env.get_template(&target.name)?;
            let rendered = template
                .render(context)
                .map_err(|e| ControllerError::Chart(format!("{}: {:#}", target.name, e)))?;
            Ok((target.name.clone(), rendered))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release() -> Release<'static> {
        Release {
            name: "drv",
            namespace: "drivers",
            chart_name: "driver",
            chart_version: "0.0.1",
        }
    }

    #[test]
    fn test_preprocess_rewrites_leading_dots_only() {
        assert_eq!(preprocess("{{ .Values.a }}").expect("ok"), "{{ Values.a }}");
        assert_eq!(preprocess("{{- .Release.Name -}}").expect("ok"), "{{- Release.Name -}}");
        assert_eq!(preprocess("{{ foo.Values }}").expect("ok"), "{{ foo.Values }}");
        assert_eq!(preprocess(".Values at line start").expect("ok"), "Values at line start");
    }

    #[test]
    fn test_render_helm_style_template() {
        let template = Template::new(
            "0000-cm.yaml",
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {{ .Release.Name }}-cm\n  namespace: {{ .Release.Namespace }}\ndata:\n  kernel: {{ .Values.kernelFullVersion | quote }}\n",
        );
        let context = release().context(&json!({"kernelFullVersion": "5.14.0-70.el9.x86_64"}));
        let rendered = render(&[&template], &[], &context).expect("rendered");
        let doc: Value = serde_yaml::from_str(&rendered[0].1).expect("yaml");
        assert_eq!(doc["metadata"]["name"], "drv-cm");
        assert_eq!(doc["metadata"]["namespace"], "drivers");
        assert_eq!(doc["data"]["kernel"], "5.14.0-70.el9.x86_64");
    }

    #[test]
    fn test_state_template_includes_no_state_template() {
        let helpers = Template::new("_labels.tpl", "app: {{ .Release.Name }}");
        let template = Template::new(
            "0001-ds.yaml",
            "metadata:\n  labels:\n    {% include \"_labels.tpl\" %}\n",
        );
        let context = release().context(&json!({}));
        let rendered = render(&[&template], &[&helpers], &context).expect("rendered");
        assert!(rendered[0].1.contains("app: drv"));
    }

    #[test]
    fn test_missing_values_render_empty() {
        let template = Template::new("0000-cm.yaml", "x: '{{ .Values.not.there }}'");
        let rendered = render(&[&template], &[], &release().context(&json!({}))).expect("rendered");
        assert_eq!(rendered[0].1.trim(), "x: ''");
    }

    #[test]
    fn test_syntax_error_is_chart_error() {
        let template = Template::new("0000-cm.yaml", "{{ .Values.a ");
        let err = render(&[&template], &[], &release().context(&json!({}))).expect_err("bad syntax");
        assert!(matches!(err, ControllerError::Chart(_)));
    }

    #[test]
    fn test_filters() {
        let template = Template::new("cm.yaml", "{{ .Values.s | b64enc }}|{{ .Values.m | toYaml }}");
        let rendered = render(&[&template], &[], &release().context(&json!({"s": "hi", "m": {"a": 1}}))).expect("rendered");
        assert_eq!(rendered[0].1, "aGk=|a: 1");
    }
}
