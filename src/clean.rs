//! CloudFormation template normalization.
//!
//! Removes the bookkeeping the synth tool injects (metadata resources,
//! bootstrap parameter and rule, metadata condition, path metadata) with an
//! order-preserving filter. Surviving entries are copied untouched, so
//! cleaning a cleaned template is a no-op.
//!
//! Numbers are re-rendered by `serde_json`: integers in the i64/u64 range
//! keep their text, other numeric literals may be normalized (`1.50` as `1.5`).
use crate::config::CleanerMarkers;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

/// Top-level sections kept by `clean`, in output order.
pub const RECOGNIZED_SECTIONS: [&str; 9] = [
    "AWSTemplateFormatVersion",
    "Description",
    "Metadata",
    "Parameters",
    "Mappings",
    "Conditions",
    "Transform",
    "Resources",
    "Outputs",
];

/// Ordered mapping of section name to section content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Template(pub Map<String, Value>);

impl Template {
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(anyhow!(
                "template must be a JSON object, found {}",
                json_kind(&other)
            )),
        }
    }

    pub fn section(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    fn section_object(&self, name: &str) -> Option<&Map<String, Value>> {
        self.section(name).and_then(Value::as_object)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanOptions {
    #[serde(default)]
    pub keep_resource_metadata: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleaningReport {
    pub removed_resource_names: BTreeSet<String>,
    pub removed_parameter_names: BTreeSet<String>,
    pub removed_condition_names: BTreeSet<String>,
    /// Unknown sections plus sections emptied by filtering.
    pub removed_sections: Vec<String>,
    pub stripped_metadata_paths: usize,
}

impl CleaningReport {
    pub fn is_noop(&self) -> bool {
        self.removed_resource_names.is_empty()
            && self.removed_parameter_names.is_empty()
            && self.removed_condition_names.is_empty()
            && self.removed_sections.is_empty()
            && self.stripped_metadata_paths == 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct TemplateCleaner {
    markers: CleanerMarkers,
    options: CleanOptions,
}

impl TemplateCleaner {
    pub fn new(markers: CleanerMarkers, options: CleanOptions) -> Self {
        Self { markers, options }
    }

    pub fn clean(&self, template: &Template) -> (Template, CleaningReport) {
        let mut report = CleaningReport::default();
        let mut cleaned = Map::new();

        for name in RECOGNIZED_SECTIONS {
            let Some(content) = template.section(name) else {
                continue;
            };
            let content = match name {
                "Resources" => self.clean_resources(content, &mut report),
                "Parameters" => self.clean_parameters(content, &mut report),
                "Conditions" => self.clean_conditions(content, &mut report),
                _ => content.clone(),
            };
            if is_empty_section(&content) {
                report.removed_sections.push(name.to_string());
                continue;
            }
            cleaned.insert(name.to_string(), content);
        }

        for name in template.section_names() {
            if !RECOGNIZED_SECTIONS.contains(&name) {
                report.removed_sections.push(name.to_string());
            }
        }

        (Template(cleaned), report)
    }

    pub fn is_generated_by_tool(&self, template: &Template) -> bool {
        let metadata_type = Some(&self.markers.metadata_resource_type);
        let has_metadata_resource = template
            .section_object("Resources")
            .is_some_and(|resources| {
                resources
                    .values()
                    .any(|resource| self.resource_type(resource) == metadata_type)
            });
        let has_bootstrap_parameter = template
            .section_object("Parameters")
            .is_some_and(|params| params.contains_key(&self.markers.bootstrap_parameter));
        let has_bootstrap_rule = template
            .section_object("Rules")
            .is_some_and(|rules| rules.contains_key(&self.markers.bootstrap_rule));
        has_metadata_resource || has_bootstrap_parameter || has_bootstrap_rule
    }

    fn resource_type<'a>(&self, resource: &'a Value) -> Option<&'a String> {
        match resource.get("Type") {
            Some(Value::String(kind)) => Some(kind),
            _ => None,
        }
    }

    fn clean_resources(&self, content: &Value, report: &mut CleaningReport) -> Value {
        let Some(resources) = content.as_object() else {
            return content.clone();
        };
        let mut kept = Map::new();
        for (name, resource) in resources {
            let is_metadata =
                self.resource_type(resource) == Some(&self.markers.metadata_resource_type);
            let gated_on_metadata = resource.get("Condition").and_then(Value::as_str)
                == Some(self.markers.metadata_condition.as_str());
            if is_metadata || gated_on_metadata {
                report.removed_resource_names.insert(name.clone());
                continue;
            }
            let mut resource = resource.clone();
            if !self.options.keep_resource_metadata {
                report.stripped_metadata_paths += self.strip_path_metadata(&mut resource);
            }
            kept.insert(name.clone(), resource);
        }
        Value::Object(kept)
    }

    /// Returns how many path keys were removed (0 or 1).
    fn strip_path_metadata(&self, resource: &mut Value) -> usize {
        let Some(resource) = resource.as_object_mut() else {
            return 0;
        };
        let Some(Value::Object(metadata)) = resource.get_mut("Metadata") else {
            return 0;
        };
        let removed = metadata.shift_remove(&self.markers.path_metadata_key).is_some();
        if metadata.is_empty() {
            resource.shift_remove("Metadata");
        }
        usize::from(removed)
    }

    fn clean_parameters(&self, content: &Value, report: &mut CleaningReport) -> Value {
        let Some(parameters) = content.as_object() else {
            return content.clone();
        };
        let mut kept = Map::new();
        for (name, parameter) in parameters {
            let skipped = parameter
                .get("Description")
                .and_then(Value::as_str)
                .is_some_and(|text| text.contains(&self.markers.skip_marker));
            if *name == self.markers.bootstrap_parameter || skipped {
                report.removed_parameter_names.insert(name.clone());
                continue;
            }
            kept.insert(name.clone(), parameter.clone());
        }
        Value::Object(kept)
    }

    fn clean_conditions(&self, content: &Value, report: &mut CleaningReport) -> Value {
        let Some(conditions) = content.as_object() else {
            return content.clone();
        };
        let mut kept = Map::new();
        for (name, condition) in conditions {
            if *name == self.markers.metadata_condition {
                report.removed_condition_names.insert(name.clone());
                continue;
            }
            kept.insert(name.clone(), condition.clone());
        }
        Value::Object(kept)
    }
}

fn is_empty_section(content: &Value) -> bool {
    match content {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(text) => text.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Clean with the built-in markers.
pub fn clean(template: &Template, options: CleanOptions) -> (Template, CleaningReport) {
    TemplateCleaner::new(CleanerMarkers::default(), options).clean(template)
}

/// Detect tool-generated templates with the built-in markers.
pub fn is_generated_by_tool(template: &Template) -> bool {
    TemplateCleaner::default().is_generated_by_tool(template)
}

pub fn load_template(path: &Path) -> Result<Template> {
    let bytes = fs::read(path).with_context(|| format!("read template {}", path.display()))?;
    let value: Value = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse template {}", path.display()))?;
    Template::from_value(value).with_context(|| format!("load template {}", path.display()))
}

/// Load, clean, and optionally write a template file.
pub fn clean_template_file(
    cleaner: &TemplateCleaner,
    input: &Path,
    output: Option<&Path>,
) -> Result<(Template, CleaningReport)> {
    let template = load_template(input)?;
    let (cleaned, report) = cleaner.clean(&template);
    if let Some(output) = output {
        crate::util::write_json_atomic(output, &cleaned)?;
    }
    tracing::debug!(
        input = %input.display(),
        removed_resources = report.removed_resource_names.len(),
        stripped_paths = report.stripped_metadata_paths,
        "cleaned template"
    );
    Ok((cleaned, report))
}

#[cfg(test)]
#[path = "clean_tests.rs"]
mod tests;
