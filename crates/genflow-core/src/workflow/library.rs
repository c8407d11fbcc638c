//! Workflow template library.
//!
//! A template is a reusable workflow recipe: run config, step definitions,
//! sample inputs and a few descriptive fields. Templates are YAML documents;
//! the built-in ones are compiled into the binary.

use std::collections::BTreeMap;

use genflow_types::workflow::{DagNode, JsonMap, StepDefinition, WorkflowConfig};
use serde::{Deserialize, Serialize};

use super::dag::WorkflowDag;
use super::error::WorkflowError;

const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    (
        "story_video_generation",
        include_str!("../../templates/story_video_generation.yaml"),
    ),
    (
        "multimedia_content_creation",
        include_str!("../../templates/multimedia_content_creation.yaml"),
    ),
    (
        "social_media_content",
        include_str!("../../templates/social_media_content.yaml"),
    ),
    (
        "product_introduction",
        include_str!("../../templates/product_introduction.yaml"),
    ),
    (
        "educational_content",
        include_str!("../../templates/educational_content.yaml"),
    ),
];

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub config: WorkflowConfig,
    pub steps: Vec<StepDefinition>,
    /// Sample initial context, documenting the placeholders the steps use.
    #[serde(default)]
    pub example_inputs: JsonMap,
    /// Context keys a successful run is expected to produce.
    #[serde(default)]
    pub expected_outputs: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl WorkflowTemplate {
    /// Parse a YAML template and check that its steps form a valid DAG.
    pub fn from_yaml(yaml: &str) -> Result<Self, WorkflowError> {
        let template: Self =
            serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::InvalidTemplate(e.to_string()))?;
        template.validate()?;
        Ok(template)
    }

    pub fn to_yaml(&self) -> Result<String, WorkflowError> {
        serde_yaml_ng::to_string(self).map_err(|e| WorkflowError::InvalidTemplate(e.to_string()))
    }

    /// Non-empty id, at least one step, and a graph the engine would accept.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.id.trim().is_empty() {
            return Err(WorkflowError::InvalidTemplate("template id is empty".into()));
        }
        if self.steps.is_empty() {
            return Err(WorkflowError::InvalidTemplate(format!(
                "template '{}' has no steps",
                self.id
            )));
        }
        let mut dag = WorkflowDag::new();
        for step in &self.steps {
            dag.add_node(DagNode::from(step.clone()))
                .map_err(|e| WorkflowError::InvalidTemplate(format!("{}: {e}", self.id)))?;
        }
        Ok(())
    }

    fn matches(&self, keyword: &str) -> bool {
        self.name.to_lowercase().contains(keyword)
            || self.description.to_lowercase().contains(keyword)
            || self.tags.iter().any(|t| t.to_lowercase().contains(keyword))
    }
}

// ---------------------------------------------------------------------------
// Library
// ---------------------------------------------------------------------------

/// Templates keyed by id, listed in id order.
#[derive(Debug, Clone, Default)]
pub struct TemplateLibrary {
    templates: BTreeMap<String, WorkflowTemplate>,
}

impl TemplateLibrary {
    /// An empty library.
    pub fn new() -> Self {
        Self::default()
    }

    /// A library preloaded with the built-in templates.
    pub fn builtin() -> Self {
        let mut library = Self::new();
        for (id, source) in BUILTIN_TEMPLATES {
            match WorkflowTemplate::from_yaml(source) {
                Ok(template) => library.add_template(template),
                Err(e) => tracing::error!(template = id, error = %e, "skipping broken built-in template"),
            }
        }
        library
    }

    pub fn get_template(&self, template_id: &str) -> Result<&WorkflowTemplate, WorkflowError> {
        self.templates
            .get(template_id)
            .ok_or_else(|| WorkflowError::TemplateNotFound(template_id.to_string()))
    }

    /// All templates, or only those carrying `tag`.
    pub fn list_templates(&self, tag: Option<&str>) -> Vec<&WorkflowTemplate> {
        self.templates
            .values()
            .filter(|t| tag.is_none_or(|tag| t.tags.iter().any(|x| x == tag)))
            .collect()
    }

    /// Case-insensitive match on name, description and tags.
    pub fn search_templates(&self, keyword: &str) -> Vec<&WorkflowTemplate> {
        let keyword = keyword.to_lowercase();
        self.templates
            .values()
            .filter(|t| t.matches(&keyword))
            .collect()
    }

    /// Insert or replace by id.
    pub fn add_template(&mut self, template: WorkflowTemplate) {
        tracing::debug!(template = %template.id, "registered workflow template");
        self.templates.insert(template.id.clone(), template);
    }

    /// Remove by id. Removing a missing id is a no-op.
    pub fn remove_template(&mut self, template_id: &str) -> Option<WorkflowTemplate> {
        self.templates.remove(template_id)
    }

    pub fn export_template(&self, template_id: &str) -> Result<String, WorkflowError> {
        self.get_template(template_id)?.to_yaml()
    }

    /// Parse, validate and add a YAML template. Returns its id.
    pub fn import_template(&mut self, yaml: &str) -> Result<String, WorkflowError> {
        let template = WorkflowTemplate::from_yaml(yaml)?;
        let id = template.id.clone();
        self.add_template(template);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
