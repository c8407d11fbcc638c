//! Workflow definition files and `--input` parsing.
//!
//! A workflow file is YAML: the run config fields at the top level, an
//! optional `context` map seeding the initial context, and the `steps` list.
//!
//! ```yaml
//! name: greeting
//! max_concurrent_steps: 2
//! context:
//!   who: world
//! steps:
//!   - id: greet
//!     type: echo
//!     config:
//!       message: "hello {{who}}"
//! ```

use std::path::Path;

use anyhow::{Context, bail};
use genflow_types::workflow::{JsonMap, StepDefinition, WorkflowConfig};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowFile {
    #[serde(flatten)]
    pub config: WorkflowConfig,
    #[serde(default)]
    pub context: JsonMap,
    pub steps: Vec<StepDefinition>,
}

impl WorkflowFile {
    pub fn parse(yaml: &str) -> anyhow::Result<Self> {
        let file: Self = serde_yaml_ng::from_str(yaml).context("invalid workflow file")?;
        if file.steps.is_empty() {
            bail!("workflow '{}' has no steps", file.config.name);
        }
        Ok(file)
    }

    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let yaml = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&yaml).with_context(|| format!("in {}", path.display()))
    }
}

/// Merge `KEY=VALUE` pairs into `context`. Values that parse as JSON are
/// stored as JSON; anything else is stored as a string.
pub fn apply_inputs(context: &mut JsonMap, inputs: &[String]) -> anyhow::Result<()> {
    for input in inputs {
        let Some((key, raw)) = input.split_once('=') else {
            bail!("input '{input}' must look like KEY=VALUE");
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("input '{input}' has an empty key");
        }
        let value =
            serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        context.insert(key.to_string(), value);
    }
    Ok(())
}
