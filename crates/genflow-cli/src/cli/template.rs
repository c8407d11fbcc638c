//! CLI template library commands: list, search, show, export.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use genflow_core::workflow::library::WorkflowTemplate;

use crate::state::AppState;

#[derive(Subcommand)]
pub enum TemplateCommand {
    /// List templates, optionally only those with a tag.
    List {
        #[arg(long)]
        tag: Option<String>,
    },

    /// Search templates by name, description or tag.
    Search {
        keyword: String,
    },

    /// Show one template's steps and sample inputs.
    Show {
        /// Template ID.
        id: String,
    },

    /// Write a template as YAML, e.g. as a starting point for a custom one.
    Export {
        /// Template ID.
        id: String,

        /// Write to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

pub async fn handle_template_command(
    action: TemplateCommand,
    state: &AppState,
    json: bool,
) -> Result<()> {
    match action {
        TemplateCommand::List { tag } => {
            let templates = state.engine.templates().list_templates(tag.as_deref());
            print_templates(&templates, json)
        }
        TemplateCommand::Search { keyword } => {
            let templates = state.engine.templates().search_templates(&keyword);
            print_templates(&templates, json)
        }
        TemplateCommand::Show { id } => show_template(state, &id, json),
        TemplateCommand::Export { id, output } => {
            export_template(state, &id, output.as_deref()).await
        }
    }
}

fn print_templates(templates: &[&WorkflowTemplate], json: bool) -> Result<()> {
    if json {
        let out: Vec<_> = templates
            .iter()
            .map(|t| {
                serde_json::json!({
                    "id": t.id,
                    "name": t.name,
                    "description": t.description,
                    "steps": t.steps.len(),
                    "tags": t.tags,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if templates.is_empty() {
        println!();
        println!("  No matching templates.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID").fg(Color::Cyan),
            Cell::new("Name").fg(Color::Cyan),
            Cell::new("Steps").fg(Color::Cyan),
            Cell::new("Tags").fg(Color::Cyan),
        ]);

    for t in templates {
        table.add_row(vec![
            Cell::new(&t.id),
            Cell::new(&t.name),
            Cell::new(t.steps.len()),
            Cell::new(t.tags.join(", ")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

fn show_template(state: &AppState, id: &str, json: bool) -> Result<()> {
    let template = state.engine.templates().get_template(id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(template)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {}",
        style("Template:").bold(),
        style(&template.name).cyan()
    );
    println!("  ID: {}", template.id);
    if !template.description.is_empty() {
        println!("  {}", style(&template.description).dim());
    }
    println!("  Max concurrent steps: {}", template.config.max_concurrent_steps);
    if let Some(timeout) = template.config.timeout_seconds {
        println!("  Timeout: {timeout}s");
    }
    println!();
    println!("  {}", style("Steps:").bold());
    for step in &template.steps {
        let deps = if step.dependencies.is_empty() {
            String::new()
        } else {
            format!(" (after {})", step.dependencies.join(", "))
        };
        println!(
            "    {} [{}]{}",
            style(&step.id).cyan(),
            step.step_type,
            style(deps).dim()
        );
    }
    if !template.example_inputs.is_empty() {
        println!();
        println!("  {}", style("Example inputs:").bold());
        for (key, value) in &template.example_inputs {
            println!("    {key} = {value}");
        }
    }
    println!();
    println!(
        "  Run it with: {}",
        style(format!("genflow run --template {} --input KEY=VALUE", template.id)).dim()
    );
    println!();
    Ok(())
}

async fn export_template(state: &AppState, id: &str, output: Option<&Path>) -> Result<()> {
    let yaml = state.engine.templates().export_template(id)?;
    match output {
        Some(path) => {
            tokio::fs::write(path, yaml)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!(
                "  {} Exported template '{}' to {}",
                style("✓").green().bold(),
                style(id).cyan(),
                path.display()
            );
        }
        None => print!("{yaml}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use genflow_core::workflow::engine::WorkflowEngine;
    use genflow_core::workflow::library::TemplateLibrary;
    use genflow_infra::filesystem::state::JsonFileBackend;
    use genflow_infra::state::AnyStateBackend;
    use genflow_types::config::GenflowConfig;
    use tempfile::TempDir;

    use super::*;
    use crate::steps;

    #[tokio::test]
    async fn test_exported_template_reimports() {
        let tmp = TempDir::new().unwrap();
        let backend = JsonFileBackend::new(tmp.path()).await.unwrap();
        let state = AppState {
            engine: WorkflowEngine::new(AnyStateBackend::File(backend), steps::registry(false)),
            config: GenflowConfig::default(),
            data_dir: tmp.path().to_path_buf(),
        };

        let path = tmp.path().join("story.yaml");
        export_template(&state, "story_video_generation", Some(&path))
            .await
            .unwrap();

        let yaml = tokio::fs::read_to_string(&path).await.unwrap();
        let mut library = TemplateLibrary::new();
        assert_eq!(library.import_template(&yaml).unwrap(), "story_video_generation");
        assert!(show_template(&state, "story_video_generation", true).is_ok());
        assert!(show_template(&state, "ghost", true).is_err());
    }
}
