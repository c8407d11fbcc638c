//! CLI workflow commands.
//!
//! Provides run, create, start/resume, cancel, status, list, logs, context,
//! export/import, delete and cleanup. Runs execute inside this process: the
//! command waits for the run, and Ctrl+C (or `--wait-timeout`) pauses it so
//! it can be resumed later with `genflow resume`.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use dialoguer::Confirm;
use genflow_core::workflow::callback::WorkflowCallback;
use genflow_core::workflow::error::WorkflowError;
use genflow_types::event::WorkflowEvent;
use genflow_types::workflow::{
    DagProgress, NodeStatus, WorkflowExport, WorkflowProgressReport, WorkflowStatus,
};
use indicatif::{ProgressBar, ProgressStyle};

use super::WorkflowSource;
use super::file::{WorkflowFile, apply_inputs};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Creation
// ---------------------------------------------------------------------------

/// Create a workflow from a file or template. Returns its id.
async fn create_from_source(state: &AppState, source: &WorkflowSource) -> Result<String> {
    if let Some(template_id) = &source.template {
        let template = state.engine.templates().get_template(template_id)?;
        let mut inputs = template.example_inputs.clone();
        apply_inputs(&mut inputs, &source.inputs)?;
        return Ok(state
            .engine
            .create_workflow_from_template(template_id, inputs)
            .await?);
    }

    let Some(path) = &source.file else {
        bail!("either a workflow file or --template is required");
    };
    let file = WorkflowFile::load(path).await?;
    let mut context = file.context;
    apply_inputs(&mut context, &source.inputs)?;
    Ok(state
        .engine
        .create_workflow(file.config, file.steps, context)
        .await?)
}

/// Create a workflow without running it.
pub async fn create_workflow(state: &AppState, source: &WorkflowSource, json: bool) -> Result<()> {
    let workflow_id = create_from_source(state, source).await?;
    let report = require_status(state, &workflow_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Workflow '{}' created.",
        style("*").green().bold(),
        style(&report.name).cyan()
    );
    println!("  ID: {workflow_id}");
    println!("  Steps: {}", report.progress.total);
    println!();
    println!(
        "  Start it with: {}",
        style(format!("genflow start {workflow_id}")).dim()
    );
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Running
// ---------------------------------------------------------------------------

/// Create a workflow and drive it to a final status.
pub async fn run_workflow(
    state: &AppState,
    source: &WorkflowSource,
    wait_timeout: Option<u64>,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let workflow_id = create_from_source(state, source).await?;
    if !json && !quiet {
        println!();
        println!("  Workflow ID: {}", style(&workflow_id).cyan());
    }
    drive(state, &workflow_id, false, wait_timeout, json, quiet).await
}

/// Start (or resume) a stored workflow and wait for it.
pub async fn start_workflow(
    state: &AppState,
    workflow_id: &str,
    resume: bool,
    json: bool,
    quiet: bool,
) -> Result<()> {
    drive(state, workflow_id, resume, None, json, quiet).await
}

async fn drive(
    state: &AppState,
    workflow_id: &str,
    resume: bool,
    wait_timeout: Option<u64>,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let engine = &state.engine;

    let spinner = (!json && !quiet).then(progress_spinner).transpose()?;
    if let Some(spinner) = &spinner {
        let spinner = spinner.clone();
        engine.add_callback(
            workflow_id,
            WorkflowCallback::sync(move |_, event| {
                report_event(&spinner, event);
                Ok(())
            }),
        );
    }

    if resume {
        engine.resume_workflow(workflow_id).await?;
    } else {
        engine.start_workflow(workflow_id).await?;
    }

    let limit = wait_timeout.map(Duration::from_secs);
    let finished = tokio::select! {
        finished = engine.wait_for_completion(workflow_id, limit) => finished,
        _ = tokio::signal::ctrl_c() => false,
    };

    if !finished {
        match engine.pause_workflow(workflow_id).await {
            Ok(()) | Err(WorkflowError::NotRunning(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    let report = require_status(state, workflow_id).await?;
    if json {
        let context = engine.get_workflow_context(workflow_id).await?;
        let out = serde_json::json!({
            "workflow_id": report.workflow_id,
            "name": report.name,
            "status": report.status,
            "progress": report.progress,
            "context": context,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if !quiet {
        print_outcome(state, &report).await?;
    }

    if report.status == WorkflowStatus::Failed {
        bail!("workflow '{workflow_id}' failed");
    }
    Ok(())
}

fn progress_spinner() -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("  {spinner:.cyan} {msg}")?);
    spinner.set_message("Running...");
    spinner.enable_steady_tick(Duration::from_millis(80));
    Ok(spinner)
}

fn report_event(spinner: &ProgressBar, event: &WorkflowEvent) {
    if let WorkflowEvent::StepCompleted {
        completed_steps,
        progress,
    } = event
    {
        spinner.println(format!(
            "  {} {}",
            style("-").dim(),
            completed_steps.join(", ")
        ));
        spinner.set_message(progress_line(progress));
    }
}

async fn print_outcome(state: &AppState, report: &WorkflowProgressReport) -> Result<()> {
    let id = &report.workflow_id;
    println!();
    match report.status {
        WorkflowStatus::Completed => println!(
            "  {} Workflow '{}' completed.",
            style("✓").green().bold(),
            style(&report.name).cyan()
        ),
        WorkflowStatus::Failed => {
            println!(
                "  {} Workflow '{}' failed.",
                style("✗").red().bold(),
                style(&report.name).cyan()
            );
            for log in state.engine.get_workflow_logs(id, None).await? {
                if log.status == NodeStatus::Failed {
                    let error = log.error.unwrap_or_default();
                    println!("    {}: {}", log.step_id, style(error).red());
                }
            }
        }
        WorkflowStatus::Paused => {
            println!(
                "  {} Workflow '{}' paused.",
                style("‖").yellow().bold(),
                style(&report.name).cyan()
            );
            println!(
                "  Resume with: {}",
                style(format!("genflow resume {id}")).dim()
            );
        }
        other => println!("  Workflow '{}' is {other}.", style(&report.name).cyan()),
    }
    println!("  {}", progress_line(&report.progress));
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

pub async fn cancel_workflow(state: &AppState, workflow_id: &str, json: bool) -> Result<()> {
    state.engine.cancel_workflow(workflow_id).await?;
    let report = require_status(state, workflow_id).await?;

    if json {
        println!(
            "{}",
            serde_json::json!({"workflow_id": workflow_id, "status": report.status})
        );
    } else {
        println!(
            "  {} Workflow '{}' is {}.",
            style("✓").green().bold(),
            style(&report.name).cyan(),
            report.status
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

pub async fn show_status(state: &AppState, workflow_id: &str, json: bool) -> Result<()> {
    let report = require_status(state, workflow_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let p = &report.progress;
    println!();
    println!(
        "  {} {}",
        style("Workflow:").bold(),
        style(&report.name).cyan()
    );
    println!("  ID: {}", report.workflow_id);
    println!("  Status: {}", report.status);
    println!("  Created: {}", report.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("  Updated: {}", report.updated_at.format("%Y-%m-%d %H:%M:%S"));
    println!("  {}", progress_line(p));
    println!(
        "  Pending: {}  Ready: {}  Running: {}  Skipped: {}",
        p.pending, p.ready, p.running, p.skipped
    );
    println!();
    Ok(())
}

pub async fn list_workflows(state: &AppState, status: Option<&str>, json: bool) -> Result<()> {
    let status = status
        .map(|s| s.parse::<WorkflowStatus>().map_err(anyhow::Error::msg))
        .transpose()?;
    let workflows: Vec<_> = state
        .engine
        .list_workflows()
        .await?
        .into_iter()
        .filter(|w| status.is_none_or(|s| w.status == s))
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&workflows)?);
        return Ok(());
    }

    if workflows.is_empty() {
        println!();
        println!("  No workflows in {}.", state.data_dir.display());
        println!(
            "  Create one with: {}",
            style("genflow run <workflow.yaml>").dim()
        );
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
            Cell::new("Status").fg(Color::Cyan),
            Cell::new("Progress").fg(Color::Cyan),
            Cell::new("Updated").fg(Color::Cyan),
        ]);

    for w in &workflows {
        table.add_row(vec![
            Cell::new(&w.workflow_id),
            Cell::new(&w.name),
            format_status(w.status),
            Cell::new(format!(
                "{}/{} ({:.0}%)",
                w.progress.completed, w.progress.total, w.progress.progress_percent
            )),
            Cell::new(w.updated_at.format("%Y-%m-%d %H:%M").to_string()),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

pub async fn show_logs(
    state: &AppState,
    workflow_id: &str,
    step: Option<&str>,
    json: bool,
) -> Result<()> {
    require_status(state, workflow_id).await?;
    let logs = state.engine.get_workflow_logs(workflow_id, step).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&logs)?);
        return Ok(());
    }

    if logs.is_empty() {
        println!();
        match step {
            Some(step) => println!("  No step '{step}' in workflow '{workflow_id}'."),
            None => println!("  Workflow '{workflow_id}' has no steps."),
        }
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Type").fg(Color::Cyan),
            Cell::new("Status").fg(Color::Cyan),
            Cell::new("Retries").fg(Color::Cyan),
            Cell::new("Duration").fg(Color::Cyan),
            Cell::new("Error").fg(Color::Cyan),
        ]);

    for log in &logs {
        let duration = log
            .execution_time
            .map(|s| format!("{s:.2}s"))
            .unwrap_or_else(|| "-".into());
        table.add_row(vec![
            Cell::new(&log.step_id),
            Cell::new(&log.step_type),
            format_node_status(log.status),
            Cell::new(log.retry_count),
            Cell::new(duration),
            Cell::new(log.error.as_deref().unwrap_or("")).fg(Color::Red),
        ]);
    }

    println!();
    println!("  Step logs for {}", style(workflow_id).cyan());
    println!();
    println!("{table}");
    println!();
    Ok(())
}

pub async fn show_context(state: &AppState, workflow_id: &str) -> Result<()> {
    let context = state
        .engine
        .get_workflow_context(workflow_id)
        .await?
        .ok_or_else(|| WorkflowError::WorkflowNotFound(workflow_id.to_string()))?;
    println!("{}", serde_json::to_string_pretty(&context)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Export / import
// ---------------------------------------------------------------------------

pub async fn export_workflow(
    state: &AppState,
    workflow_id: &str,
    output: Option<&Path>,
    json: bool,
) -> Result<()> {
    let export = state
        .engine
        .export_workflow_definition(workflow_id)
        .await?
        .ok_or_else(|| WorkflowError::WorkflowNotFound(workflow_id.to_string()))?;
    let body = serde_json::to_string_pretty(&export)?;

    let Some(path) = output else {
        println!("{body}");
        return Ok(());
    };

    tokio::fs::write(path, body)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    if json {
        println!(
            "{}",
            serde_json::json!({"workflow_id": workflow_id, "path": path})
        );
    } else {
        println!(
            "  {} Exported '{}' to {}",
            style("✓").green().bold(),
            style(&export.name).cyan(),
            path.display()
        );
    }
    Ok(())
}

pub async fn import_workflow(state: &AppState, file: &Path, json: bool) -> Result<()> {
    let raw = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let definition: WorkflowExport = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not an exported workflow", file.display()))?;
    let name = definition.name.clone();
    let workflow_id = state.engine.import_workflow_definition(definition).await?;

    if json {
        println!(
            "{}",
            serde_json::json!({"workflow_id": workflow_id, "name": name})
        );
    } else {
        println!(
            "  {} Imported '{}' as {}",
            style("✓").green().bold(),
            style(&name).cyan(),
            workflow_id
        );
        println!(
            "  Start it with: {}",
            style(format!("genflow start {workflow_id}")).dim()
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Delete / cleanup
// ---------------------------------------------------------------------------

pub async fn delete_workflow(
    state: &AppState,
    workflow_id: &str,
    force: bool,
    json: bool,
) -> Result<()> {
    let report = require_status(state, workflow_id).await?;

    if !force && !json {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Permanently delete workflow '{}' ({})?",
                style(&report.name).red().bold(),
                report.status
            ))
            .default(false)
            .interact()?;

        if !confirmed {
            println!("  Cancelled.");
            return Ok(());
        }
    }

    state.engine.delete_workflow(workflow_id).await?;

    if json {
        println!(
            "{}",
            serde_json::json!({"deleted": true, "workflow_id": workflow_id})
        );
    } else {
        println!(
            "  {} Workflow '{}' deleted.",
            style("✓").red().bold(),
            report.name
        );
    }
    Ok(())
}

pub async fn cleanup_workflows(
    state: &AppState,
    max_age_days: Option<u32>,
    json: bool,
) -> Result<()> {
    let days = max_age_days.unwrap_or(state.config.engine.cleanup_max_age_days);
    let removed = state.engine.cleanup_old_workflows(days).await?;

    if json {
        println!(
            "{}",
            serde_json::json!({"removed": removed, "max_age_days": days})
        );
    } else {
        println!(
            "  {} Removed {removed} workflow(s) older than {days} day(s).",
            style("✓").green().bold()
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn require_status(state: &AppState, workflow_id: &str) -> Result<WorkflowProgressReport> {
    Ok(state
        .engine
        .get_workflow_status(workflow_id)
        .await?
        .ok_or_else(|| WorkflowError::WorkflowNotFound(workflow_id.to_string()))?)
}

fn progress_line(p: &DagProgress) -> String {
    format!(
        "{}/{} steps done, {} failed ({:.0}%)",
        p.completed, p.total, p.failed, p.progress_percent
    )
}

fn format_status(status: WorkflowStatus) -> Cell {
    let cell = Cell::new(status.as_str());
    match status {
        WorkflowStatus::Created | WorkflowStatus::Imported => cell.fg(Color::Yellow),
        WorkflowStatus::Running => cell.fg(Color::Blue),
        WorkflowStatus::Paused => cell.fg(Color::Magenta),
        WorkflowStatus::Completed => cell.fg(Color::Green),
        WorkflowStatus::Failed => cell.fg(Color::Red),
        WorkflowStatus::Cancelled => cell.fg(Color::DarkYellow),
    }
}

fn format_node_status(status: NodeStatus) -> Cell {
    let cell = Cell::new(status.as_str());
    match status {
        NodeStatus::Pending | NodeStatus::Ready => cell.fg(Color::Yellow),
        NodeStatus::Running => cell.fg(Color::Blue),
        NodeStatus::Completed => cell.fg(Color::Green),
        NodeStatus::Failed => cell.fg(Color::Red),
        NodeStatus::Skipped => cell.fg(Color::DarkGrey),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use genflow_core::workflow::engine::WorkflowEngine;
    use genflow_infra::filesystem::state::JsonFileBackend;
    use genflow_infra::state::AnyStateBackend;
    use genflow_types::config::GenflowConfig;
    use tempfile::TempDir;

    use super::*;
    use crate::steps;

    async fn app(tmp: &TempDir, dry_run: bool) -> AppState {
        let backend = JsonFileBackend::new(tmp.path().join("workflows")).await.unwrap();
        AppState {
            engine: WorkflowEngine::new(AnyStateBackend::File(backend), steps::registry(dry_run)),
            config: GenflowConfig::default(),
            data_dir: tmp.path().to_path_buf(),
        }
    }

    fn source(file: Option<PathBuf>, template: Option<&str>, inputs: &[&str]) -> WorkflowSource {
        WorkflowSource {
            file,
            template: template.map(str::to_string),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            dry_run: false,
        }
    }

    #[tokio::test]
    async fn test_run_file_workflow_to_completion() {
        let tmp = TempDir::new().unwrap();
        let state = app(&tmp, false).await;
        let path = tmp.path().join("flow.yaml");
        tokio::fs::write(
            &path,
            r#"
name: greeting
context:
  who: nobody
steps:
  - id: greet
    type: echo
    config:
      message: "hello {{who}}"
  - id: pause
    type: delay
    dependencies: [greet]
    config:
      seconds: 0
"#,
        )
        .await
        .unwrap();

        let src = source(Some(path), None, &["who=world"]);
        let id = create_from_source(&state, &src).await.unwrap();
        drive(&state, &id, false, None, true, true).await.unwrap();

        let report = require_status(&state, &id).await.unwrap();
        assert_eq!(report.status, WorkflowStatus::Completed);
        assert_eq!(report.progress.completed, 2);
        let context = state.engine.get_workflow_context(&id).await.unwrap().unwrap();
        assert_eq!(context["message"], "hello world");
        assert_eq!(context["seconds"], 0);
    }

    #[tokio::test]
    async fn test_failed_run_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let state = app(&tmp, false).await;
        let path = tmp.path().join("flow.yaml");
        tokio::fs::write(
            &path,
            "name: doomed\nsteps:\n  - id: boom\n    type: fail\n    max_retries: 0\n    config:\n      message: nope\n",
        )
        .await
        .unwrap();

        let id = create_from_source(&state, &source(Some(path), None, &[]))
            .await
            .unwrap();
        let err = drive(&state, &id, false, None, true, true).await.unwrap_err();
        assert!(err.to_string().contains("failed"));

        let logs = state.engine.get_workflow_logs(&id, Some("boom")).await.unwrap();
        assert_eq!(logs[0].error.as_deref(), Some("nope"));
    }

    #[tokio::test]
    async fn test_template_dry_run_uses_example_inputs() {
        let tmp = TempDir::new().unwrap();
        let state = app(&tmp, true).await;

        let src = source(None, Some("social_media_content"), &[]);
        let id = create_from_source(&state, &src).await.unwrap();
        drive(&state, &id, false, None, true, true).await.unwrap();

        let report = require_status(&state, &id).await.unwrap();
        assert_eq!(report.status, WorkflowStatus::Completed);
        let template = state
            .engine
            .templates()
            .get_template("social_media_content")
            .unwrap();
        let context = state.engine.get_workflow_context(&id).await.unwrap().unwrap();
        for key in template.example_inputs.keys() {
            assert!(context.contains_key(key), "missing input {key}");
        }
    }

    #[tokio::test]
    async fn test_template_needs_generation_steps_without_dry_run() {
        let tmp = TempDir::new().unwrap();
        let state = app(&tmp, false).await;

        let src = source(None, Some("social_media_content"), &[]);
        let err = create_from_source(&state, &src).await.unwrap_err();
        assert!(err.to_string().contains("unknown step type"));
        assert!(state.engine.list_workflows().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_export_then_import_round_trip() {
        let tmp = TempDir::new().unwrap();
        let state = app(&tmp, false).await;
        let path = tmp.path().join("flow.yaml");
        tokio::fs::write(&path, "name: portable\nsteps:\n  - id: a\n    type: echo\n")
            .await
            .unwrap();
        let id = create_from_source(&state, &source(Some(path), None, &[]))
            .await
            .unwrap();

        let exported = tmp.path().join("export.json");
        export_workflow(&state, &id, Some(&exported), true).await.unwrap();
        import_workflow(&state, &exported, true).await.unwrap();

        let workflows = state.engine.list_workflows().await.unwrap();
        assert_eq!(workflows.len(), 2);
        assert!(workflows.iter().any(|w| w.status == WorkflowStatus::Imported));
    }

    #[tokio::test]
    async fn test_missing_workflow_is_reported() {
        let tmp = TempDir::new().unwrap();
        let state = app(&tmp, false).await;

        let err = show_status(&state, "ghost", true).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
        assert!(delete_workflow(&state, "ghost", true, true).await.is_err());
    }
}
