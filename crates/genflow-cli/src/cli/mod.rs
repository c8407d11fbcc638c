//! CLI command definitions for the `genflow` binary.
//!
//! Uses clap derive macros for argument parsing. Workflow commands are
//! top-level verbs (`genflow run`, `genflow status <id>`); template browsing
//! lives under `genflow templates`.

pub mod file;
pub mod template;
pub mod workflow;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

/// Run and manage DAG workflows.
#[derive(Parser)]
#[command(name = "genflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export tracing spans to stdout through OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a workflow and run it to completion.
    Run {
        #[command(flatten)]
        source: WorkflowSource,

        /// Give up waiting after this many seconds (the run is paused).
        #[arg(long)]
        wait_timeout: Option<u64>,
    },

    /// Create a workflow without starting it.
    Create {
        #[command(flatten)]
        source: WorkflowSource,
    },

    /// Start a created or imported workflow and wait for it.
    Start {
        /// Workflow ID.
        id: String,
    },

    /// Resume a paused or interrupted workflow and wait for it.
    Resume {
        /// Workflow ID.
        id: String,
    },

    /// Mark a workflow as cancelled.
    Cancel {
        /// Workflow ID.
        id: String,
    },

    /// Show status and progress of a workflow.
    Status {
        /// Workflow ID.
        id: String,
    },

    /// List stored workflows, newest first.
    List {
        /// Only show workflows with this status.
        #[arg(long)]
        status: Option<String>,
    },

    /// Show per-step execution logs.
    Logs {
        /// Workflow ID.
        id: String,

        /// Only show this step.
        #[arg(long)]
        step: Option<String>,
    },

    /// Print the accumulated context of a workflow.
    Context {
        /// Workflow ID.
        id: String,
    },

    /// Export a workflow definition (DAG and metadata) as JSON.
    Export {
        /// Workflow ID.
        id: String,

        /// Write to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Import a workflow definition exported with `genflow export`.
    Import {
        /// Path to the exported JSON file.
        file: PathBuf,
    },

    /// Delete a workflow record.
    Delete {
        /// Workflow ID.
        id: String,

        /// Skip confirmation.
        #[arg(long)]
        force: bool,
    },

    /// Delete workflows not updated within the given number of days.
    Cleanup {
        /// Age threshold in days (defaults to `engine.cleanup_max_age_days`).
        #[arg(long)]
        max_age_days: Option<u32>,
    },

    /// Browse the workflow template library.
    Templates {
        #[command(subcommand)]
        action: template::TemplateCommand,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

/// Where a new workflow comes from: a YAML file or a library template.
#[derive(Args, Debug, Clone)]
pub struct WorkflowSource {
    /// Path to a workflow YAML file.
    #[arg(required_unless_present = "template", conflicts_with = "template")]
    pub file: Option<PathBuf>,

    /// Library template ID to instantiate.
    #[arg(short, long)]
    pub template: Option<String>,

    /// Initial context entry as KEY=VALUE; VALUE is parsed as JSON when possible.
    #[arg(short, long = "input", value_name = "KEY=VALUE")]
    pub inputs: Vec<String>,

    /// Let generation steps echo their resolved config instead of calling a model.
    #[arg(long)]
    pub dry_run: bool,
}
