//! Error types for the workflow engine.

use genflow_types::error::StateError;
use thiserror::Error;

/// Structural and lifecycle errors raised synchronously to callers.
///
/// Step failures never show up here: they are recorded on the failing node.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("node '{0}' already exists")]
    DuplicateNode(String),

    #[error("node '{node}' depends on unknown node '{dependency}'")]
    UnknownDependency { node: String, dependency: String },

    #[error("adding node '{0}' would create a cycle")]
    CycleDetected(String),

    #[error("node '{0}' not found")]
    NodeNotFound(String),

    #[error("node '{node}' is still required by {dependents:?}")]
    NodeHasDependents { node: String, dependents: Vec<String> },

    #[error("node '{0}' cannot be retried")]
    NotRetryable(String),

    #[error("unknown step type '{0}'")]
    UnknownStepType(String),

    #[error("invalid step definition: {0}")]
    InvalidStepDefinition(String),

    #[error("inconsistent graph: {0}")]
    InconsistentGraph(String),

    #[error("workflow '{0}' not found")]
    WorkflowNotFound(String),

    #[error("workflow '{0}' is already running")]
    AlreadyRunning(String),

    #[error("workflow '{0}' is not running")]
    NotRunning(String),

    #[error("template '{0}' not found")]
    TemplateNotFound(String),

    #[error("invalid template: {0}")]
    InvalidTemplate(String),

    #[error(transparent)]
    State(#[from] StateError),
}
