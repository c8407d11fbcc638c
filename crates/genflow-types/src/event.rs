//! Events delivered to workflow callbacks.

use serde::{Deserialize, Serialize};

use crate::workflow::{DagProgress, WorkflowStatus};

/// Lifecycle events emitted by the engine for one workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// A batch finished; fired once per executed batch.
    StepCompleted {
        /// Node ids of the batch.
        completed_steps: Vec<String>,
        progress: DagProgress,
    },

    /// The run reached its final status; fired once.
    WorkflowCompleted {
        status: WorkflowStatus,
        /// Seconds.
        execution_time: f64,
        progress: DagProgress,
    },
}

impl WorkflowEvent {
    /// Event name as exposed to listeners.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StepCompleted { .. } => "step_completed",
            Self::WorkflowCompleted { .. } => "workflow_completed",
        }
    }

    pub fn progress(&self) -> &DagProgress {
        match self {
            Self::StepCompleted { progress, .. } | Self::WorkflowCompleted { progress, .. } => {
                progress
            }
        }
    }
}
