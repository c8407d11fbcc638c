//! Workflow state manager: the single path from the engine to a backend.
//!
//! Wraps a [`StateBackend`] with the workflow-level API (save/load a DAG with
//! its context, status updates with metadata merging, listing, export and
//! import). Timestamp bookkeeping lives here, so every backend gets the same
//! rules: `created_at` is read back from the existing record and never
//! rewritten, and `updated_at` strictly increases on every save.

use chrono::{DateTime, Utc};
use genflow_types::error::StateError;
use genflow_types::workflow::{
    DagProgress, JsonMap, WorkflowExport, WorkflowProgressReport, WorkflowState, WorkflowStatus,
    WorkflowSummary, timestamp_now,
};

use crate::repository::state::StateBackend;

use super::dag::WorkflowDag;
use super::error::WorkflowError;

/// A workflow record rehydrated into a live DAG.
#[derive(Debug, Clone)]
pub struct LoadedWorkflow {
    pub name: String,
    pub dag: WorkflowDag,
    pub context: JsonMap,
    pub status: WorkflowStatus,
    pub metadata: JsonMap,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Owns all durable workflow state.
///
/// Generic over `B: StateBackend` for storage flexibility.
pub struct WorkflowStateManager<B: StateBackend> {
    backend: B,
}

impl<B: StateBackend> WorkflowStateManager<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Access the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Write `state` with `created_at` taken from the stored record (if any)
    /// and a fresh `updated_at`.
    async fn write(&self, mut state: WorkflowState) -> Result<(), StateError> {
        match self.backend.load_state(&state.workflow_id).await? {
            Some(existing) => {
                state.created_at = existing.created_at;
                state.updated_at = existing.updated_at;
                state = state.touched();
            }
            None => {
                let now = timestamp_now();
                state.created_at = now;
                state.updated_at = now;
            }
        }
        self.backend.save_state(&state).await
    }

    // -----------------------------------------------------------------------
    // Save / load
    // -----------------------------------------------------------------------

    pub async fn save_workflow(
        &self,
        workflow_id: &str,
        name: &str,
        dag: &WorkflowDag,
        context: &JsonMap,
        status: WorkflowStatus,
        metadata: &JsonMap,
    ) -> Result<(), StateError> {
        let now = timestamp_now();
        self.write(WorkflowState {
            workflow_id: workflow_id.to_string(),
            name: name.to_string(),
            status,
            dag: dag.to_snapshot(),
            context: context.clone(),
            metadata: metadata.clone(),
            created_at: now,
            updated_at: now,
        })
        .await?;
        tracing::debug!(workflow_id, status = %status, "saved workflow state");
        Ok(())
    }

    pub async fn load_workflow(&self, workflow_id: &str) -> Result<Option<LoadedWorkflow>, WorkflowError> {
        let Some(state) = self.backend.load_state(workflow_id).await? else {
            return Ok(None);
        };
        let dag = WorkflowDag::from_snapshot(state.dag)?;
        Ok(Some(LoadedWorkflow {
            name: state.name,
            dag,
            context: state.context,
            status: state.status,
            metadata: state.metadata,
            created_at: state.created_at,
            updated_at: state.updated_at,
        }))
    }

    /// Raw persisted record.
    pub async fn load_state(&self, workflow_id: &str) -> Result<Option<WorkflowState>, StateError> {
        self.backend.load_state(workflow_id).await
    }

    /// Set the status, merging `extra_metadata` into the stored metadata.
    pub async fn update_workflow_status(
        &self,
        workflow_id: &str,
        status: WorkflowStatus,
        extra_metadata: Option<JsonMap>,
    ) -> Result<(), WorkflowError> {
        let mut state = self
            .backend
            .load_state(workflow_id)
            .await?
            .ok_or_else(|| WorkflowError::WorkflowNotFound(workflow_id.to_string()))?;

        state.status = status;
        if let Some(extra) = extra_metadata {
            state.metadata.extend(extra);
        }
        self.write(state).await?;
        tracing::debug!(workflow_id, status = %status, "updated workflow status");
        Ok(())
    }

    pub async fn delete_workflow(&self, workflow_id: &str) -> Result<(), StateError> {
        self.backend.delete_state(workflow_id).await?;
        tracing::info!(workflow_id, "deleted workflow state");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn list_workflows(&self) -> Result<Vec<WorkflowSummary>, StateError> {
        Ok(self
            .backend
            .list_states()
            .await?
            .into_iter()
            .map(|state| WorkflowSummary {
                progress: DagProgress::from_nodes(&state.dag.nodes),
                workflow_id: state.workflow_id,
                name: state.name,
                status: state.status,
                created_at: state.created_at,
                updated_at: state.updated_at,
            })
            .collect())
    }

    pub async fn get_workflow_progress(
        &self,
        workflow_id: &str,
    ) -> Result<Option<WorkflowProgressReport>, StateError> {
        Ok(self
            .backend
            .load_state(workflow_id)
            .await?
            .map(|state| WorkflowProgressReport {
                progress: DagProgress::from_nodes(&state.dag.nodes),
                workflow_id: state.workflow_id,
                name: state.name,
                status: state.status,
                created_at: state.created_at,
                updated_at: state.updated_at,
            }))
    }

    // -----------------------------------------------------------------------
    // Portability
    // -----------------------------------------------------------------------

    /// Definition of a workflow: DAG and metadata, no context.
    pub async fn export_workflow(&self, workflow_id: &str) -> Result<Option<WorkflowExport>, StateError> {
        Ok(self
            .backend
            .load_state(workflow_id)
            .await?
            .map(|state| WorkflowExport {
                name: state.name,
                dag: state.dag,
                metadata: state.metadata,
            }))
    }

    /// Store an exported definition under `workflow_id` with status
    /// `imported` and an empty context.
    pub async fn import_workflow(
        &self,
        workflow_id: &str,
        definition: WorkflowExport,
    ) -> Result<(), WorkflowError> {
        let dag = WorkflowDag::from_snapshot(definition.dag)?;
        self.save_workflow(
            workflow_id,
            &definition.name,
            &dag,
            &JsonMap::new(),
            WorkflowStatus::Imported,
            &definition.metadata,
        )
        .await?;
        tracing::info!(workflow_id, nodes = dag.len(), "imported workflow");
        Ok(())
    }

    /// Drop records not updated within `max_age_days`.
    pub async fn cleanup_old_workflows(&self, max_age_days: u32) -> Result<usize, StateError> {
        let removed = self.backend.cleanup_old_states(max_age_days).await?;
        tracing::info!(removed, max_age_days, "cleaned up old workflows");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use genflow_types::workflow::{DagNode, NodeStatus};
    use serde_json::json;

    use super::*;
    use crate::repository::memory::MemoryStateBackend;

    fn manager() -> WorkflowStateManager<MemoryStateBackend> {
        WorkflowStateManager::new(MemoryStateBackend::new())
    }

    fn map(value: serde_json::Value) -> JsonMap {
        value.as_object().cloned().unwrap()
    }

    fn sample_dag() -> WorkflowDag {
        let mut dag = WorkflowDag::new();
        dag.add_node(DagNode::new("a", "A", "text")).unwrap();
        dag.add_node(DagNode::new("b", "B", "image").with_dependencies(["a"]))
            .unwrap();
        dag
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let mgr = manager();
        let mut dag = sample_dag();
        dag.mark_node_running("a").unwrap();
        dag.mark_node_completed("a", Some(json!({"text": "hi"}))).unwrap();
        let context = map(json!({"topic": "rust", "text": "hi"}));
        let metadata = map(json!({"name": "demo", "max_concurrent_steps": 2}));

        mgr.save_workflow("wf-1", "demo", &dag, &context, WorkflowStatus::Running, &metadata)
            .await
            .unwrap();

        let loaded = mgr.load_workflow("wf-1").await.unwrap().unwrap();
        assert_eq!(loaded.name, "demo");
        assert_eq!(loaded.status, WorkflowStatus::Running);
        assert_eq!(loaded.context, context);
        assert_eq!(loaded.metadata, metadata);
        assert_eq!(loaded.dag.to_snapshot(), dag.to_snapshot());
        assert_eq!(loaded.dag.get_node("a").unwrap().status, NodeStatus::Completed);

        assert!(mgr.load_workflow("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_created_at_kept_and_updated_at_increases() {
        let mgr = manager();
        let dag = sample_dag();
        let ctx = JsonMap::new();
        mgr.save_workflow("wf", "n", &dag, &ctx, WorkflowStatus::Created, &JsonMap::new())
            .await
            .unwrap();
        let first = mgr.load_state("wf").await.unwrap().unwrap();

        mgr.save_workflow("wf", "n", &dag, &ctx, WorkflowStatus::Running, &JsonMap::new())
            .await
            .unwrap();
        let second = mgr.load_state("wf").await.unwrap().unwrap();

        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at > first.updated_at);

        mgr.update_workflow_status("wf", WorkflowStatus::Paused, None)
            .await
            .unwrap();
        let third = mgr.load_state("wf").await.unwrap().unwrap();
        assert_eq!(third.created_at, first.created_at);
        assert!(third.updated_at > second.updated_at);
    }

    #[tokio::test]
    async fn test_update_status_merges_metadata() {
        let mgr = manager();
        let metadata = map(json!({"name": "demo", "retry_failed_steps": true}));
        mgr.save_workflow("wf", "demo", &sample_dag(), &JsonMap::new(), WorkflowStatus::Running, &metadata)
            .await
            .unwrap();

        mgr.update_workflow_status(
            "wf",
            WorkflowStatus::Completed,
            Some(map(json!({"execution_time": 1.25}))),
        )
        .await
        .unwrap();

        let state = mgr.load_state("wf").await.unwrap().unwrap();
        assert_eq!(state.status, WorkflowStatus::Completed);
        assert_eq!(state.metadata["name"], "demo");
        assert_eq!(state.metadata["retry_failed_steps"], true);
        assert_eq!(state.metadata["execution_time"], 1.25);

        let err = mgr
            .update_workflow_status("ghost", WorkflowStatus::Failed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::WorkflowNotFound(_)));
    }

    #[tokio::test]
    async fn test_list_progress_and_delete() {
        let mgr = manager();
        let mut dag = sample_dag();
        dag.mark_node_completed("a", None).unwrap();
        mgr.save_workflow("wf", "demo", &dag, &JsonMap::new(), WorkflowStatus::Running, &JsonMap::new())
            .await
            .unwrap();

        let list = mgr.list_workflows().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].progress.completed, 1);
        assert_eq!(list[0].progress.progress_percent, 50.0);

        let report = mgr.get_workflow_progress("wf").await.unwrap().unwrap();
        assert_eq!(report.status, WorkflowStatus::Running);
        assert_eq!(report.progress.total, 2);
        assert!(mgr.get_workflow_progress("nope").await.unwrap().is_none());

        mgr.delete_workflow("wf").await.unwrap();
        mgr.delete_workflow("wf").await.unwrap();
        assert!(mgr.list_workflows().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_export_import() {
        let mgr = manager();
        let context = map(json!({"secret": "step output"}));
        let metadata = map(json!({"name": "demo"}));
        mgr.save_workflow("src", "demo", &sample_dag(), &context, WorkflowStatus::Completed, &metadata)
            .await
            .unwrap();

        let export = mgr.export_workflow("src").await.unwrap().unwrap();
        assert_eq!(export.name, "demo");
        mgr.import_workflow("copy", export.clone()).await.unwrap();

        let copy = mgr.load_state("copy").await.unwrap().unwrap();
        assert_eq!(copy.status, WorkflowStatus::Imported);
        assert!(copy.context.is_empty());
        assert_eq!(copy.dag, export.dag);
        assert_eq!(copy.metadata, metadata);

        assert!(mgr.export_workflow("none").await.unwrap().is_none());
    }
}
