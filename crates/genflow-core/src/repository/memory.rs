//! In-memory state backend, for tests and ephemeral engines.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use genflow_types::error::StateError;
use genflow_types::workflow::WorkflowState;
use tokio::sync::RwLock;

use super::state::StateBackend;

/// Keeps workflow records in a map behind an async lock. Nothing survives
/// the process.
#[derive(Debug, Default)]
pub struct MemoryStateBackend {
    states: RwLock<HashMap<String, WorkflowState>>,
}

impl MemoryStateBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.states.read().await.is_empty()
    }
}

impl StateBackend for MemoryStateBackend {
    async fn save_state(&self, state: &WorkflowState) -> Result<(), StateError> {
        self.states
            .write()
            .await
            .insert(state.workflow_id.clone(), state.clone());
        Ok(())
    }

    async fn load_state(&self, workflow_id: &str) -> Result<Option<WorkflowState>, StateError> {
        Ok(self.states.read().await.get(workflow_id).cloned())
    }

    async fn delete_state(&self, workflow_id: &str) -> Result<(), StateError> {
        self.states.write().await.remove(workflow_id);
        Ok(())
    }

    async fn list_states(&self) -> Result<Vec<WorkflowState>, StateError> {
        let mut states: Vec<WorkflowState> = self.states.read().await.values().cloned().collect();
        states.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(states)
    }

    async fn cleanup_old_states(&self, max_age_days: u32) -> Result<usize, StateError> {
        let cutoff = Utc::now() - Duration::days(i64::from(max_age_days));
        let mut states = self.states.write().await;
        let before = states.len();
        states.retain(|_, state| state.updated_at >= cutoff);
        Ok(before - states.len())
    }
}

#[cfg(test)]
mod tests {
    use genflow_types::workflow::{DagSnapshot, JsonMap, WorkflowStatus, timestamp_now};

    use super::*;

    fn state(id: &str, age_days: i64) -> WorkflowState {
        let at = timestamp_now() - Duration::days(age_days);
        WorkflowState {
            workflow_id: id.into(),
            name: id.into(),
            status: WorkflowStatus::Created,
            dag: DagSnapshot::default(),
            context: JsonMap::new(),
            metadata: JsonMap::new(),
            created_at: at,
            updated_at: at,
        }
    }

    #[tokio::test]
    async fn test_crud_and_ordering() {
        let backend = MemoryStateBackend::new();
        backend.save_state(&state("old", 2)).await.unwrap();
        backend.save_state(&state("new", 0)).await.unwrap();

        assert!(backend.load_state("new").await.unwrap().is_some());
        assert!(backend.load_state("ghost").await.unwrap().is_none());

        let ids: Vec<_> = backend
            .list_states()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.workflow_id)
            .collect();
        assert_eq!(ids, ["new", "old"]);

        backend.delete_state("old").await.unwrap();
        backend.delete_state("old").await.unwrap();
        assert_eq!(backend.len().await, 1);
    }

    #[tokio::test]
    async fn test_cleanup_removes_stale_records() {
        let backend = MemoryStateBackend::new();
        backend.save_state(&state("stale", 40)).await.unwrap();
        backend.save_state(&state("fresh", 1)).await.unwrap();

        assert_eq!(backend.cleanup_old_states(30).await.unwrap(), 1);
        assert!(backend.load_state("stale").await.unwrap().is_none());
        assert!(backend.load_state("fresh").await.unwrap().is_some());
    }
}
