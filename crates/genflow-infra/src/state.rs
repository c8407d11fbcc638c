//! Runtime-selected workflow state backend.
//!
//! `WorkflowEngine` is generic over its backend; the CLI picks one from
//! `config.toml` at startup, so the choice is wrapped in an enum that
//! implements `StateBackend` by delegation.

use std::path::Path;

use genflow_core::repository::state::StateBackend;
use genflow_types::config::{BackendKind, StorageConfig};
use genflow_types::error::StateError;
use genflow_types::workflow::WorkflowState;

use crate::filesystem::state::JsonFileBackend;
use crate::sqlite::pool::DatabasePool;
use crate::sqlite::state::SqliteStateBackend;

pub enum AnyStateBackend {
    File(JsonFileBackend),
    Sqlite(SqliteStateBackend),
}

impl AnyStateBackend {
    /// Open the backend described by `storage`, resolving its default
    /// location under `data_dir`.
    pub async fn open(storage: &StorageConfig, data_dir: &Path) -> Result<Self, StateError> {
        let path = storage.resolved_path(data_dir);
        tracing::info!(backend = ?storage.backend, path = %path.display(), "opening state backend");
        match storage.backend {
            BackendKind::File => Ok(Self::File(JsonFileBackend::new(path).await?)),
            BackendKind::Sqlite => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                let pool = DatabasePool::open(&path)
                    .await
                    .map_err(|e| StateError::Connection(e.to_string()))?;
                Ok(Self::Sqlite(SqliteStateBackend::new(pool)))
            }
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Self::File(_) => BackendKind::File,
            Self::Sqlite(_) => BackendKind::Sqlite,
        }
    }
}

impl StateBackend for AnyStateBackend {
    async fn save_state(&self, state: &WorkflowState) -> Result<(), StateError> {
        match self {
            Self::File(b) => b.save_state(state).await,
            Self::Sqlite(b) => b.save_state(state).await,
        }
    }

    async fn load_state(&self, workflow_id: &str) -> Result<Option<WorkflowState>, StateError> {
        match self {
            Self::File(b) => b.load_state(workflow_id).await,
            Self::Sqlite(b) => b.load_state(workflow_id).await,
        }
    }

    async fn delete_state(&self, workflow_id: &str) -> Result<(), StateError> {
        match self {
            Self::File(b) => b.delete_state(workflow_id).await,
            Self::Sqlite(b) => b.delete_state(workflow_id).await,
        }
    }

    async fn list_states(&self) -> Result<Vec<WorkflowState>, StateError> {
        match self {
            Self::File(b) => b.list_states().await,
            Self::Sqlite(b) => b.list_states().await,
        }
    }

    async fn cleanup_old_states(&self, max_age_days: u32) -> Result<usize, StateError> {
        match self {
            Self::File(b) => b.cleanup_old_states(max_age_days).await,
            Self::Sqlite(b) => b.cleanup_old_states(max_age_days).await,
        }
    }
}
