//! JSON-file workflow state backend.
//!
//! One pretty-printed JSON document per workflow at `{dir}/{workflow_id}.json`.
//! Writes go to a temporary sibling first and are renamed into place, all
//! behind one async mutex, so a reader never sees a half-written record.

use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use genflow_core::repository::state::StateBackend;
use genflow_types::error::StateError;
use genflow_types::workflow::WorkflowState;
use tokio::sync::Mutex;

/// Extension of record files; anything else in the directory is ignored.
const RECORD_EXT: &str = "json";

pub struct JsonFileBackend {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileBackend {
    /// Open (creating if needed) a state directory.
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self, StateError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        tracing::debug!(dir = %dir.display(), "opened json state directory");
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a record, `None` for ids that cannot name a plain file.
    fn record_path(&self, workflow_id: &str) -> Option<PathBuf> {
        let valid = !workflow_id.is_empty()
            && workflow_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then(|| self.dir.join(format!("{workflow_id}.{RECORD_EXT}")))
    }

    async fn read_record(path: &Path) -> Result<Option<WorkflowState>, StateError> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StateError::Corrupt {
                id: record_id(path),
                reason: e.to_string(),
            })
    }

    async fn record_files(&self) -> Result<Vec<PathBuf>, StateError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == RECORD_EXT) {
                files.push(path);
            }
        }
        Ok(files)
    }
}

fn record_id(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl StateBackend for JsonFileBackend {
    async fn save_state(&self, state: &WorkflowState) -> Result<(), StateError> {
        let path = self.record_path(&state.workflow_id).ok_or_else(|| {
            StateError::Io(format!("invalid workflow id '{}'", state.workflow_id))
        })?;
        let body = serde_json::to_string_pretty(state)?;
        let tmp = path.with_extension(format!("{RECORD_EXT}.tmp"));

        let _guard = self.write_lock.lock().await;
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::debug!(workflow_id = %state.workflow_id, "wrote workflow record");
        Ok(())
    }

    async fn load_state(&self, workflow_id: &str) -> Result<Option<WorkflowState>, StateError> {
        match self.record_path(workflow_id) {
            Some(path) => Self::read_record(&path).await,
            None => Ok(None),
        }
    }

    async fn delete_state(&self, workflow_id: &str) -> Result<(), StateError> {
        let Some(path) = self.record_path(workflow_id) else {
            return Ok(());
        };
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Unreadable records are skipped with a warning.
    async fn list_states(&self) -> Result<Vec<WorkflowState>, StateError> {
        let mut states = Vec::new();
        for path in self.record_files().await? {
            match Self::read_record(&path).await {
                Ok(Some(state)) => states.push(state),
                Ok(None) => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable workflow record"),
            }
        }
        states.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(states)
    }

    /// Removes stale records and any record that no longer parses.
    async fn cleanup_old_states(&self, max_age_days: u32) -> Result<usize, StateError> {
        let cutoff = Utc::now() - Duration::days(i64::from(max_age_days));
        let _guard = self.write_lock.lock().await;

        let mut removed = 0;
        for path in self.record_files().await? {
            let stale = match Self::read_record(&path).await {
                Ok(Some(state)) => state.updated_at < cutoff,
                Ok(None) => false,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "removing unreadable workflow record");
                    true
                }
            };
            if stale {
                tokio::fs::remove_file(&path).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
