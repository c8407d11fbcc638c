//! Global configuration types for genflow.
//!
//! `GenflowConfig` is the top-level `config.toml` that picks the storage
//! backend and tunes the engine. Per-workflow run parameters live in
//! [`crate::workflow::WorkflowConfig`] instead.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration, loaded from `{data_dir}/config.toml`.
/// All fields have defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenflowConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Which state backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// One JSON file per workflow.
    #[default]
    File,
    /// One row per workflow in a SQLite table.
    Sqlite,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: BackendKind,
    /// Directory (file backend) or database file (sqlite backend).
    /// Defaults to `{data_dir}/workflows` or `{data_dir}/workflows.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn resolved_path(&self, data_dir: &std::path::Path) -> PathBuf {
        match (&self.path, self.backend) {
            (Some(path), _) => path.clone(),
            (None, BackendKind::File) => data_dir.join("workflows"),
            (None, BackendKind::Sqlite) => data_dir.join("workflows.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Sleep between readiness checks while steps are in flight.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Age threshold used by `cleanup` when none is given.
    #[serde(default = "default_cleanup_max_age_days")]
    pub cleanup_max_age_days: u32,
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_cleanup_max_age_days() -> u32 {
    30
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            cleanup_max_age_days: default_cleanup_max_age_days(),
        }
    }
}
