//! Application state wiring the engine to its configured backend.

use std::path::PathBuf;
use std::time::Duration;

use genflow_core::workflow::engine::{EngineOptions, WorkflowEngine};
use genflow_core::workflow::library::TemplateLibrary;
use genflow_infra::config::{load_config, resolve_data_dir};
use genflow_infra::state::AnyStateBackend;
use genflow_types::config::GenflowConfig;

use crate::steps;

/// The engine pinned to the runtime-selected backend.
pub type Engine = WorkflowEngine<AnyStateBackend>;

pub struct AppState {
    pub engine: Engine,
    pub config: GenflowConfig,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Resolve the data directory, load `config.toml`, open the state
    /// backend and build the engine.
    pub async fn init(dry_run: bool) -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir).await?;

        let config = load_config(&data_dir).await;
        let backend = AnyStateBackend::open(&config.storage, &data_dir).await?;

        let options = EngineOptions {
            poll_interval: Duration::from_millis(config.engine.poll_interval_ms.max(1)),
            templates: TemplateLibrary::builtin(),
        };
        let engine = WorkflowEngine::with_options(backend, steps::registry(dry_run), options);

        tracing::debug!(
            data_dir = %data_dir.display(),
            backend = ?config.storage.backend,
            dry_run,
            "application state ready"
        );
        Ok(Self {
            engine,
            config,
            data_dir,
        })
    }
}
