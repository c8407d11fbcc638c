//! Global configuration loader for genflow.
//!
//! Reads `config.toml` from the data directory (`~/.genflow/` by default)
//! and deserializes it into [`GenflowConfig`]. Falls back to defaults when
//! the file is missing or malformed.

use std::path::{Path, PathBuf};

use genflow_types::config::GenflowConfig;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "GENFLOW_DATA_DIR";

/// Resolve the data directory: `$GENFLOW_DATA_DIR`, else `~/.genflow`,
/// else `./.genflow`.
pub fn resolve_data_dir() -> PathBuf {
    match std::env::var_os(DATA_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::home_dir()
            .map(|home| home.join(".genflow"))
            .unwrap_or_else(|| PathBuf::from(".genflow")),
    }
}

/// Load `{data_dir}/config.toml`.
///
/// - Missing file: defaults.
/// - Unreadable or unparsable file: warning, then defaults.
pub async fn load_config(data_dir: &Path) -> GenflowConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %config_path.display(), "no config.toml, using defaults");
            return GenflowConfig::default();
        }
        Err(err) => {
            tracing::warn!(path = %config_path.display(), error = %err, "failed to read config, using defaults");
            return GenflowConfig::default();
        }
    };

    match toml::from_str::<GenflowConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(path = %config_path.display(), error = %err, "failed to parse config, using defaults");
            GenflowConfig::default()
        }
    }
}
