//! Infrastructure layer for genflow.
//!
//! Implements the `StateBackend` port from `genflow-core` with a JSON-file
//! store and a SQLite table, and loads the global `config.toml`.

pub mod config;
pub mod filesystem;
pub mod sqlite;
pub mod state;
