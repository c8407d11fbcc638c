//! Shared domain types for genflow.
//!
//! This crate contains the types used across the genflow workspace: DAG
//! nodes and snapshots, workflow status and configuration, the persisted
//! workflow record, step definitions/results, callback events, the global
//! config file and the backend error type.
//!
//! Zero infrastructure dependencies -- only serde, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod workflow;
