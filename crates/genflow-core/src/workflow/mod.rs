//! Workflow engine: graph model, steps, persistence and execution.
//!
//! - `dag` -- dependency graph with readiness, retry and snapshot support
//! - `step` -- step contract, type-erased wrapper and type-tag registry
//! - `builtin` -- `condition`, `parallel` and closure-backed steps
//! - `template` -- `{{name}}` substitution in step configs
//! - `condition` -- safe comparison grammar used by the `condition` step
//! - `state` -- workflow-level persistence over a `StateBackend`
//! - `callback` -- per-workflow event listeners
//! - `engine` -- batch-synchronous scheduler and lifecycle API
//! - `library` -- reusable workflow templates

pub mod builtin;
pub mod callback;
pub mod condition;
pub mod dag;
pub mod engine;
pub mod error;
pub mod library;
pub mod state;
pub mod step;
pub mod template;
