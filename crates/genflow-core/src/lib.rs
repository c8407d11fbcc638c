//! Workflow engine and storage ports for genflow.
//!
//! This crate defines the `StateBackend` port that the infrastructure layer
//! implements, plus everything that runs a workflow. It depends only on
//! `genflow-types`, never on `genflow-infra` or any database/IO crate.

pub mod repository;
pub mod workflow;
