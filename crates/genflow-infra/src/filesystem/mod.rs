//! Filesystem adapters for genflow.

pub mod state;
