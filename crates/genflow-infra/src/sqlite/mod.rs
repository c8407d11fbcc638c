//! SQLite storage layer.
//!
//! Workflow state in one SQLite table, with WAL mode and split read/write
//! connection pools.

pub mod pool;
pub mod state;
