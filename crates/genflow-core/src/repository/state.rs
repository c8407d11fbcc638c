//! Workflow state backend trait definition.
//!
//! Defines the storage interface for persisted workflow records. The
//! infrastructure layer (genflow-infra) implements this trait with a
//! JSON-file store and a SQLite table; an in-memory implementation lives in
//! [`super::memory`].

use genflow_types::error::StateError;
use genflow_types::workflow::WorkflowState;

/// Storage for [`WorkflowState`] records, one per workflow id.
///
/// Backends store what they are given: `created_at`/`updated_at` are
/// computed by `WorkflowStateManager` before `save_state` is called.
/// Implementations must serialize their own writes; several workflow tasks
/// may save concurrently.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait StateBackend: Send + Sync {
    /// Insert or overwrite the record for `state.workflow_id`.
    fn save_state(
        &self,
        state: &WorkflowState,
    ) -> impl std::future::Future<Output = Result<(), StateError>> + Send;

    /// Load one record, `None` if it does not exist.
    fn load_state(
        &self,
        workflow_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowState>, StateError>> + Send;

    /// Delete one record. Deleting a missing id succeeds.
    fn delete_state(
        &self,
        workflow_id: &str,
    ) -> impl std::future::Future<Output = Result<(), StateError>> + Send;

    /// All records. Newest `updated_at` first where the backend can order.
    fn list_states(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowState>, StateError>> + Send;

    /// Delete records not updated within `max_age_days`. Returns how many went.
    fn cleanup_old_states(
        &self,
        max_age_days: u32,
    ) -> impl std::future::Future<Output = Result<usize, StateError>> + Send;
}
