//! SQLite workflow state backend.
//!
//! One row per workflow in `workflow_states`. The DAG snapshot, context and
//! metadata are JSON text columns; timestamps are RFC 3339 strings with a
//! fixed microsecond precision, so `ORDER BY updated_at` and the cleanup
//! cutoff compare correctly as text.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use genflow_core::repository::state::StateBackend;
use genflow_types::error::StateError;
use genflow_types::workflow::{WorkflowState, WorkflowStatus};
use sqlx::Row;

use super::pool::DatabasePool;

const SELECT_COLUMNS: &str =
    "SELECT workflow_id, name, status, dag, context, metadata, created_at, updated_at FROM workflow_states";

/// SQLite-backed implementation of `StateBackend`.
pub struct SqliteStateBackend {
    pool: DatabasePool,
}

impl SqliteStateBackend {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }
}

// ---------------------------------------------------------------------------
// Internal row type
// ---------------------------------------------------------------------------

struct StateRow {
    workflow_id: String,
    name: String,
    status: String,
    dag: String,
    context: String,
    metadata: String,
    created_at: String,
    updated_at: String,
}

impl StateRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            workflow_id: row.try_get("workflow_id")?,
            name: row.try_get("name")?,
            status: row.try_get("status")?,
            dag: row.try_get("dag")?,
            context: row.try_get("context")?,
            metadata: row.try_get("metadata")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_state(self) -> Result<WorkflowState, StateError> {
        let id = self.workflow_id;
        let corrupt = |reason: String| StateError::Corrupt {
            id: id.clone(),
            reason,
        };

        let status: WorkflowStatus = self.status.parse().map_err(corrupt)?;
        let dag = serde_json::from_str(&self.dag).map_err(|e| corrupt(format!("dag: {e}")))?;
        let context =
            serde_json::from_str(&self.context).map_err(|e| corrupt(format!("context: {e}")))?;
        let metadata =
            serde_json::from_str(&self.metadata).map_err(|e| corrupt(format!("metadata: {e}")))?;
        let created_at = parse_datetime(&self.created_at).map_err(corrupt)?;
        let updated_at = parse_datetime(&self.updated_at).map_err(corrupt)?;

        Ok(WorkflowState {
            workflow_id: id,
            name: self.name,
            status,
            dag,
            context,
            metadata,
            created_at,
            updated_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid datetime '{s}': {e}"))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn query_error(e: sqlx::Error) -> StateError {
    StateError::Query(e.to_string())
}

// ---------------------------------------------------------------------------
// StateBackend implementation
// ---------------------------------------------------------------------------

impl StateBackend for SqliteStateBackend {
    /// Upsert. `created_at` of an existing row is kept.
    async fn save_state(&self, state: &WorkflowState) -> Result<(), StateError> {
        let dag = serde_json::to_string(&state.dag)?;
        let context = serde_json::to_string(&state.context)?;
        let metadata = serde_json::to_string(&state.metadata)?;

        sqlx::query(
            r#"INSERT INTO workflow_states (workflow_id, name, status, dag, context, metadata, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(workflow_id) DO UPDATE SET
                   name = excluded.name,
                   status = excluded.status,
                   dag = excluded.dag,
                   context = excluded.context,
                   metadata = excluded.metadata,
                   updated_at = excluded.updated_at"#,
        )
        .bind(&state.workflow_id)
        .bind(&state.name)
        .bind(state.status.as_str())
        .bind(dag)
        .bind(context)
        .bind(metadata)
        .bind(format_datetime(&state.created_at))
        .bind(format_datetime(&state.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        tracing::debug!(workflow_id = %state.workflow_id, "wrote workflow row");
        Ok(())
    }

    async fn load_state(&self, workflow_id: &str) -> Result<Option<WorkflowState>, StateError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE workflow_id = ?"))
            .bind(workflow_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        row.map(|r| StateRow::from_row(&r).map_err(query_error)?.into_state())
            .transpose()
    }

    async fn delete_state(&self, workflow_id: &str) -> Result<(), StateError> {
        sqlx::query("DELETE FROM workflow_states WHERE workflow_id = ?")
            .bind(workflow_id)
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;
        Ok(())
    }

    async fn list_states(&self) -> Result<Vec<WorkflowState>, StateError> {
        let rows = sqlx::query(&format!("{SELECT_COLUMNS} ORDER BY updated_at DESC"))
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        let states = rows
            .iter()
            .filter_map(|r| {
                match StateRow::from_row(r)
                    .map_err(query_error)
                    .and_then(StateRow::into_state)
                {
                    Ok(state) => Some(state),
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping unreadable workflow row");
                        None
                    }
                }
            })
            .collect();
        Ok(states)
    }

    async fn cleanup_old_states(&self, max_age_days: u32) -> Result<usize, StateError> {
        let cutoff = Utc::now() - Duration::days(i64::from(max_age_days));
        let result = sqlx::query("DELETE FROM workflow_states WHERE updated_at < ?")
            .bind(format_datetime(&cutoff))
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;
        Ok(result.rows_affected() as usize)
    }
}

#[cfg(test)]
mod tests {
    use genflow_types::workflow::{DagNode, DagSnapshot, JsonMap, NodeStatus, timestamp_now};
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    async fn backend() -> (TempDir, SqliteStateBackend) {
        let tmp = TempDir::new().unwrap();
        let pool = DatabasePool::open(&tmp.path().join("state.db")).await.unwrap();
        (tmp, SqliteStateBackend::new(pool))
    }

    fn state(id: &str, age_days: i64) -> WorkflowState {
        let at = timestamp_now() - Duration::days(age_days);
        let mut node = DagNode::new("a", "A", "emit");
        node.status = NodeStatus::Completed;
        node.result = Some(json!({ "out": [1, 2] }));
        let mut context = JsonMap::new();
        context.insert("out".into(), json!([1, 2]));
        WorkflowState {
            workflow_id: id.into(),
            name: format!("{id} flow"),
            status: WorkflowStatus::Running,
            dag: DagSnapshot {
                nodes: vec![node],
                ..DagSnapshot::default()
            },
            context,
            metadata: JsonMap::new(),
            created_at: at,
            updated_at: at,
        }
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (_tmp, backend) = backend().await;
        let record = state("wf-1", 0);
        backend.save_state(&record).await.unwrap();

        assert_eq!(backend.load_state("wf-1").await.unwrap().unwrap(), record);
        assert!(backend.load_state("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_keeps_created_at() {
        let (_tmp, backend) = backend().await;
        let first = state("wf-1", 3);
        backend.save_state(&first).await.unwrap();

        let mut second = state("wf-1", 0);
        second.status = WorkflowStatus::Completed;
        backend.save_state(&second).await.unwrap();

        let loaded = backend.load_state("wf-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, WorkflowStatus::Completed);
        assert_eq!(loaded.created_at, first.created_at);
        assert_eq!(loaded.updated_at, second.updated_at);
    }

    #[tokio::test]
    async fn test_list_newest_first_and_delete() {
        let (_tmp, backend) = backend().await;
        backend.save_state(&state("old", 2)).await.unwrap();
        backend.save_state(&state("new", 0)).await.unwrap();
        backend.save_state(&state("mid", 1)).await.unwrap();

        let ids: Vec<_> = backend
            .list_states()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.workflow_id)
            .collect();
        assert_eq!(ids, ["new", "mid", "old"]);

        backend.delete_state("mid").await.unwrap();
        backend.delete_state("mid").await.unwrap();
        assert_eq!(backend.list_states().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cleanup_old_states() {
        let (_tmp, backend) = backend().await;
        backend.save_state(&state("stale", 40)).await.unwrap();
        backend.save_state(&state("fresh", 5)).await.unwrap();

        assert_eq!(backend.cleanup_old_states(30).await.unwrap(), 1);
        assert!(backend.load_state("stale").await.unwrap().is_none());
        assert!(backend.load_state("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_corrupt_row_is_reported() {
        let (_tmp, backend) = backend().await;
        sqlx::query(
            "INSERT INTO workflow_states (workflow_id, name, status, dag, created_at, updated_at) VALUES ('bad', 'bad', 'exploded', '{}', '2026-01-01T00:00:00.000000Z', '2026-01-01T00:00:00.000000Z')",
        )
        .execute(&backend.pool().writer)
        .await
        .unwrap();

        assert!(matches!(
            backend.load_state("bad").await,
            Err(StateError::Corrupt { id, .. }) if id == "bad"
        ));
    }

    #[tokio::test]
    async fn test_list_skips_corrupt_rows() {
        let (_tmp, backend) = backend().await;
        backend.save_state(&state("good", 0)).await.unwrap();
        sqlx::query(
            "INSERT INTO workflow_states (workflow_id, name, status, dag, created_at, updated_at) VALUES ('bad', 'bad', 'exploded', '{}', '2026-01-01T00:00:00.000000Z', '2026-01-01T00:00:00.000000Z')",
        )
        .execute(&backend.pool().writer)
        .await
        .unwrap();

        let ids: Vec<_> = backend
            .list_states()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.workflow_id)
            .collect();
        assert_eq!(ids, ["good"]);
    }
}
