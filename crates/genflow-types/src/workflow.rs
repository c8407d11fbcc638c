//! Workflow domain types for genflow.
//!
//! Defines the node/workflow state machines, the persisted workflow record,
//! per-workflow run configuration, step definitions and step results. These
//! are plain serde types; the graph logic that mutates them lives in
//! `genflow-core`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Open key-value map used for workflow context, step config and metadata.
pub type JsonMap = serde_json::Map<String, Value>;

/// Current UTC time truncated to microseconds.
///
/// Every persisted timestamp goes through this so that a value read back
/// from any backend compares equal to the value that was written.
pub fn timestamp_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

// ---------------------------------------------------------------------------
// Node status
// ---------------------------------------------------------------------------

/// Lifecycle state of a single DAG node.
///
/// `Pending -> Ready -> Running -> {Completed | Failed}`; `Failed -> Pending`
/// only through an explicit retry. `Skipped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// True for the states that count towards DAG completion.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Workflow status
// ---------------------------------------------------------------------------

/// Workflow-level status.
///
/// `Created -> Running -> {Completed | Failed | Cancelled}` with
/// `Running <-> Paused` as a side transition. `Imported` marks a record
/// rehydrated from an exported definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Created,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
    Imported,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Imported => "imported",
        }
    }

    /// Whether a run in this state has finished for good.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "imported" => Ok(Self::Imported),
            other => Err(format!("unknown workflow status: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// DAG node
// ---------------------------------------------------------------------------

fn default_max_retries() -> u32 {
    3
}

/// One unit of schedulable work inside a workflow DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagNode {
    pub id: String,
    pub name: String,
    /// Tag selecting the step implementation.
    #[serde(rename = "type")]
    pub step_type: String,
    #[serde(default)]
    pub config: JsonMap,
    /// Ids of nodes that must complete before this one may run.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub status: NodeStatus,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl DagNode {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        step_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            step_type: step_type.into(),
            config: JsonMap::new(),
            dependencies: Vec::new(),
            status: NodeStatus::Pending,
            result: None,
            error: None,
            start_time: None,
            end_time: None,
            retry_count: 0,
            max_retries: default_max_retries(),
        }
    }

    pub fn with_config(mut self, config: JsonMap) -> Self {
        self.config = config;
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Wall time between start and end, in seconds, when both are stamped.
    pub fn elapsed_seconds(&self) -> Option<f64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => {
                Some((end - start).num_microseconds().unwrap_or(0) as f64 / 1_000_000.0)
            }
            _ => None,
        }
    }
}

impl From<StepDefinition> for DagNode {
    fn from(def: StepDefinition) -> Self {
        let name = def.name.unwrap_or_else(|| def.id.clone());
        let mut node = DagNode::new(def.id, name, def.step_type)
            .with_config(def.config)
            .with_dependencies(def.dependencies);
        if let Some(max) = def.max_retries {
            node.max_retries = max;
        }
        node
    }
}

// ---------------------------------------------------------------------------
// Progress + snapshot
// ---------------------------------------------------------------------------

/// Node counts by status for one workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DagProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub running: usize,
    pub pending: usize,
    pub ready: usize,
    pub skipped: usize,
    pub progress_percent: f64,
}

impl DagProgress {
    pub fn from_nodes<'a>(nodes: impl IntoIterator<Item = &'a DagNode>) -> Self {
        let mut progress = Self::default();
        for node in nodes {
            progress.total += 1;
            match node.status {
                NodeStatus::Pending => progress.pending += 1,
                NodeStatus::Ready => progress.ready += 1,
                NodeStatus::Running => progress.running += 1,
                NodeStatus::Completed => progress.completed += 1,
                NodeStatus::Failed => progress.failed += 1,
                NodeStatus::Skipped => progress.skipped += 1,
            }
        }
        if progress.total > 0 {
            progress.progress_percent =
                progress.completed as f64 / progress.total as f64 * 100.0;
        }
        progress
    }
}

/// Plain, persistable form of a workflow DAG.
///
/// `nodes` serializes as a JSON object keyed by node id, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DagSnapshot {
    #[serde(with = "node_map")]
    pub nodes: Vec<DagNode>,
    /// `(from, to)` pairs: `to` depends on `from`.
    #[serde(default)]
    pub edges: Vec<(String, String)>,
    #[serde(default)]
    pub progress: DagProgress,
}

impl DagSnapshot {
    pub fn node(&self, id: &str) -> Option<&DagNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// Ordered `Vec<DagNode>` <-> `{ id: node }` map.
mod node_map {
    use std::fmt;

    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};

    use super::DagNode;

    pub fn serialize<S: Serializer>(nodes: &[DagNode], serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(nodes.len()))?;
        for node in nodes {
            map.serialize_entry(&node.id, node)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<DagNode>, D::Error> {
        struct NodeMapVisitor;

        impl<'de> Visitor<'de> for NodeMapVisitor {
            type Value = Vec<DagNode>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of node id to node")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut nodes = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((id, mut node)) = access.next_entry::<String, DagNode>()? {
                    node.id = id;
                    nodes.push(node);
                }
                Ok(nodes)
            }
        }

        deserializer.deserialize_map(NodeMapVisitor)
    }
}

// ---------------------------------------------------------------------------
// Workflow config
// ---------------------------------------------------------------------------

fn default_max_concurrent_steps() -> usize {
    3
}

fn default_true() -> bool {
    true
}

/// Immutable run parameters of one workflow. Persisted inside `metadata`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_max_concurrent_steps")]
    pub max_concurrent_steps: usize,
    #[serde(default = "default_true")]
    pub retry_failed_steps: bool,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub cleanup_on_completion: bool,
    #[serde(default = "default_true")]
    pub save_intermediate_results: bool,
}

impl WorkflowConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            max_concurrent_steps: default_max_concurrent_steps(),
            retry_failed_steps: true,
            timeout_seconds: None,
            cleanup_on_completion: false,
            save_intermediate_results: true,
        }
    }

    /// Serialize into a metadata map.
    pub fn to_metadata(&self) -> JsonMap {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => JsonMap::new(),
        }
    }

    /// Rebuild from persisted metadata. Unknown keys are ignored, missing or
    /// malformed fields fall back to their defaults, and `name` falls back to
    /// `fallback_name`.
    pub fn from_metadata(metadata: &JsonMap, fallback_name: &str) -> Self {
        let mut config = Self::new(
            metadata
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or(fallback_name),
        );
        if let Some(v) = metadata.get("description").and_then(Value::as_str) {
            config.description = v.to_string();
        }
        if let Some(v) = metadata.get("max_concurrent_steps").and_then(Value::as_u64) {
            config.max_concurrent_steps = v as usize;
        }
        if let Some(v) = metadata.get("retry_failed_steps").and_then(Value::as_bool) {
            config.retry_failed_steps = v;
        }
        if let Some(v) = metadata.get("timeout_seconds").and_then(Value::as_u64) {
            config.timeout_seconds = Some(v);
        }
        if let Some(v) = metadata.get("cleanup_on_completion").and_then(Value::as_bool) {
            config.cleanup_on_completion = v;
        }
        if let Some(v) = metadata.get("save_intermediate_results").and_then(Value::as_bool) {
            config.save_intermediate_results = v;
        }
        config
    }
}

// ---------------------------------------------------------------------------
// Step definition + result
// ---------------------------------------------------------------------------

/// Caller-supplied description of one step, the input to workflow creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub step_type: String,
    #[serde(default)]
    pub config: JsonMap,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

impl StepDefinition {
    pub fn new(id: impl Into<String>, step_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            step_type: step_type.into(),
            config: JsonMap::new(),
            dependencies: Vec::new(),
            max_retries: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_config(mut self, config: JsonMap) -> Self {
        self.config = config;
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Value returned by one step execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub success: bool,
    /// Merged into the workflow context on success.
    #[serde(default)]
    pub data: JsonMap,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: JsonMap,
    /// Seconds.
    #[serde(default)]
    pub execution_time: f64,
}

impl StepResult {
    pub fn success(data: JsonMap) -> Self {
        Self {
            success: true,
            data,
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_metadata(mut self, metadata: JsonMap) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_execution_time(mut self, seconds: f64) -> Self {
        self.execution_time = seconds;
        self
    }
}

// ---------------------------------------------------------------------------
// Persisted workflow record
// ---------------------------------------------------------------------------

/// Backend-agnostic persisted form of one workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: String,
    pub name: String,
    pub status: WorkflowStatus,
    pub dag: DagSnapshot,
    #[serde(default)]
    pub context: JsonMap,
    #[serde(default)]
    pub metadata: JsonMap,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    /// Refresh `updated_at` for a new write.
    ///
    /// The new value is "now", but never earlier than one microsecond after
    /// the previous value, so successive saves are strictly ordered even on a
    /// coarse clock.
    pub fn touched(mut self) -> Self {
        let floor = self.updated_at + Duration::microseconds(1);
        let now = timestamp_now();
        self.updated_at = if now > floor { now } else { floor };
        self
    }
}

/// Portable workflow definition: the DAG and metadata, without context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExport {
    pub name: String,
    pub dag: DagSnapshot,
    #[serde(default)]
    pub metadata: JsonMap,
}

/// One row of a workflow listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub workflow_id: String,
    pub name: String,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub progress: DagProgress,
}

/// Status plus progress for a single workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowProgressReport {
    pub workflow_id: String,
    pub name: String,
    pub status: WorkflowStatus,
    pub progress: DagProgress,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-node execution log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepLog {
    pub step_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub step_type: String,
    pub status: NodeStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Seconds between start and end.
    pub execution_time: Option<f64>,
    pub retry_count: u32,
    pub error: Option<String>,
    /// Shallow summary of the node result; long values are described, not echoed.
    pub result_summary: Option<JsonMap>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_snapshot() -> DagSnapshot {
        let nodes = vec![
            DagNode::new("fetch", "Fetch", "text"),
            DagNode::new("write", "Write", "text").with_dependencies(["fetch"]),
            DagNode::new("analyze", "Analyze", "condition").with_dependencies(["fetch"]),
        ];
        DagSnapshot {
            progress: DagProgress::from_nodes(&nodes),
            edges: vec![
                ("fetch".into(), "write".into()),
                ("fetch".into(), "analyze".into()),
            ],
            nodes,
        }
    }

    #[test]
    fn test_status_serde_is_snake_case() {
        assert_eq!(serde_json::to_string(&NodeStatus::Running).unwrap(), "\"running\"");
        assert_eq!(
            serde_json::to_string(&WorkflowStatus::Imported).unwrap(),
            "\"imported\""
        );
        assert_eq!("paused".parse::<WorkflowStatus>().unwrap(), WorkflowStatus::Paused);
        assert!("bogus".parse::<WorkflowStatus>().is_err());
    }

    #[test]
    fn test_snapshot_nodes_serialize_as_ordered_map() {
        let snapshot = sample_snapshot();
        let value = serde_json::to_value(&snapshot).unwrap();

        let nodes = value["nodes"].as_object().unwrap();
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes["write"]["type"], "text");
        assert_eq!(nodes["write"]["status"], "pending");
        assert_eq!(value["edges"][0], json!(["fetch", "write"]));

        let text = serde_json::to_string(&snapshot).unwrap();
        let parsed: DagSnapshot = serde_json::from_str(&text).unwrap();
        let ids: Vec<_> = parsed.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, ["fetch", "write", "analyze"]);
        assert_eq!(parsed, snapshot);
    }

    #[test]
    fn test_snapshot_tolerates_missing_optional_fields() {
        let parsed: DagSnapshot = serde_json::from_value(json!({
            "nodes": {
                "a": { "id": "a", "name": "A", "type": "text" }
            }
        }))
        .unwrap();
        let node = parsed.node("a").unwrap();
        assert_eq!(node.status, NodeStatus::Pending);
        assert_eq!(node.max_retries, 3);
        assert!(parsed.edges.is_empty());
    }

    #[test]
    fn test_progress_counts() {
        let mut nodes = sample_snapshot().nodes;
        nodes[0].status = NodeStatus::Completed;
        nodes[1].status = NodeStatus::Running;
        nodes[2].status = NodeStatus::Failed;
        let progress = DagProgress::from_nodes(&nodes);
        assert_eq!(progress.total, 3);
        assert_eq!(progress.completed, 1);
        assert_eq!(progress.running, 1);
        assert_eq!(progress.failed, 1);
        assert!((progress.progress_percent - 100.0 / 3.0).abs() < 1e-9);

        assert_eq!(DagProgress::from_nodes(&[]).progress_percent, 0.0);
    }

    #[test]
    fn test_workflow_config_metadata_roundtrip() {
        let mut config = WorkflowConfig::new("pipeline");
        config.max_concurrent_steps = 5;
        config.timeout_seconds = Some(60);
        config.cleanup_on_completion = true;

        let mut metadata = config.to_metadata();
        metadata.insert("execution_time".into(), json!(1.5));
        assert_eq!(WorkflowConfig::from_metadata(&metadata, "ignored"), config);
    }

    #[test]
    fn test_workflow_config_from_sparse_metadata() {
        let metadata: JsonMap = json!({ "max_concurrent_steps": "lots" })
            .as_object()
            .cloned()
            .unwrap();
        let config = WorkflowConfig::from_metadata(&metadata, "record-name");
        assert_eq!(config.name, "record-name");
        assert_eq!(config.max_concurrent_steps, 3);
        assert!(config.retry_failed_steps);
        assert!(config.save_intermediate_results);
        assert!(!config.cleanup_on_completion);
    }

    #[test]
    fn test_step_definition_into_node() {
        let def: StepDefinition = serde_json::from_value(json!({
            "id": "render",
            "type": "video",
            "config": { "prompt": "{{scene}}" },
            "dependencies": ["script"],
            "max_retries": 1
        }))
        .unwrap();
        let node = DagNode::from(def);
        assert_eq!(node.name, "render");
        assert_eq!(node.step_type, "video");
        assert_eq!(node.dependencies, vec!["script".to_string()]);
        assert_eq!(node.max_retries, 1);
        assert_eq!(node.status, NodeStatus::Pending);
    }

    #[test]
    fn test_touched_is_strictly_increasing() {
        let created = timestamp_now();
        let state = WorkflowState {
            workflow_id: "wf".into(),
            name: "wf".into(),
            status: WorkflowStatus::Created,
            dag: DagSnapshot::default(),
            context: JsonMap::new(),
            metadata: JsonMap::new(),
            created_at: created,
            updated_at: created + Duration::seconds(3600),
        };
        let previous = state.updated_at;
        let touched = state.touched();
        assert!(touched.updated_at > previous);
        assert_eq!(touched.created_at, created);
    }

    #[test]
    fn test_elapsed_seconds() {
        let mut node = DagNode::new("a", "A", "text");
        assert!(node.elapsed_seconds().is_none());
        let start = timestamp_now();
        node.start_time = Some(start);
        node.end_time = Some(start + Duration::milliseconds(1500));
        assert_eq!(node.elapsed_seconds(), Some(1.5));
    }

    #[test]
    fn test_step_result_constructors() {
        let ok = StepResult::success(JsonMap::new()).with_execution_time(0.25);
        assert!(ok.success);
        assert!(ok.error.is_none());
        let failed = StepResult::failure("boom");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("boom"));
    }
}
