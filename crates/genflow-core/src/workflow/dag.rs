//! Workflow DAG: node storage, cycle prevention, readiness and transitions.
//!
//! Nodes live in an id-keyed arena; dependency edges live in a `petgraph`
//! `StableDiGraph` so removals keep the remaining indices valid. Every
//! mutation goes through `WorkflowDag`, which keeps the edge set acyclic and
//! the node state machine consistent.

use std::collections::{HashMap, HashSet};

use genflow_types::workflow::{DagNode, DagProgress, DagSnapshot, NodeStatus, timestamp_now};
use petgraph::Direction;
use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use serde_json::Value;

use super::error::WorkflowError;

/// In-memory DAG of one workflow.
#[derive(Debug, Clone, Default)]
pub struct WorkflowDag {
    /// Edge `a -> b` means `b` depends on `a`.
    graph: StableDiGraph<String, ()>,
    indices: HashMap<String, NodeIndex>,
    nodes: HashMap<String, DagNode>,
    /// Insertion order of node ids.
    order: Vec<String>,
}

impl WorkflowDag {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Structure
    // -----------------------------------------------------------------------

    /// Insert a node and its dependency edges.
    ///
    /// Fails on a duplicate id, an unknown dependency, or an edge set that
    /// would become cyclic. A failed call leaves the graph untouched.
    pub fn add_node(&mut self, node: DagNode) -> Result<(), WorkflowError> {
        if self.nodes.contains_key(&node.id) {
            return Err(WorkflowError::DuplicateNode(node.id));
        }
        if let Some(missing) = node
            .dependencies
            .iter()
            .find(|dep| !self.nodes.contains_key(dep.as_str()))
        {
            return Err(WorkflowError::UnknownDependency {
                node: node.id.clone(),
                dependency: missing.clone(),
            });
        }

        let idx = self.graph.add_node(node.id.clone());
        for dep in &node.dependencies {
            self.graph.add_edge(self.indices[dep.as_str()], idx, ());
        }

        if is_cyclic_directed(&self.graph) {
            // Dropping the node drops its edges with it.
            self.graph.remove_node(idx);
            return Err(WorkflowError::CycleDetected(node.id));
        }

        tracing::debug!(node_id = node.id.as_str(), "added node");
        self.indices.insert(node.id.clone(), idx);
        self.order.push(node.id.clone());
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Remove a node that nothing depends on.
    pub fn remove_node(&mut self, id: &str) -> Result<DagNode, WorkflowError> {
        let idx = *self
            .indices
            .get(id)
            .ok_or_else(|| WorkflowError::NodeNotFound(id.to_string()))?;

        let dependents: Vec<String> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .map(|n| self.graph[n].clone())
            .collect();
        if !dependents.is_empty() {
            return Err(WorkflowError::NodeHasDependents {
                node: id.to_string(),
                dependents,
            });
        }

        self.graph.remove_node(idx);
        self.indices.remove(id);
        self.order.retain(|n| n != id);
        tracing::debug!(node_id = id, "removed node");
        self.nodes
            .remove(id)
            .ok_or_else(|| WorkflowError::NodeNotFound(id.to_string()))
    }

    pub fn get_node(&self, id: &str) -> Option<&DagNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// All nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &DagNode> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// `(from, to)` pairs in insertion order of the dependent node.
    pub fn edges(&self) -> Vec<(String, String)> {
        self.nodes()
            .flat_map(|node| {
                node.dependencies
                    .iter()
                    .map(|dep| (dep.clone(), node.id.clone()))
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    fn deps_completed(&self, node: &DagNode) -> bool {
        node.dependencies.iter().all(|dep| {
            self.nodes
                .get(dep)
                .is_some_and(|d| d.status == NodeStatus::Completed)
        })
    }

    fn with_status(&self, status: NodeStatus) -> Vec<&DagNode> {
        self.nodes().filter(|n| n.status == status).collect()
    }

    /// Nodes that may run now, in insertion order.
    ///
    /// Matching `Pending` nodes are promoted to `Ready`; calling this again
    /// without other transitions returns the same set.
    pub fn get_ready_nodes(&mut self) -> Vec<&DagNode> {
        let ready: Vec<String> = self
            .nodes()
            .filter(|n| matches!(n.status, NodeStatus::Pending | NodeStatus::Ready))
            .filter(|n| self.deps_completed(n))
            .map(|n| n.id.clone())
            .collect();

        for id in &ready {
            if let Some(node) = self.nodes.get_mut(id) {
                node.status = NodeStatus::Ready;
            }
        }

        ready.iter().filter_map(|id| self.nodes.get(id)).collect()
    }

    pub fn get_running_nodes(&self) -> Vec<&DagNode> {
        self.with_status(NodeStatus::Running)
    }

    pub fn get_failed_nodes(&self) -> Vec<&DagNode> {
        self.with_status(NodeStatus::Failed)
    }

    pub fn get_completed_nodes(&self) -> Vec<&DagNode> {
        self.with_status(NodeStatus::Completed)
    }

    /// True when the node is `Ready` and every dependency has completed.
    pub fn can_execute(&self, id: &str) -> bool {
        self.nodes
            .get(id)
            .is_some_and(|n| n.status == NodeStatus::Ready && self.deps_completed(n))
    }

    pub fn is_completed(&self) -> bool {
        self.nodes.values().all(|n| n.status.is_done())
    }

    /// Any node currently `Failed`, including ones that may still be retried.
    pub fn has_failures(&self) -> bool {
        self.nodes.values().any(|n| n.status == NodeStatus::Failed)
    }

    pub fn get_progress(&self) -> DagProgress {
        DagProgress::from_nodes(self.nodes())
    }

    /// Node ids ordered so every dependency precedes its dependents.
    pub fn get_topological_order(&self) -> Result<Vec<String>, WorkflowError> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| {
            WorkflowError::InconsistentGraph(format!(
                "cycle involving node '{}'",
                self.graph[cycle.node_id()]
            ))
        })?;
        Ok(sorted.into_iter().map(|idx| self.graph[idx].clone()).collect())
    }

    /// Partition all nodes into batches where every node's dependencies sit
    /// in a strictly earlier batch. Within a batch, insertion order is kept.
    pub fn get_execution_levels(&self) -> Result<Vec<Vec<String>>, WorkflowError> {
        let mut placed: HashSet<&str> = HashSet::with_capacity(self.len());
        let mut levels = Vec::new();

        while placed.len() < self.len() {
            let level: Vec<&str> = self
                .nodes()
                .filter(|n| !placed.contains(n.id.as_str()))
                .filter(|n| n.dependencies.iter().all(|d| placed.contains(d.as_str())))
                .map(|n| n.id.as_str())
                .collect();

            if level.is_empty() {
                return Err(WorkflowError::InconsistentGraph(
                    "no schedulable nodes left; dependency cycle or dangling edge".to_string(),
                ));
            }

            placed.extend(level.iter().copied());
            levels.push(level.into_iter().map(str::to_string).collect());
        }

        Ok(levels)
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    fn node_mut(&mut self, id: &str) -> Result<&mut DagNode, WorkflowError> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| WorkflowError::NodeNotFound(id.to_string()))
    }

    pub fn mark_node_running(&mut self, id: &str) -> Result<(), WorkflowError> {
        let node = self.node_mut(id)?;
        node.status = NodeStatus::Running;
        node.start_time = Some(timestamp_now());
        tracing::debug!(node_id = id, "node running");
        Ok(())
    }

    pub fn mark_node_completed(&mut self, id: &str, result: Option<Value>) -> Result<(), WorkflowError> {
        let node = self.node_mut(id)?;
        node.status = NodeStatus::Completed;
        node.result = result;
        node.error = None;
        node.end_time = Some(timestamp_now());
        tracing::debug!(node_id = id, "node completed");
        Ok(())
    }

    pub fn mark_node_failed(&mut self, id: &str, error: impl Into<String>) -> Result<(), WorkflowError> {
        let node = self.node_mut(id)?;
        node.status = NodeStatus::Failed;
        node.error = Some(error.into());
        node.end_time = Some(timestamp_now());
        tracing::error!(node_id = id, error = node.error.as_deref(), "node failed");
        Ok(())
    }

    pub fn can_retry(&self, id: &str) -> bool {
        self.nodes
            .get(id)
            .is_some_and(|n| n.status == NodeStatus::Failed && n.retry_count < n.max_retries)
    }

    /// Send a failed node back to `Pending` and count the attempt.
    pub fn retry_node(&mut self, id: &str) -> Result<(), WorkflowError> {
        if !self.contains(id) {
            return Err(WorkflowError::NodeNotFound(id.to_string()));
        }
        if !self.can_retry(id) {
            return Err(WorkflowError::NotRetryable(id.to_string()));
        }
        let node = self.node_mut(id)?;
        node.status = NodeStatus::Pending;
        node.error = None;
        node.result = None;
        node.start_time = None;
        node.end_time = None;
        node.retry_count += 1;
        tracing::warn!(node_id = id, attempt = node.retry_count, "retrying node");
        Ok(())
    }

    /// Return every node to a fresh `Pending` state.
    pub fn reset_all_nodes(&mut self) {
        for node in self.nodes.values_mut() {
            node.status = NodeStatus::Pending;
            node.result = None;
            node.error = None;
            node.start_time = None;
            node.end_time = None;
            node.retry_count = 0;
        }
        tracing::info!(nodes = self.nodes.len(), "reset all nodes");
    }

    /// Put nodes left `Running` by an interrupted run back to `Pending`.
    /// Returns the ids that were reset.
    pub fn reset_orphaned_nodes(&mut self) -> Vec<String> {
        let orphans: Vec<String> = self
            .get_running_nodes()
            .into_iter()
            .map(|n| n.id.clone())
            .collect();
        for id in &orphans {
            if let Some(node) = self.nodes.get_mut(id) {
                node.status = NodeStatus::Pending;
                node.start_time = None;
            }
        }
        orphans
    }

    // -----------------------------------------------------------------------
    // Snapshot
    // -----------------------------------------------------------------------

    pub fn to_snapshot(&self) -> DagSnapshot {
        DagSnapshot {
            nodes: self.nodes().cloned().collect(),
            edges: self.edges(),
            progress: self.get_progress(),
        }
    }

    /// Rebuild a DAG from a snapshot, keeping node state as persisted.
    ///
    /// Nodes are inserted first and edges second, so a snapshot may list a
    /// node before its dependencies. Edges come from each node's
    /// `dependencies`; the snapshot's `edges` list is derived data.
    pub fn from_snapshot(snapshot: DagSnapshot) -> Result<Self, WorkflowError> {
        let mut dag = Self::new();

        for node in snapshot.nodes {
            if dag.nodes.contains_key(&node.id) {
                return Err(WorkflowError::DuplicateNode(node.id));
            }
            let idx = dag.graph.add_node(node.id.clone());
            dag.indices.insert(node.id.clone(), idx);
            dag.order.push(node.id.clone());
            dag.nodes.insert(node.id.clone(), node);
        }

        for id in &dag.order {
            let to = dag.indices[id.as_str()];
            for dep in &dag.nodes[id.as_str()].dependencies {
                let from = *dag.indices.get(dep.as_str()).ok_or_else(|| {
                    WorkflowError::UnknownDependency {
                        node: id.clone(),
                        dependency: dep.clone(),
                    }
                })?;
                dag.graph.add_edge(from, to, ());
            }
        }

        if is_cyclic_directed(&dag.graph) {
            return Err(WorkflowError::CycleDetected(
                "snapshot contains a dependency cycle".to_string(),
            ));
        }

        Ok(dag)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn node(id: &str, deps: &[&str]) -> DagNode {
        DagNode::new(id, id.to_uppercase(), "text").with_dependencies(deps.iter().copied())
    }

    /// a -> b, a -> c, (b, c) -> d
    fn diamond() -> WorkflowDag {
        let mut dag = WorkflowDag::new();
        dag.add_node(node("a", &[])).unwrap();
        dag.add_node(node("b", &["a"])).unwrap();
        dag.add_node(node("c", &["a"])).unwrap();
        dag.add_node(node("d", &["b", "c"])).unwrap();
        dag
    }

    fn ready_ids(dag: &mut WorkflowDag) -> Vec<String> {
        dag.get_ready_nodes().into_iter().map(|n| n.id.clone()).collect()
    }

    #[test]
    fn test_add_node_rejects_duplicate_and_unknown_dependency() {
        let mut dag = diamond();
        let edges_before = dag.edges();

        let err = dag.add_node(node("a", &[])).unwrap_err();
        assert!(matches!(err, WorkflowError::DuplicateNode(ref id) if id == "a"));

        let err = dag.add_node(node("e", &["a", "zzz"])).unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::UnknownDependency { ref dependency, .. } if dependency == "zzz"
        ));

        assert_eq!(dag.len(), 4);
        assert_eq!(dag.edges(), edges_before);
        assert!(!dag.contains("e"));
    }

    #[test]
    fn test_mutual_dependency_leaves_graph_empty() {
        let mut dag = WorkflowDag::new();
        assert!(dag.add_node(node("a", &["b"])).is_err());
        assert!(dag.add_node(node("b", &["a"])).is_err());
        assert!(dag.is_empty());
        assert!(dag.edges().is_empty());
    }

    #[test]
    fn test_self_dependency_is_rejected() {
        let mut dag = WorkflowDag::new();
        assert!(dag.add_node(node("loop", &["loop"])).is_err());
        assert!(dag.is_empty());
    }

    #[test]
    fn test_snapshot_with_cycle_is_rejected() {
        let snapshot = DagSnapshot {
            nodes: vec![node("a", &["b"]), node("b", &["a"])],
            ..Default::default()
        };
        let err = WorkflowDag::from_snapshot(snapshot).unwrap_err();
        assert!(matches!(err, WorkflowError::CycleDetected(_)));
    }

    #[test]
    fn test_remove_node_requires_no_dependents() {
        let mut dag = diamond();
        let err = dag.remove_node("a").unwrap_err();
        assert!(matches!(err, WorkflowError::NodeHasDependents { .. }));

        let removed = dag.remove_node("d").unwrap();
        assert_eq!(removed.id, "d");
        assert_eq!(dag.len(), 3);
        assert!(dag.remove_node("b").is_ok());
        assert!(matches!(dag.remove_node("nope"), Err(WorkflowError::NodeNotFound(_))));
        assert_eq!(dag.edges(), vec![("a".to_string(), "c".to_string())]);
    }

    #[test]
    fn test_ready_nodes_follow_dependencies() {
        let mut dag = diamond();
        assert_eq!(ready_ids(&mut dag), ["a"]);
        assert_eq!(dag.get_node("a").unwrap().status, NodeStatus::Ready);
        assert_eq!(dag.get_node("b").unwrap().status, NodeStatus::Pending);
        assert!(dag.can_execute("a"));
        assert!(!dag.can_execute("b"));

        // Idempotent.
        assert_eq!(ready_ids(&mut dag), ["a"]);

        dag.mark_node_running("a").unwrap();
        assert!(ready_ids(&mut dag).is_empty());
        assert_eq!(dag.get_running_nodes().len(), 1);

        dag.mark_node_completed("a", Some(json!({"x": 1}))).unwrap();
        assert_eq!(ready_ids(&mut dag), ["b", "c"]);

        dag.mark_node_running("b").unwrap();
        dag.mark_node_completed("b", None).unwrap();
        // d still waits for c.
        assert_eq!(ready_ids(&mut dag), ["c"]);
    }

    #[test]
    fn test_readiness_matches_definition_for_every_node() {
        let mut dag = diamond();
        dag.mark_node_running("a").unwrap();
        dag.mark_node_completed("a", None).unwrap();
        dag.mark_node_running("c").unwrap();
        dag.mark_node_failed("c", "boom").unwrap();

        let ready = ready_ids(&mut dag);
        for n in dag.nodes() {
            let expected = matches!(n.status, NodeStatus::Pending | NodeStatus::Ready)
                && n.dependencies
                    .iter()
                    .all(|d| dag.get_node(d).unwrap().status == NodeStatus::Completed);
            assert_eq!(ready.contains(&n.id), expected, "node {}", n.id);
        }
    }

    #[test]
    fn test_transitions_stamp_times_and_clear_error() {
        let mut dag = diamond();
        dag.mark_node_running("a").unwrap();
        dag.mark_node_failed("a", "first").unwrap();
        let failed = dag.get_node("a").unwrap();
        assert!(failed.start_time.is_some());
        assert!(failed.end_time.is_some());
        assert_eq!(failed.error.as_deref(), Some("first"));

        dag.mark_node_completed("a", Some(json!("ok"))).unwrap();
        let done = dag.get_node("a").unwrap();
        assert!(done.error.is_none());
        assert_eq!(done.result, Some(json!("ok")));

        assert!(matches!(
            dag.mark_node_running("ghost"),
            Err(WorkflowError::NodeNotFound(_))
        ));
    }

    #[test]
    fn test_retry_rules() {
        let mut dag = WorkflowDag::new();
        dag.add_node(node("flaky", &[]).with_max_retries(1)).unwrap();

        assert!(!dag.can_retry("flaky"));
        assert!(matches!(dag.retry_node("flaky"), Err(WorkflowError::NotRetryable(_))));

        dag.mark_node_running("flaky").unwrap();
        dag.mark_node_failed("flaky", "nope").unwrap();
        assert!(dag.has_failures());
        assert!(dag.can_retry("flaky"));

        dag.retry_node("flaky").unwrap();
        let n = dag.get_node("flaky").unwrap();
        assert_eq!(n.status, NodeStatus::Pending);
        assert_eq!(n.retry_count, 1);
        assert!(n.error.is_none());
        assert!(n.start_time.is_none());
        assert!(!dag.has_failures());

        dag.mark_node_running("flaky").unwrap();
        dag.mark_node_failed("flaky", "nope").unwrap();
        assert!(!dag.can_retry("flaky"));
        assert!(dag.retry_node("flaky").is_err());
        assert_eq!(dag.get_node("flaky").unwrap().retry_count, 1);
    }

    #[test]
    fn test_completion_treats_skipped_as_done() {
        let mut dag = WorkflowDag::new();
        dag.add_node(node("a", &[])).unwrap();
        dag.add_node(node("b", &[])).unwrap();
        assert!(!dag.is_completed());

        dag.mark_node_completed("a", None).unwrap();
        dag.nodes.get_mut("b").unwrap().status = NodeStatus::Skipped;
        assert!(dag.is_completed());
        assert!(WorkflowDag::new().is_completed());
    }

    #[test]
    fn test_topological_order_respects_edges() {
        let dag = diamond();
        let order = dag.get_topological_order().unwrap();
        assert_eq!(order.len(), 4);
        let pos = |id: &str| order.iter().position(|n| n == id).unwrap();
        for (from, to) in dag.edges() {
            assert!(pos(&from) < pos(&to), "{from} before {to}");
        }
    }

    #[test]
    fn test_execution_levels() {
        let mut dag = diamond();
        dag.add_node(node("solo", &[])).unwrap();
        let levels = dag.get_execution_levels().unwrap();
        assert_eq!(
            levels,
            vec![
                vec!["a".to_string(), "solo".to_string()],
                vec!["b".to_string(), "c".to_string()],
                vec!["d".to_string()],
            ]
        );

        let level_of = |id: &str| levels.iter().position(|l| l.iter().any(|n| n == id)).unwrap();
        for n in dag.nodes() {
            for d in &n.dependencies {
                assert!(level_of(d) < level_of(&n.id));
            }
        }
        assert!(WorkflowDag::new().get_execution_levels().unwrap().is_empty());
    }

    #[test]
    fn test_progress_and_reset() {
        let mut dag = diamond();
        dag.mark_node_running("a").unwrap();
        dag.mark_node_completed("a", None).unwrap();
        dag.mark_node_running("b").unwrap();

        let progress = dag.get_progress();
        assert_eq!(progress.total, 4);
        assert_eq!(progress.completed, 1);
        assert_eq!(progress.running, 1);
        assert_eq!(progress.pending, 2);
        assert_eq!(progress.progress_percent, 25.0);

        assert_eq!(dag.reset_orphaned_nodes(), vec!["b".to_string()]);
        assert_eq!(dag.get_node("b").unwrap().status, NodeStatus::Pending);
        assert_eq!(dag.get_node("a").unwrap().status, NodeStatus::Completed);

        dag.reset_all_nodes();
        assert_eq!(dag.get_progress().pending, 4);
    }

    #[test]
    fn test_snapshot_roundtrip_preserves_state_and_order() {
        let mut dag = diamond();
        dag.mark_node_running("a").unwrap();
        dag.mark_node_completed("a", Some(json!({"text": "hi"}))).unwrap();

        let snapshot = dag.to_snapshot();
        assert_eq!(snapshot.edges.len(), 4);
        assert_eq!(snapshot.progress.completed, 1);

        let json = serde_json::to_string(&snapshot).unwrap();
        let restored = WorkflowDag::from_snapshot(serde_json::from_str(&json).unwrap()).unwrap();
        assert_eq!(restored.to_snapshot(), snapshot);
        let ids: Vec<_> = restored.nodes().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c", "d"]);
    }

    #[test]
    fn test_snapshot_may_list_dependents_first() {
        let snapshot = DagSnapshot {
            nodes: vec![node("late", &["early"]), node("early", &[])],
            ..Default::default()
        };
        let mut dag = WorkflowDag::from_snapshot(snapshot).unwrap();
        assert_eq!(ready_ids(&mut dag), ["early"]);

        let dangling = DagSnapshot {
            nodes: vec![node("x", &["missing"])],
            ..Default::default()
        };
        assert!(matches!(
            WorkflowDag::from_snapshot(dangling),
            Err(WorkflowError::UnknownDependency { .. })
        ));
    }
}
