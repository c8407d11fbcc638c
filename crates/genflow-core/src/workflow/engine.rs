//! Workflow execution engine.
//!
//! Owns the lifecycle of every workflow: creation from step definitions,
//! background runs, pause/resume/cancel, progress queries, logs and
//! portability. Each run is one tokio task driving a batch-synchronous
//! scheduling loop over the workflow's [`WorkflowDag`]:
//!
//! 1. take up to `max_concurrent_steps` ready nodes and mark them running
//! 2. execute the whole batch concurrently on a `JoinSet` and wait for all of it
//! 3. apply results in selection order (retry, complete, merge into the context)
//! 4. persist the snapshot and fire `step_completed`
//!
//! The loop ends when the DAG completes, any node is permanently failed, or
//! nothing is ready or running. Context merges are applied only after the
//! batch has finished, so nodes of one batch never see each other's output.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use genflow_types::event::WorkflowEvent;
use genflow_types::workflow::{
    DagNode, JsonMap, StepDefinition, StepLog, StepResult, WorkflowConfig, WorkflowExport,
    WorkflowProgressReport, WorkflowStatus, WorkflowSummary, timestamp_now,
};
use serde_json::{Value, json};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::repository::state::StateBackend;

use super::callback::{CallbackRegistry, WorkflowCallback};
use super::condition::is_truthy;
use super::dag::WorkflowDag;
use super::error::WorkflowError;
use super::library::TemplateLibrary;
use super::state::WorkflowStateManager;
use super::step::{BoxStep, StepRegistry, StepSpec};

/// Default sleep between readiness checks while nodes are in flight.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

const SUMMARY_STRING_LIMIT: usize = 100;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Engine-wide settings.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub poll_interval: Duration,
    pub templates: TemplateLibrary,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            templates: TemplateLibrary::builtin(),
        }
    }
}

// ---------------------------------------------------------------------------
// Run tracking
// ---------------------------------------------------------------------------

/// What a run task reported when it stopped.
#[derive(Debug, Clone, PartialEq)]
enum RunOutcome {
    Running,
    /// Reached a final status and wrote it.
    Finished(WorkflowStatus),
    /// Stopped by pause/cancel; the interrupter writes the status.
    Interrupted,
}

struct RunHandle {
    run_id: Uuid,
    token: CancellationToken,
    done: watch::Receiver<RunOutcome>,
}

enum LoopExit {
    Drained,
    Interrupted,
    TimedOut,
}

/// Everything one run task owns.
struct Run {
    workflow_id: String,
    run_id: Uuid,
    name: String,
    config: WorkflowConfig,
    metadata: JsonMap,
    dag: WorkflowDag,
    context: JsonMap,
    steps: HashMap<String, Arc<BoxStep>>,
}

impl Run {
    fn record_failure(&mut self, step_id: &str, message: String) -> Result<(), WorkflowError> {
        tracing::warn!(
            workflow_id = %self.workflow_id,
            step_id,
            error = %message,
            "step failed"
        );
        self.dag.mark_node_failed(step_id, message)?;
        if self.config.retry_failed_steps && self.dag.can_retry(step_id) {
            self.dag.retry_node(step_id)?;
            tracing::info!(workflow_id = %self.workflow_id, step_id, "step scheduled for retry");
        } else {
            tracing::error!(workflow_id = %self.workflow_id, step_id, "step failed permanently");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

struct EngineInner<B: StateBackend> {
    state: WorkflowStateManager<B>,
    registry: StepRegistry,
    templates: TemplateLibrary,
    runs: DashMap<String, RunHandle>,
    callbacks: CallbackRegistry,
    poll_interval: Duration,
}

/// DAG workflow engine over a pluggable state backend.
///
/// Cheap to clone; clones share runs, callbacks and storage.
pub struct WorkflowEngine<B: StateBackend + 'static> {
    inner: Arc<EngineInner<B>>,
}

impl<B: StateBackend + 'static> Clone for WorkflowEngine<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: StateBackend + 'static> WorkflowEngine<B> {
    pub fn new(backend: B, registry: StepRegistry) -> Self {
        Self::with_options(backend, registry, EngineOptions::default())
    }

    pub fn with_options(backend: B, registry: StepRegistry, options: EngineOptions) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                state: WorkflowStateManager::new(backend),
                registry,
                templates: options.templates,
                runs: DashMap::new(),
                callbacks: CallbackRegistry::new(),
                poll_interval: options.poll_interval,
            }),
        }
    }

    pub fn state_manager(&self) -> &WorkflowStateManager<B> {
        &self.inner.state
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.inner.registry
    }

    pub fn templates(&self) -> &TemplateLibrary {
        &self.inner.templates
    }

    /// Whether a run task is currently tracked for `workflow_id`.
    pub fn is_running(&self, workflow_id: &str) -> bool {
        self.inner.runs.contains_key(workflow_id)
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    /// Build and persist a new workflow with status `created`. Returns its id.
    ///
    /// Every step is validated and constructed up front; nothing is persisted
    /// unless the whole graph is valid.
    pub async fn create_workflow(
        &self,
        config: WorkflowConfig,
        steps: Vec<StepDefinition>,
        initial_context: JsonMap,
    ) -> Result<String, WorkflowError> {
        let mut dag = WorkflowDag::new();
        for def in steps {
            if def.id.trim().is_empty() {
                return Err(WorkflowError::InvalidStepDefinition(
                    "step is missing an id".into(),
                ));
            }
            if def.step_type.trim().is_empty() {
                return Err(WorkflowError::InvalidStepDefinition(format!(
                    "step '{}' is missing a type",
                    def.id
                )));
            }
            let node = DagNode::from(def);
            self.inner.build_step(&node)?;
            dag.add_node(node)?;
        }

        let workflow_id = Uuid::now_v7().to_string();
        self.inner
            .state
            .save_workflow(
                &workflow_id,
                &config.name,
                &dag,
                &initial_context,
                WorkflowStatus::Created,
                &config.to_metadata(),
            )
            .await?;

        tracing::info!(
            workflow_id = %workflow_id,
            name = %config.name,
            steps = dag.len(),
            "created workflow"
        );
        Ok(workflow_id)
    }

    /// Create a workflow from a library template, with `inputs` as the
    /// initial context.
    pub async fn create_workflow_from_template(
        &self,
        template_id: &str,
        inputs: JsonMap,
    ) -> Result<String, WorkflowError> {
        let template = self.inner.templates.get_template(template_id)?;
        let (config, steps) = (template.config.clone(), template.steps.clone());
        let workflow_id = self.create_workflow(config, steps, inputs).await?;
        tracing::info!(workflow_id = %workflow_id, template = template_id, "created workflow from template");
        Ok(workflow_id)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Spawn a run for a persisted workflow and mark it `running`.
    ///
    /// Fails with `AlreadyRunning` if a run for the id is still tracked.
    pub async fn start_workflow(&self, workflow_id: &str) -> Result<(), WorkflowError> {
        let run_id = Uuid::now_v7();
        let token = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(RunOutcome::Running);

        match self.inner.runs.entry(workflow_id.to_string()) {
            Entry::Occupied(_) => {
                return Err(WorkflowError::AlreadyRunning(workflow_id.to_string()));
            }
            Entry::Vacant(slot) => {
                slot.insert(RunHandle {
                    run_id,
                    token: token.clone(),
                    done: done_rx,
                });
            }
        }

        let run = match self.prepare_run(workflow_id, run_id).await {
            Ok(run) => run,
            Err(e) => {
                self.inner.untrack(workflow_id, run_id);
                return Err(e);
            }
        };

        tracing::info!(
            workflow_id,
            run_id = %run_id,
            nodes = run.dag.len(),
            max_concurrent_steps = run.config.max_concurrent_steps,
            "starting workflow"
        );
        let span = tracing::info_span!("workflow_run", workflow_id, run_id = %run_id);
        tokio::spawn(
            Arc::clone(&self.inner)
                .drive(run, token, done_tx)
                .instrument(span),
        );
        Ok(())
    }

    /// Same as [`Self::start_workflow`]: the run continues from the persisted DAG.
    pub async fn resume_workflow(&self, workflow_id: &str) -> Result<(), WorkflowError> {
        self.start_workflow(workflow_id).await
    }

    /// Stop the tracked run and record `paused`.
    ///
    /// Fails with `NotRunning` if nothing is tracked, or if the run reached
    /// its final status before it could be interrupted.
    pub async fn pause_workflow(&self, workflow_id: &str) -> Result<(), WorkflowError> {
        match self.interrupt(workflow_id).await {
            None | Some(RunOutcome::Finished(_)) => {
                Err(WorkflowError::NotRunning(workflow_id.to_string()))
            }
            Some(_) => {
                self.inner
                    .state
                    .update_workflow_status(workflow_id, WorkflowStatus::Paused, None)
                    .await?;
                tracing::info!(workflow_id, "paused workflow");
                Ok(())
            }
        }
    }

    /// Stop the tracked run (if any) and record `cancelled`.
    ///
    /// A workflow that is not running is still marked cancelled; a run that
    /// finished before it could be interrupted keeps its final status.
    pub async fn cancel_workflow(&self, workflow_id: &str) -> Result<(), WorkflowError> {
        if let Some(RunOutcome::Finished(status)) = self.interrupt(workflow_id).await {
            tracing::info!(workflow_id, status = %status, "workflow finished before cancel");
            return Ok(());
        }
        self.inner
            .state
            .update_workflow_status(workflow_id, WorkflowStatus::Cancelled, None)
            .await?;
        tracing::info!(workflow_id, "cancelled workflow");
        Ok(())
    }

    /// Wait for the tracked run to finish.
    ///
    /// Returns `true` when the run reached a final status (or nothing is
    /// tracked), `false` on timeout or when the run was paused or cancelled.
    /// A timeout here leaves the run going.
    pub async fn wait_for_completion(&self, workflow_id: &str, timeout: Option<Duration>) -> bool {
        let Some(mut done) = self.inner.runs.get(workflow_id).map(|h| h.done.clone()) else {
            return true;
        };

        let wait = async move {
            match done.wait_for(|outcome| *outcome != RunOutcome::Running).await {
                Ok(outcome) => matches!(*outcome, RunOutcome::Finished(_)),
                // Sender gone: the task is over.
                Err(_) => true,
            }
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.unwrap_or(false),
            None => wait.await,
        }
    }

    /// Remove a workflow's record and listeners. Refused while it is running.
    pub async fn delete_workflow(&self, workflow_id: &str) -> Result<(), WorkflowError> {
        if self.is_running(workflow_id) {
            return Err(WorkflowError::AlreadyRunning(workflow_id.to_string()));
        }
        self.inner.state.delete_workflow(workflow_id).await?;
        self.inner.callbacks.remove_all(workflow_id);
        Ok(())
    }

    /// Delete records not updated within `max_age_days`.
    pub async fn cleanup_old_workflows(&self, max_age_days: u32) -> Result<usize, WorkflowError> {
        Ok(self.inner.state.cleanup_old_workflows(max_age_days).await?)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn get_workflow_status(
        &self,
        workflow_id: &str,
    ) -> Result<Option<WorkflowProgressReport>, WorkflowError> {
        Ok(self.inner.state.get_workflow_progress(workflow_id).await?)
    }

    pub async fn list_workflows(&self) -> Result<Vec<WorkflowSummary>, WorkflowError> {
        Ok(self.inner.state.list_workflows().await?)
    }

    /// Context of a persisted workflow, `None` if it does not exist.
    pub async fn get_workflow_context(&self, workflow_id: &str) -> Result<Option<JsonMap>, WorkflowError> {
        Ok(self
            .inner
            .state
            .load_state(workflow_id)
            .await?
            .map(|state| state.context))
    }

    /// Per-node execution view, optionally narrowed to one step. Empty for
    /// an unknown workflow.
    pub async fn get_workflow_logs(
        &self,
        workflow_id: &str,
        step_id: Option<&str>,
    ) -> Result<Vec<StepLog>, WorkflowError> {
        let Some(state) = self.inner.state.load_state(workflow_id).await? else {
            return Ok(Vec::new());
        };
        Ok(state
            .dag
            .nodes
            .iter()
            .filter(|node| step_id.is_none_or(|id| id == node.id))
            .map(|node| StepLog {
                step_id: node.id.clone(),
                name: node.name.clone(),
                step_type: node.step_type.clone(),
                status: node.status,
                start_time: node.start_time,
                end_time: node.end_time,
                execution_time: node.elapsed_seconds(),
                retry_count: node.retry_count,
                error: node.error.clone(),
                result_summary: node
                    .result
                    .as_ref()
                    .filter(|result| is_truthy(result))
                    .map(summarize_result),
            })
            .collect())
    }

    // -----------------------------------------------------------------------
    // Portability
    // -----------------------------------------------------------------------

    pub async fn export_workflow_definition(
        &self,
        workflow_id: &str,
    ) -> Result<Option<WorkflowExport>, WorkflowError> {
        Ok(self.inner.state.export_workflow(workflow_id).await?)
    }

    /// Store `definition` under a fresh id with status `imported`.
    pub async fn import_workflow_definition(
        &self,
        definition: WorkflowExport,
    ) -> Result<String, WorkflowError> {
        let workflow_id = Uuid::now_v7().to_string();
        self.inner
            .state
            .import_workflow(&workflow_id, definition)
            .await?;
        Ok(workflow_id)
    }

    // -----------------------------------------------------------------------
    // Callbacks
    // -----------------------------------------------------------------------

    pub fn add_callback(&self, workflow_id: &str, callback: WorkflowCallback) {
        self.inner.callbacks.add(workflow_id, callback);
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn prepare_run(&self, workflow_id: &str, run_id: Uuid) -> Result<Run, WorkflowError> {
        let loaded = self
            .inner
            .state
            .load_workflow(workflow_id)
            .await?
            .ok_or_else(|| WorkflowError::WorkflowNotFound(workflow_id.to_string()))?;

        let config = WorkflowConfig::from_metadata(&loaded.metadata, &loaded.name);
        let mut dag = loaded.dag;
        let orphans = dag.reset_orphaned_nodes();
        if !orphans.is_empty() {
            tracing::warn!(workflow_id, nodes = ?orphans, "reset nodes left running by an earlier run");
        }

        let mut steps = HashMap::with_capacity(dag.len());
        for node in dag.nodes() {
            steps.insert(node.id.clone(), Arc::new(self.inner.build_step(node)?));
        }

        self.inner
            .state
            .save_workflow(
                workflow_id,
                &loaded.name,
                &dag,
                &loaded.context,
                WorkflowStatus::Running,
                &loaded.metadata,
            )
            .await?;

        Ok(Run {
            workflow_id: workflow_id.to_string(),
            run_id,
            name: loaded.name,
            config,
            metadata: loaded.metadata,
            dag,
            context: loaded.context,
            steps,
        })
    }

    /// Cancel the tracked run and wait until its task has stopped.
    /// `None` if nothing is tracked.
    async fn interrupt(&self, workflow_id: &str) -> Option<RunOutcome> {
        let (run_id, token, mut done) = {
            let handle = self.inner.runs.get(workflow_id)?;
            (handle.run_id, handle.token.clone(), handle.done.clone())
        };

        token.cancel();
        let outcome = match done
            .wait_for(|outcome| *outcome != RunOutcome::Running)
            .await
        {
            Ok(outcome) => outcome.clone(),
            Err(_) => RunOutcome::Interrupted,
        };
        self.inner.untrack(workflow_id, run_id);
        Some(outcome)
    }
}

impl<B: StateBackend + 'static> EngineInner<B> {
    fn build_step(&self, node: &DagNode) -> Result<BoxStep, WorkflowError> {
        self.registry.create(
            &node.step_type,
            StepSpec::new(&node.id, &node.name, node.config.clone()),
        )
    }

    /// Drop the run entry, but only if it still belongs to `run_id`.
    fn untrack(&self, workflow_id: &str, run_id: Uuid) {
        self.runs
            .remove_if(workflow_id, |_, handle| handle.run_id == run_id);
    }

    /// Body of a run task.
    async fn drive(
        self: Arc<Self>,
        mut run: Run,
        token: CancellationToken,
        done: watch::Sender<RunOutcome>,
    ) {
        let outcome = match AssertUnwindSafe(self.execute(&mut run, &token))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::error!(workflow_id = %run.workflow_id, "workflow run panicked");
                self.fail(&run.workflow_id, "workflow run panicked").await;
                self.untrack(&run.workflow_id, run.run_id);
                RunOutcome::Finished(WorkflowStatus::Failed)
            }
        };
        done.send_replace(outcome);
    }

    async fn execute(&self, run: &mut Run, token: &CancellationToken) -> RunOutcome {
        let started = Instant::now();
        let deadline = run
            .config
            .timeout_seconds
            .map(|secs| tokio::time::Instant::now() + Duration::from_secs(secs));

        match self.schedule(run, token, deadline).await {
            Ok(LoopExit::Drained) => {
                let status = if run.dag.is_completed() {
                    WorkflowStatus::Completed
                } else {
                    WorkflowStatus::Failed
                };
                self.finish(run, status, started, None).await
            }
            Ok(LoopExit::TimedOut) => {
                tracing::warn!(workflow_id = %run.workflow_id, "workflow timed out");
                self.finish(run, WorkflowStatus::Failed, started, Some("workflow timed out"))
                    .await
            }
            Ok(LoopExit::Interrupted) => {
                tracing::info!(workflow_id = %run.workflow_id, "workflow run interrupted");
                RunOutcome::Interrupted
            }
            Err(e) => {
                tracing::error!(workflow_id = %run.workflow_id, error = %e, "workflow run failed");
                self.fail(&run.workflow_id, &e.to_string()).await;
                self.untrack(&run.workflow_id, run.run_id);
                RunOutcome::Finished(WorkflowStatus::Failed)
            }
        }
    }

    /// The scheduling loop.
    async fn schedule(
        &self,
        run: &mut Run,
        token: &CancellationToken,
        deadline: Option<tokio::time::Instant>,
    ) -> Result<LoopExit, WorkflowError> {
        let max_batch = run.config.max_concurrent_steps.max(1);
        let timeout = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(timeout);

        loop {
            if run.dag.is_completed() || run.dag.has_failures() {
                return Ok(LoopExit::Drained);
            }
            if token.is_cancelled() {
                return Ok(LoopExit::Interrupted);
            }

            let batch: Vec<String> = run
                .dag
                .get_ready_nodes()
                .into_iter()
                .take(max_batch)
                .map(|node| node.id.clone())
                .collect();

            if batch.is_empty() {
                if run.dag.get_running_nodes().is_empty() {
                    return Ok(LoopExit::Drained);
                }
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Ok(LoopExit::Interrupted),
                    _ = &mut timeout => return Ok(LoopExit::TimedOut),
                    _ = tokio::time::sleep(self.poll_interval) => continue,
                }
            }

            let mut join_set = JoinSet::new();
            let snapshot = Arc::new(run.context.clone());
            for (slot, step_id) in batch.iter().enumerate() {
                let step = run.steps.get(step_id).cloned().ok_or_else(|| {
                    WorkflowError::InconsistentGraph(format!("no step built for node '{step_id}'"))
                })?;
                run.dag.mark_node_running(step_id)?;
                tracing::debug!(workflow_id = %run.workflow_id, step_id = %step_id, "step started");

                let context = Arc::clone(&snapshot);
                join_set.spawn(async move { (slot, run_step(step, context).await) });
            }

            let outcomes = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(LoopExit::Interrupted),
                _ = &mut timeout => return Ok(LoopExit::TimedOut),
                outcomes = collect_batch(&mut join_set, batch.len()) => outcomes,
            };

            for (step_id, outcome) in batch.iter().zip(outcomes) {
                match outcome {
                    Ok(result) if result.success => {
                        tracing::info!(
                            workflow_id = %run.workflow_id,
                            step_id = %step_id,
                            execution_time = result.execution_time,
                            "step completed"
                        );
                        run.dag
                            .mark_node_completed(step_id, Some(Value::Object(result.data.clone())))?;
                        if run.config.save_intermediate_results {
                            run.context.extend(result.data);
                        }
                    }
                    Ok(result) => {
                        let message = result.error.unwrap_or_else(|| "step failed".to_string());
                        run.record_failure(step_id, message)?;
                    }
                    Err(message) => run.record_failure(step_id, message)?,
                }
            }

            self.state
                .save_workflow(
                    &run.workflow_id,
                    &run.name,
                    &run.dag,
                    &run.context,
                    WorkflowStatus::Running,
                    &run.metadata,
                )
                .await?;

            self.callbacks
                .dispatch(
                    &run.workflow_id,
                    &WorkflowEvent::StepCompleted {
                        completed_steps: batch,
                        progress: run.dag.get_progress(),
                    },
                )
                .await;
        }
    }

    /// Write the final status, notify listeners and release the run.
    async fn finish(
        &self,
        run: &Run,
        status: WorkflowStatus,
        started: Instant,
        error: Option<&str>,
    ) -> RunOutcome {
        let execution_time = started.elapsed().as_secs_f64();
        let progress = run.dag.get_progress();
        let workflow_id = run.workflow_id.as_str();

        let mut extra = JsonMap::new();
        extra.insert("execution_time".into(), json!(execution_time));
        extra.insert("completed_at".into(), json!(timestamp_now().to_rfc3339()));
        if let Some(error) = error {
            extra.insert("error".into(), json!(error));
        }
        if let Err(e) = self
            .state
            .update_workflow_status(workflow_id, status, Some(extra))
            .await
        {
            tracing::error!(workflow_id, error = %e, "failed to record final workflow status");
        }

        if status == WorkflowStatus::Completed {
            tracing::info!(workflow_id, execution_time, "workflow completed");
        } else {
            let failed: Vec<&str> = run
                .dag
                .get_failed_nodes()
                .into_iter()
                .map(|node| node.id.as_str())
                .collect();
            tracing::error!(workflow_id, execution_time, failed_steps = ?failed, "workflow failed");
        }

        self.callbacks
            .dispatch(
                workflow_id,
                &WorkflowEvent::WorkflowCompleted {
                    status,
                    execution_time,
                    progress,
                },
            )
            .await;

        if run.config.cleanup_on_completion {
            if let Err(e) = self.state.delete_workflow(workflow_id).await {
                tracing::warn!(workflow_id, error = %e, "failed to clean up workflow state");
            }
            self.callbacks.remove_all(workflow_id);
        }

        self.untrack(workflow_id, run.run_id);
        RunOutcome::Finished(status)
    }

    /// Record an unexpected run failure.
    async fn fail(&self, workflow_id: &str, message: &str) {
        let mut extra = JsonMap::new();
        extra.insert("error".into(), json!(message));
        extra.insert("failed_at".into(), json!(timestamp_now().to_rfc3339()));
        if let Err(e) = self
            .state
            .update_workflow_status(workflow_id, WorkflowStatus::Failed, Some(extra))
            .await
        {
            tracing::error!(workflow_id, error = %e, "failed to record workflow failure");
        }
    }
}

// ---------------------------------------------------------------------------
// Step execution helpers
// ---------------------------------------------------------------------------

/// Validate and execute one step. Every failure mode comes back as `Err(message)`.
async fn run_step(step: Arc<BoxStep>, context: Arc<JsonMap>) -> Result<StepResult, String> {
    if !step.validate_config() {
        return Err("invalid step configuration".to_string());
    }
    match AssertUnwindSafe(step.execute(&context)).catch_unwind().await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => Err(e.to_string()),
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(format!("step panicked: {detail}"))
        }
    }
}

/// Join every task of a batch, returning outcomes in selection order.
async fn collect_batch(
    join_set: &mut JoinSet<(usize, Result<StepResult, String>)>,
    len: usize,
) -> Vec<Result<StepResult, String>> {
    let mut outcomes: Vec<Option<Result<StepResult, String>>> = (0..len).map(|_| None).collect();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((slot, outcome)) => {
                if let Some(entry) = outcomes.get_mut(slot) {
                    *entry = Some(outcome);
                }
            }
            Err(e) => tracing::warn!(error = %e, "step task did not finish"),
        }
    }
    outcomes
        .into_iter()
        .map(|outcome| outcome.unwrap_or_else(|| Err("step task aborted".to_string())))
        .collect()
}

// ---------------------------------------------------------------------------
// Result summaries
// ---------------------------------------------------------------------------

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Shallow, log-friendly view of a step result.
///
/// For an object, short strings are kept, long strings become
/// `"N characters"`, arrays `"N items"`, nested objects `"dict with N keys"`
/// and scalars their type name. Anything else becomes `{"type": <name>}`.
pub fn summarize_result(result: &Value) -> JsonMap {
    let mut summary = JsonMap::new();
    match result {
        Value::Object(map) => {
            for (key, value) in map {
                let entry = match value {
                    Value::String(s) => {
                        let chars = s.chars().count();
                        if chars > SUMMARY_STRING_LIMIT {
                            json!(format!("{chars} characters"))
                        } else {
                            value.clone()
                        }
                    }
                    Value::Array(items) => json!(format!("{} items", items.len())),
                    Value::Object(inner) => json!(format!("dict with {} keys", inner.len())),
                    other => json!(json_type_name(other)),
                };
                summary.insert(key.clone(), entry);
            }
        }
        other => {
            summary.insert("type".into(), json!(json_type_name(other)));
        }
    }
    summary
}
