//! Built-in control steps: `condition`, `parallel`, and closure-backed steps.
//!
//! Generation steps that call external services are registered by the host
//! application; these are the ones the engine ships with.

use std::sync::Arc;
use std::time::Instant;

use futures_util::future::{BoxFuture, join_all};
use genflow_types::workflow::{JsonMap, StepResult};
use serde_json::{Value, json};
use tokio::sync::Semaphore;

use super::condition::{Condition, ConditionError};
use super::error::WorkflowError;
use super::step::{BoxStep, StepError, StepRegistry, StepSpec, WorkflowStep};
use super::template::resolve_config;

fn metadata(value: Value) -> JsonMap {
    match value {
        Value::Object(map) => map,
        _ => JsonMap::new(),
    }
}

// ---------------------------------------------------------------------------
// Condition
// ---------------------------------------------------------------------------

/// Evaluates `config.condition` and reports which branch was taken.
///
/// Output data: `{condition_result: bool, branch: <true_branch|false_branch>}`.
pub struct ConditionStep {
    spec: StepSpec,
    condition: Result<Condition, ConditionError>,
}

impl ConditionStep {
    pub fn new(spec: StepSpec) -> Self {
        let condition = match spec.config.get("condition") {
            Some(Value::String(src)) => Condition::parse(src),
            Some(Value::Bool(b)) => Condition::parse(if *b { "true" } else { "false" }),
            _ => Err(ConditionError::Empty),
        };
        Self { spec, condition }
    }

    fn branch(&self, taken: bool) -> Value {
        let (key, default) = if taken {
            ("true_branch", "true")
        } else {
            ("false_branch", "false")
        };
        self.spec
            .config
            .get(key)
            .cloned()
            .unwrap_or_else(|| Value::String(default.to_string()))
    }
}

impl WorkflowStep for ConditionStep {
    fn validate_config(&self) -> bool {
        self.condition.is_ok()
    }

    async fn execute(&self, context: &JsonMap) -> Result<StepResult, StepError> {
        let start = Instant::now();
        let condition = self
            .condition
            .as_ref()
            .map_err(|e| StepError::InvalidConfig(e.to_string()))?;

        let taken = condition.evaluate(context);
        tracing::debug!(step_id = self.spec.id.as_str(), taken, "condition evaluated");

        let mut data = JsonMap::new();
        data.insert("condition_result".into(), Value::Bool(taken));
        data.insert("branch".into(), self.branch(taken));

        Ok(StepResult::success(data)
            .with_metadata(metadata(json!({
                "step_type": "condition",
                "condition": condition.source(),
            })))
            .with_execution_time(start.elapsed().as_secs_f64()))
    }
}

// ---------------------------------------------------------------------------
// Parallel
// ---------------------------------------------------------------------------

/// Runs `config.steps` concurrently, at most `config.max_concurrency` at a time.
///
/// Each entry is `{type, name?, config?}`; children get ids
/// `{id}_parallel_{i}` and are built through the same registry.
pub struct ParallelStep {
    spec: StepSpec,
    children: Vec<BoxStep>,
    max_concurrency: usize,
    well_formed: bool,
}

impl ParallelStep {
    pub fn new(spec: StepSpec, registry: &StepRegistry) -> Result<Self, WorkflowError> {
        let Some(Value::Array(entries)) = spec.config.get("steps") else {
            return Ok(Self {
                spec,
                children: Vec::new(),
                max_concurrency: 1,
                well_formed: false,
            });
        };

        let mut children = Vec::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            let step_type = entry.get("type").and_then(Value::as_str).ok_or_else(|| {
                WorkflowError::InvalidStepDefinition(format!(
                    "parallel step '{}' entry {i} has no type",
                    spec.id
                ))
            })?;
            let child_id = format!("{}_parallel_{i}", spec.id);
            let name = entry
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| child_id.clone());
            let config = entry
                .get("config")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            children.push(registry.create(step_type, StepSpec::new(child_id, name, config))?);
        }

        let max_concurrency = spec
            .config
            .get("max_concurrency")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(children.len())
            .max(1);

        Ok(Self {
            spec,
            children,
            max_concurrency,
            well_formed: true,
        })
    }
}

impl WorkflowStep for ParallelStep {
    fn validate_config(&self) -> bool {
        self.well_formed
    }

    async fn execute(&self, context: &JsonMap) -> Result<StepResult, StepError> {
        let start = Instant::now();
        let semaphore = Semaphore::new(self.max_concurrency);
        let semaphore = &semaphore;

        let results = join_all(self.children.iter().map(|child| async move {
            let _permit = semaphore
                .acquire()
                .await
                .map_err(|e| StepError::Execution(e.to_string()))?;
            if !child.validate_config() {
                return Err(StepError::InvalidConfig("sub-step config is invalid".into()));
            }
            child.execute(context).await
        }))
        .await;

        let errors: Vec<String> = results
            .iter()
            .filter_map(|r| match r {
                Ok(res) if res.success => None,
                Ok(res) => Some(res.error.clone().unwrap_or_else(|| "unknown error".into())),
                Err(e) => Some(e.to_string()),
            })
            .collect();

        let elapsed = start.elapsed().as_secs_f64();
        if !errors.is_empty() {
            tracing::warn!(
                step_id = self.spec.id.as_str(),
                failed = errors.len(),
                "parallel sub-steps failed"
            );
            return Ok(StepResult::failure(format!("{} steps failed: {errors:?}", errors.len()))
                .with_execution_time(elapsed));
        }

        let mut data = JsonMap::new();
        let mut per_step = JsonMap::new();
        let mut collected = Vec::with_capacity(results.len());
        for (i, result) in results.into_iter().flatten().enumerate() {
            for (key, value) in &result.data {
                per_step.insert(format!("step_{i}_{key}"), value.clone());
            }
            collected.push(Value::Object(result.data));
        }
        data.insert("parallel_results".into(), Value::Array(collected));
        data.extend(per_step);

        Ok(StepResult::success(data)
            .with_metadata(metadata(json!({
                "step_type": "parallel",
                "num_steps": self.children.len(),
                "max_concurrency": self.max_concurrency,
            })))
            .with_execution_time(elapsed))
    }
}

// ---------------------------------------------------------------------------
// Closure-backed steps
// ---------------------------------------------------------------------------

/// Async body of a closure step: `(context, resolved_config) -> data | message`.
pub type StepFn =
    Arc<dyn Fn(JsonMap, JsonMap) -> BoxFuture<'static, Result<JsonMap, String>> + Send + Sync>;

/// Step whose body is a host-supplied closure.
pub struct FnStep {
    spec: StepSpec,
    func: StepFn,
}

impl FnStep {
    pub fn new(spec: StepSpec, func: StepFn) -> Self {
        Self { spec, func }
    }
}

impl WorkflowStep for FnStep {
    fn validate_config(&self) -> bool {
        true
    }

    async fn execute(&self, context: &JsonMap) -> Result<StepResult, StepError> {
        let start = Instant::now();
        let config = resolve_config(&self.spec.config, context);
        let outcome = (self.func)(context.clone(), config).await;
        let elapsed = start.elapsed().as_secs_f64();

        Ok(match outcome {
            Ok(data) => StepResult::success(data)
                .with_metadata(metadata(json!({ "step_type": "custom" })))
                .with_execution_time(elapsed),
            Err(message) => {
                tracing::debug!(step_id = self.spec.id.as_str(), error = %message, "custom step failed");
                StepResult::failure(message).with_execution_time(elapsed)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    fn map(value: Value) -> JsonMap {
        value.as_object().cloned().unwrap()
    }

    fn registry() -> StepRegistry {
        let mut registry = StepRegistry::with_builtins();
        registry.register_fn("upper", |_ctx, cfg| async move {
            let text = cfg.get("text").and_then(Value::as_str).unwrap_or_default();
            Ok(map(json!({ "text": text.to_uppercase() })))
        });
        registry.register_fn("fail", |_ctx, _cfg| async move { Err("exploded".to_string()) });
        registry
    }

    #[tokio::test]
    async fn test_condition_branches() {
        let spec = StepSpec::new(
            "check",
            "Check",
            map(json!({
                "condition": "{{score}} > 0.5",
                "true_branch": "publish",
            })),
        );
        let step = ConditionStep::new(spec);
        assert!(step.validate_config());

        let high = step.execute(&map(json!({"score": 0.9}))).await.unwrap();
        assert_eq!(high.data["condition_result"], true);
        assert_eq!(high.data["branch"], "publish");

        let low = step.execute(&map(json!({"score": 0.1}))).await.unwrap();
        assert_eq!(low.data["condition_result"], false);
        assert_eq!(low.data["branch"], "false");
    }

    #[tokio::test]
    async fn test_condition_with_bad_syntax_fails_validation() {
        let step = ConditionStep::new(StepSpec::new(
            "bad",
            "Bad",
            map(json!({ "condition": "__import__('os').system('x')" })),
        ));
        assert!(!step.validate_config());
        assert!(step.execute(&JsonMap::new()).await.is_err());

        let missing = ConditionStep::new(StepSpec::new("none", "None", JsonMap::new()));
        assert!(!missing.validate_config());
    }

    #[tokio::test]
    async fn test_parallel_merges_child_data() {
        let registry = registry();
        let spec = StepSpec::new(
            "fan",
            "Fan",
            map(json!({
                "steps": [
                    { "type": "upper", "config": { "text": "{{a}}" } },
                    { "type": "upper", "name": "second", "config": { "text": "b" } }
                ],
                "max_concurrency": 1
            })),
        );
        let step = registry.create("parallel", spec).unwrap();
        assert!(step.validate_config());

        let result = step.execute(&map(json!({"a": "x"}))).await.unwrap();
        assert!(result.success);
        assert_eq!(result.data["parallel_results"], json!([{"text": "X"}, {"text": "B"}]));
        assert_eq!(result.data["step_0_text"], "X");
        assert_eq!(result.data["step_1_text"], "B");
        assert_eq!(result.metadata["max_concurrency"], 1);
    }

    #[tokio::test]
    async fn test_parallel_reports_child_failures() {
        let registry = registry();
        let spec = StepSpec::new(
            "fan",
            "Fan",
            map(json!({ "steps": [ { "type": "upper" }, { "type": "fail" } ] })),
        );
        let result = registry
            .create("parallel", spec)
            .unwrap()
            .execute(&JsonMap::new())
            .await
            .unwrap();
        assert!(!result.success);
        let error = result.error.unwrap();
        assert!(error.starts_with("1 steps failed"), "{error}");
        assert!(error.contains("exploded"));
    }

    #[tokio::test]
    async fn test_parallel_respects_concurrency_limit() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut registry = StepRegistry::with_builtins();
        {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            registry.register_fn("slow", move |_ctx, _cfg| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(JsonMap::new())
                }
            });
        }
        let spec = StepSpec::new(
            "fan",
            "Fan",
            map(json!({
                "steps": [ {"type": "slow"}, {"type": "slow"}, {"type": "slow"}, {"type": "slow"} ],
                "max_concurrency": 2
            })),
        );
        let result = registry
            .create("parallel", spec)
            .unwrap()
            .execute(&JsonMap::new())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_parallel_construction_errors() {
        let registry = registry();
        let unknown = StepSpec::new("fan", "Fan", map(json!({ "steps": [ {"type": "nope"} ] })));
        assert!(matches!(
            registry.create("parallel", unknown),
            Err(WorkflowError::UnknownStepType(_))
        ));

        let untyped = StepSpec::new("fan", "Fan", map(json!({ "steps": [ {} ] })));
        assert!(matches!(
            registry.create("parallel", untyped),
            Err(WorkflowError::InvalidStepDefinition(_))
        ));

        let malformed = StepSpec::new("fan", "Fan", map(json!({ "steps": "all" })));
        assert!(!registry.create("parallel", malformed).unwrap().validate_config());
    }
}
