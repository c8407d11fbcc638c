//! Step contract, type-erased step wrapper, and the type-tag registry.
//!
//! The engine only ever talks to a step through two methods:
//! [`WorkflowStep::validate_config`] and [`WorkflowStep::execute`]. Concrete
//! steps (generation APIs, control steps, closures) are plugged in through a
//! [`StepRegistry`] that maps a type tag to a constructor.
//!
//! `WorkflowStep` uses RPITIT for `execute`, so it cannot be a trait object
//! directly. The same blanket-impl pattern as the storage traits applies:
//! 1. `WorkflowStepDyn` is the object-safe mirror with boxed futures
//! 2. every `T: WorkflowStep` gets it for free
//! 3. `BoxStep` wraps `Box<dyn WorkflowStepDyn>` and delegates

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use genflow_types::workflow::{JsonMap, StepResult};
use thiserror::Error;

use super::builtin::{ConditionStep, FnStep, ParallelStep, StepFn};
use super::error::WorkflowError;

/// Failure raised by a step body. The engine turns it into a failed node.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Execution(String),
}

/// Construction input for a step: `(id, name, config)`.
#[derive(Debug, Clone, PartialEq)]
pub struct StepSpec {
    pub id: String,
    pub name: String,
    pub config: JsonMap,
}

impl StepSpec {
    pub fn new(id: impl Into<String>, name: impl Into<String>, config: JsonMap) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            config,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowStep trait + dyn wrapper
// ---------------------------------------------------------------------------

/// One schedulable unit of work.
pub trait WorkflowStep: Send + Sync {
    /// Pure check of the construction-time config; called before every attempt.
    fn validate_config(&self) -> bool;

    /// Produce a result from the current workflow context.
    ///
    /// Must not call back into the engine; duration is bounded by the caller.
    fn execute(
        &self,
        context: &JsonMap,
    ) -> impl Future<Output = Result<StepResult, StepError>> + Send;
}

/// Object-safe version of [`WorkflowStep`] with boxed futures.
pub trait WorkflowStepDyn: Send + Sync {
    fn validate_config(&self) -> bool;

    fn execute_boxed<'a>(
        &'a self,
        context: &'a JsonMap,
    ) -> Pin<Box<dyn Future<Output = Result<StepResult, StepError>> + Send + 'a>>;
}

impl<T: WorkflowStep> WorkflowStepDyn for T {
    fn validate_config(&self) -> bool {
        WorkflowStep::validate_config(self)
    }

    fn execute_boxed<'a>(
        &'a self,
        context: &'a JsonMap,
    ) -> Pin<Box<dyn Future<Output = Result<StepResult, StepError>> + Send + 'a>> {
        Box::pin(self.execute(context))
    }
}

/// Type-erased step, as produced by the registry.
pub struct BoxStep {
    inner: Box<dyn WorkflowStepDyn>,
}

impl BoxStep {
    pub fn new<T: WorkflowStep + 'static>(step: T) -> Self {
        Self {
            inner: Box::new(step),
        }
    }

    pub fn validate_config(&self) -> bool {
        self.inner.validate_config()
    }

    pub async fn execute(&self, context: &JsonMap) -> Result<StepResult, StepError> {
        self.inner.execute_boxed(context).await
    }
}

impl fmt::Debug for BoxStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxStep").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Builds a step from its spec. Receives the registry so composite steps can
/// build their children.
pub type StepConstructor =
    Arc<dyn Fn(StepSpec, &StepRegistry) -> Result<BoxStep, WorkflowError> + Send + Sync>;

/// Maps step type tags to constructors.
#[derive(Clone, Default)]
pub struct StepRegistry {
    constructors: HashMap<String, StepConstructor>,
}

impl StepRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the control steps `condition` and `parallel`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("condition", |spec, _| Ok(BoxStep::new(ConditionStep::new(spec))));
        registry.register("parallel", |spec, registry| {
            ParallelStep::new(spec, registry).map(BoxStep::new)
        });
        registry
    }

    /// Register (or replace) the constructor for `step_type`.
    pub fn register<F>(&mut self, step_type: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn(StepSpec, &StepRegistry) -> Result<BoxStep, WorkflowError> + Send + Sync + 'static,
    {
        self.constructors
            .insert(step_type.into(), Arc::new(constructor));
        self
    }

    /// Register a step type backed by an async closure.
    ///
    /// The closure receives the context and the step config with `{{name}}`
    /// placeholders already resolved; its output map becomes the step data,
    /// and an `Err` message fails the step.
    pub fn register_fn<F, Fut>(&mut self, step_type: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(JsonMap, JsonMap) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<JsonMap, String>> + Send + 'static,
    {
        let func: StepFn = Arc::new(
            move |ctx: JsonMap, cfg: JsonMap| -> BoxFuture<'static, Result<JsonMap, String>> {
                Box::pin(f(ctx, cfg))
            },
        );
        self.register(step_type, move |spec, _| {
            Ok(BoxStep::new(FnStep::new(spec, Arc::clone(&func))))
        })
    }

    pub fn contains(&self, step_type: &str) -> bool {
        self.constructors.contains_key(step_type)
    }

    /// Registered tags, sorted.
    pub fn step_types(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    /// Build a step for `step_type`.
    pub fn create(&self, step_type: &str, spec: StepSpec) -> Result<BoxStep, WorkflowError> {
        let constructor = self
            .constructors
            .get(step_type)
            .ok_or_else(|| WorkflowError::UnknownStepType(step_type.to_string()))?;
        constructor(spec, self)
    }
}

impl fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepRegistry")
            .field("step_types", &self.step_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct Echo {
        valid: bool,
    }

    impl WorkflowStep for Echo {
        fn validate_config(&self) -> bool {
            self.valid
        }

        async fn execute(&self, context: &JsonMap) -> Result<StepResult, StepError> {
            Ok(StepResult::success(context.clone()))
        }
    }

    #[tokio::test]
    async fn test_box_step_delegates() {
        let step = BoxStep::new(Echo { valid: true });
        assert!(step.validate_config());
        let ctx = json!({"k": "v"}).as_object().cloned().unwrap();
        let result = step.execute(&ctx).await.unwrap();
        assert_eq!(result.data, ctx);
        assert!(!BoxStep::new(Echo { valid: false }).validate_config());
    }

    #[tokio::test]
    async fn test_registry_create_and_unknown_type() {
        let mut registry = StepRegistry::new();
        registry.register("echo", |_, _| Ok(BoxStep::new(Echo { valid: true })));
        assert!(registry.contains("echo"));
        assert!(registry.create("echo", StepSpec::new("a", "A", JsonMap::new())).is_ok());

        let err = registry
            .create("video", StepSpec::new("b", "B", JsonMap::new()))
            .unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownStepType(ref t) if t == "video"));
    }

    #[tokio::test]
    async fn test_register_fn_resolves_config() {
        let mut registry = StepRegistry::new();
        registry.register_fn("greet", |_ctx, cfg| async move {
            let mut out = JsonMap::new();
            out.insert("greeting".into(), cfg["text"].clone());
            Ok(out)
        });
        let config = json!({"text": "Hello {{name}}!"}).as_object().cloned().unwrap();
        let step = registry
            .create("greet", StepSpec::new("g", "G", config))
            .unwrap();
        let ctx = json!({"name": "World"}).as_object().cloned().unwrap();
        let result = step.execute(&ctx).await.unwrap();
        assert!(result.success);
        assert_eq!(result.data["greeting"], "Hello World!");
    }

    #[test]
    fn test_builtins_registered() {
        let registry = StepRegistry::with_builtins();
        assert_eq!(registry.step_types(), ["condition", "parallel"]);
    }
}
