//! Per-workflow event listeners.
//!
//! Listeners are sync or async closures receiving `(workflow_id, event)`.
//! Dispatch never fails: a listener that returns `Err` or panics is logged
//! at warn and the remaining listeners still run.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use genflow_types::event::WorkflowEvent;

pub type SyncCallbackFn = dyn Fn(&str, &WorkflowEvent) -> Result<(), String> + Send + Sync;
pub type AsyncCallbackFn =
    dyn Fn(String, WorkflowEvent) -> BoxFuture<'static, Result<(), String>> + Send + Sync;

/// One registered listener.
#[derive(Clone)]
pub enum WorkflowCallback {
    Sync(Arc<SyncCallbackFn>),
    Async(Arc<AsyncCallbackFn>),
}

impl WorkflowCallback {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&str, &WorkflowEvent) -> Result<(), String> + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(String, WorkflowEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        Self::Async(Arc::new(
            move |id: String, event: WorkflowEvent| -> BoxFuture<'static, Result<(), String>> {
                Box::pin(f(id, event))
            },
        ))
    }

    /// Run the listener, absorbing errors and panics.
    pub async fn invoke(&self, workflow_id: &str, event: &WorkflowEvent) {
        let outcome = match self {
            Self::Sync(f) => std::panic::catch_unwind(AssertUnwindSafe(|| f(workflow_id, event))),
            Self::Async(f) => {
                AssertUnwindSafe(f(workflow_id.to_string(), event.clone()))
                    .catch_unwind()
                    .await
            }
        };

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(message)) => {
                tracing::warn!(workflow_id, event = event.name(), error = %message, "callback failed");
            }
            Err(_) => {
                tracing::warn!(workflow_id, event = event.name(), "callback panicked");
            }
        }
    }
}

/// Listeners keyed by workflow id.
#[derive(Default)]
pub struct CallbackRegistry {
    listeners: DashMap<String, Vec<WorkflowCallback>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, workflow_id: &str, callback: WorkflowCallback) {
        self.listeners
            .entry(workflow_id.to_string())
            .or_default()
            .push(callback);
    }

    pub fn remove_all(&self, workflow_id: &str) {
        self.listeners.remove(workflow_id);
    }

    pub fn count(&self, workflow_id: &str) -> usize {
        self.listeners.get(workflow_id).map_or(0, |l| l.len())
    }

    /// Deliver `event` to every listener of `workflow_id`, in registration order.
    pub async fn dispatch(&self, workflow_id: &str, event: &WorkflowEvent) {
        // Clone out so no map guard is held across an await.
        let listeners = match self.listeners.get(workflow_id) {
            Some(entry) => entry.value().clone(),
            None => return,
        };
        for listener in &listeners {
            listener.invoke(workflow_id, event).await;
        }
    }
}
