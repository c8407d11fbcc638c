//! Step types the CLI host registers on top of the engine built-ins.
//!
//! - `echo` returns its resolved config, so templated values land in the
//!   workflow context.
//! - `delay` sleeps for `seconds` (default 1) and then echoes.
//! - `fail` always fails with `message`; handy for exercising retries.
//!
//! With `dry_run`, the generation step types used by the template library
//! are registered as `echo` so templates can be run end to end offline.

use std::time::Duration;

use genflow_core::workflow::step::StepRegistry;
use genflow_types::workflow::JsonMap;
use serde_json::Value;

/// Step types the built-in templates use for model calls.
pub const GENERATION_STEP_TYPES: &[&str] = &[
    "text_generation",
    "text_analysis",
    "image_generation",
    "video_generation",
];

const MAX_DELAY_SECONDS: f64 = 3600.0;

pub fn registry(dry_run: bool) -> StepRegistry {
    let mut registry = StepRegistry::with_builtins();
    registry
        .register_fn("echo", |_ctx, config| async move { Ok(config) })
        .register_fn("delay", |_ctx, config| delay(config))
        .register_fn("fail", |_ctx, config: JsonMap| async move {
            let message = config
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("step failed on purpose");
            Err::<JsonMap, _>(message.to_string())
        });

    if dry_run {
        for step_type in GENERATION_STEP_TYPES {
            registry.register_fn(*step_type, |_ctx, config| async move { Ok(config) });
        }
    }
    registry
}

async fn delay(config: JsonMap) -> Result<JsonMap, String> {
    let seconds = match config.get("seconds") {
        None => 1.0,
        Some(value) => value
            .as_f64()
            .ok_or_else(|| format!("'seconds' must be a number, got {value}"))?,
    };
    if !(0.0..=MAX_DELAY_SECONDS).contains(&seconds) {
        return Err(format!(
            "'seconds' must be between 0 and {MAX_DELAY_SECONDS}, got {seconds}"
        ));
    }
    tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use genflow_core::workflow::step::StepSpec;
    use serde_json::json;

    use super::*;

    fn spec(config: Value) -> StepSpec {
        StepSpec::new("s", "S", config.as_object().cloned().unwrap())
    }

    #[tokio::test]
    async fn test_echo_returns_resolved_config() {
        let step = registry(false)
            .create("echo", spec(json!({"message": "hello {{who}}"})))
            .unwrap();
        let ctx = json!({"who": "world"}).as_object().cloned().unwrap();

        let result = step.execute(&ctx).await.unwrap();
        assert!(result.success);
        assert_eq!(result.data["message"], "hello world");
    }

    #[tokio::test]
    async fn test_delay_validates_seconds() {
        let registry = registry(false);
        let ok = registry
            .create("delay", spec(json!({"seconds": 0})))
            .unwrap();
        assert!(ok.execute(&JsonMap::new()).await.unwrap().success);

        let bad = registry
            .create("delay", spec(json!({"seconds": -1})))
            .unwrap();
        let result = bad.execute(&JsonMap::new()).await.unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("between"));
    }

    #[tokio::test]
    async fn test_fail_reports_message() {
        let step = registry(false)
            .create("fail", spec(json!({"message": "boom"})))
            .unwrap();
        let result = step.execute(&JsonMap::new()).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_dry_run_registers_generation_types() {
        assert!(!registry(false).contains("text_generation"));
        let dry = registry(true);
        for step_type in GENERATION_STEP_TYPES {
            assert!(dry.contains(step_type));
        }
    }
}
