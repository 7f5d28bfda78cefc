use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use satctl_proto::TaskResult;
use serde_json::Value;

/// Outcome of one invocation of a user task callback (spec §4.4 rule 3:
/// "returns `(result, output_json)` or throws/panics").
#[derive(Debug, Clone)]
pub struct CallbackOutcome {
    pub result: TaskResult,
    pub output_json: String,
    pub error_message: Option<String>,
}

impl CallbackOutcome {
    pub fn success(output_json: String) -> Self {
        Self {
            result: TaskResult::Success,
            output_json,
            error_message: None,
        }
    }

    pub fn failure(error_message: impl Into<String>) -> Self {
        Self {
            result: TaskResult::Failure,
            output_json: String::new(),
            error_message: Some(error_message.into()),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            result: TaskResult::Cancelled,
            output_json: String::new(),
            error_message: None,
        }
    }
}

/// The user-supplied computation a worker hosts. `cancel_requested` is
/// checked cooperatively (spec §4.4 rule 5) — nothing forcibly terminates
/// the thread running this.
pub trait TaskCallback: Send + Sync {
    fn execute(&self, parameters_json: &str, cancel_requested: &AtomicBool) -> CallbackOutcome;
}

/// A callback used by the `satctl-worker` binary when no domain-specific
/// task logic is wired in. Its behavior is keyed off the `"mode"`
/// parameter (`"fast" | "normal" | "slow"`) the same way the built-in test
/// schedule's tasks are shaped.
pub struct DemoCallback;

impl TaskCallback for DemoCallback {
    fn execute(&self, parameters_json: &str, cancel_requested: &AtomicBool) -> CallbackOutcome {
        let params: Value = match serde_json::from_str(parameters_json) {
            Ok(v) => v,
            Err(e) => return CallbackOutcome::failure(format!("invalid parameters_json: {e}")),
        };

        let mode = params.get("mode").and_then(Value::as_str).unwrap_or("fast");
        let iterations = params
            .get("iterations")
            .and_then(Value::as_u64)
            .unwrap_or(match mode {
                "slow" => 5,
                "normal" => 20,
                _ => 100,
            });
        let step = match mode {
            "slow" => Duration::from_millis(200),
            "normal" => Duration::from_millis(20),
            _ => Duration::from_millis(1),
        };

        let mut completed = 0u64;
        for _ in 0..iterations {
            if cancel_requested.load(Ordering::Relaxed) {
                return CallbackOutcome::cancelled();
            }
            std::thread::sleep(step);
            completed += 1;
        }

        let output = serde_json::json!({
            "mode": mode,
            "iterations_completed": completed,
            "dep_output": params.get("dep_output").cloned().unwrap_or(Value::Null),
        });
        CallbackOutcome::success(output.to_string())
    }
}
