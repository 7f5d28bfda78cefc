use satctl_proto::{TaskResult, TaskState};
use satctl_schedule::{ScheduledTask, TaskMode};

/// Per-invocation bookkeeping entry (spec §3 "Task Execution Record").
/// Created on release, mutated on start and end, moved into the history
/// collection on completion.
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub task_id: String,
    pub worker_endpoint: String,
    pub mode: TaskMode,
    pub scheduled_time_us: i64,
    pub wait_for_task_id: Option<String>,
    pub deadline_us: i64,
    pub estimated_duration_us: i64,
    /// Carried through inert per §3/SPEC_FULL supplement: the engine never
    /// retries or aborts on these, but an author's intent round-trips to
    /// the rendered summary.
    pub max_retries: u32,
    pub critical: bool,

    pub actual_start_time_us: i64,
    pub end_time_us: i64,
    pub context_switch_time_us: i64,
    pub state: TaskState,
    pub result: TaskResult,
    pub error_message: String,
    pub output_data_json: String,
}

impl ExecutionRecord {
    /// Begin a new record at release time (spec §4.5 `execute_task` step 3).
    pub fn released(task: &ScheduledTask, actual_start_time_us: i64, context_switch_time_us: i64) -> Self {
        Self {
            task_id: task.task_id.clone(),
            worker_endpoint: task.worker_endpoint.clone(),
            mode: task.mode,
            scheduled_time_us: task.scheduled_time_us,
            wait_for_task_id: task.wait_for_task_id.clone(),
            deadline_us: task.deadline_us,
            estimated_duration_us: task.estimated_duration_us,
            max_retries: task.max_retries,
            critical: task.critical,
            actual_start_time_us,
            end_time_us: 0,
            context_switch_time_us,
            state: TaskState::Starting,
            result: TaskResult::Unknown,
            error_message: String::new(),
            output_data_json: String::new(),
        }
    }

    /// Synthesize a terminal record for a task that never released
    /// (spec §7 error kinds 2/3: transport error or worker rejection).
    pub fn synthetic_failure(
        task: &ScheduledTask,
        actual_start_time_us: i64,
        context_switch_time_us: i64,
        error_message: String,
    ) -> Self {
        let mut record = Self::released(task, actual_start_time_us, context_switch_time_us);
        record.end_time_us = actual_start_time_us;
        record.state = TaskState::Failed;
        record.result = TaskResult::Failure;
        record.error_message = error_message;
        record
    }
}

/// Aggregate context-switch bookkeeping rendered after completion
/// (spec §4.7 "per-task context-switch times and aggregate").
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ContextSwitchStats {
    pub count: usize,
    pub avg_us: f64,
    pub min_us: i64,
    pub max_us: i64,
    pub total_us: i64,
}

impl ContextSwitchStats {
    pub fn compute(history: &[ExecutionRecord]) -> Self {
        if history.is_empty() {
            return Self::default();
        }
        let values: Vec<i64> = history.iter().map(|r| r.context_switch_time_us).collect();
        let total_us: i64 = values.iter().sum();
        let min_us = *values.iter().min().unwrap();
        let max_us = *values.iter().max().unwrap();
        Self {
            count: values.len(),
            avg_us: total_us as f64 / values.len() as f64,
            min_us,
            max_us,
            total_us,
        }
    }
}
