use satctl_rt::RtPolicy;
use serde::{Deserialize, Serialize};

/// How a task is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskMode {
    /// Released as soon as its `wait_for_task_id` predecessor completes (or
    /// immediately if it has none).
    Sequential,
    /// Released at an absolute offset from the schedule's start.
    Timed,
}

/// An immutable task entry loaded from a schedule, as described in
/// spec §3 "Scheduled Task".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub task_id: String,
    pub worker_endpoint: String,
    pub mode: TaskMode,
    /// Release offset from schedule start, in microseconds. Ignored for
    /// `Sequential` tasks.
    pub scheduled_time_us: i64,
    /// Predecessor task id, for `Sequential` tasks only.
    pub wait_for_task_id: Option<String>,
    pub deadline_us: i64,
    pub estimated_duration_us: i64,
    pub rt_policy: RtPolicy,
    pub rt_priority: u8,
    /// -1 means no affinity.
    pub cpu_affinity: i32,
    /// Informational only; the engine itself never retries a task.
    pub max_retries: u32,
    /// Informational marker surfaced in the execution summary.
    pub critical: bool,
    /// Opaque JSON object, always containing the injected `"task_id"` key.
    pub parameters_json: String,
}

/// The full declarative schedule: a time horizon, a tick duration, and an
/// ordered sequence of tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSchedule {
    pub name: String,
    pub description: String,
    pub start_us: i64,
    pub end_us: i64,
    pub tick_duration_us: i64,
    pub tasks: Vec<ScheduledTask>,
}

impl TaskSchedule {
    /// Tasks ordered by `scheduled_time_us`, the sort key spec §3 defines
    /// for internal use. `Sequential` tasks (whose `scheduled_time_us` is
    /// not meaningful) sort by their position in the source schedule among
    /// themselves — `sort_by_key` is stable, so ties (including all-zero
    /// sequential entries) preserve input order.
    pub fn tasks_by_scheduled_time(&self) -> Vec<&ScheduledTask> {
        let mut tasks: Vec<&ScheduledTask> = self.tasks.iter().collect();
        tasks.sort_by_key(|t| t.scheduled_time_us);
        tasks
    }

    pub fn timed_tasks(&self) -> impl Iterator<Item = &ScheduledTask> {
        self.tasks.iter().filter(|t| t.mode == TaskMode::Timed)
    }

    /// Sequential tasks, in schedule (file) order — the order Phase 2 of
    /// the engine walks them in.
    pub fn sequential_tasks(&self) -> impl Iterator<Item = &ScheduledTask> {
        self.tasks.iter().filter(|t| t.mode == TaskMode::Sequential)
    }

    pub fn task(&self, task_id: &str) -> Option<&ScheduledTask> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }
}
