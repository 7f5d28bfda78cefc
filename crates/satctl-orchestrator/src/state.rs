use std::collections::HashMap;

use crate::record::ExecutionRecord;

/// Everything the engine mutates, behind the single coarse mutex spec §5
/// calls for ("one mutex across all scheduler state ... acceptable given
/// the control-plane traffic volume").
#[derive(Default)]
pub(crate) struct EngineState {
    pub active_tasks: HashMap<String, ExecutionRecord>,
    pub completed_tasks: Vec<ExecutionRecord>,
    pub task_outputs: HashMap<String, String>,
    pub task_completed: HashMap<String, bool>,
    pub last_task_end_time_us: i64,
    /// How many tasks have ever been released; distinguishes "the first
    /// task" (context_switch_time_us forced to 0) from every later one.
    pub released_count: u64,
    /// Tasks released but not yet in a terminal state. Reaching zero after
    /// every task has been dispatched is the engine's completion signal.
    pub pending_tasks: i64,
}
