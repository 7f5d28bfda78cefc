use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use satctl_proto::{proto, merge_dep_output, TaskResult, TaskState};
use satctl_schedule::{ScheduledTask, TaskMode, TaskSchedule};
use tracing::{debug, error, info, warn};

use crate::record::ExecutionRecord;
use crate::state::EngineState;

/// Bounded wait for a just-spawned executor to register itself in
/// `active_tasks` (spec §4.5 Phase 2 step 3).
const REGISTRATION_WAIT: Duration = Duration::from_millis(100);

/// Caller-supplied deadline every RPC in the control plane applies
/// (spec §4.3 "all RPCs carry a deadline of ≥ 5 s applied by the caller").
const RPC_DEADLINE: Duration = Duration::from_secs(5);

/// The hybrid timed+sequential scheduler driver (spec §4.5). One `Engine`
/// runs one schedule to completion. `schedule_start` is the monotonic
/// epoch every `ExecutionRecord` timestamp is measured relative to.
pub struct Engine {
    schedule: TaskSchedule,
    state: Mutex<EngineState>,
    /// Broadcasts on every active_tasks mutation: a task registered, a
    /// task removed, or a `task_completed` flag set. Phase 2's bounded and
    /// unbounded waits, and dependency waits, all block on this.
    task_end_cv: Condvar,
    /// Separate condition signalling "every task has reached a terminal
    /// state and every task has been dispatched" — what
    /// `wait_for_completion` blocks on.
    completion_cv: Condvar,
    running: AtomicBool,
    schedule_start: Instant,
    runtime: tokio::runtime::Handle,
}

impl Engine {
    pub fn new(schedule: TaskSchedule, runtime: tokio::runtime::Handle) -> Arc<Self> {
        Arc::new(Self {
            schedule,
            state: Mutex::new(EngineState::default()),
            task_end_cv: Condvar::new(),
            completion_cv: Condvar::new(),
            running: AtomicBool::new(true),
            schedule_start: Instant::now(),
            runtime,
        })
    }

    pub fn task_count(&self) -> usize {
        self.schedule.tasks.len()
    }

    fn now_us(&self) -> i64 {
        self.schedule_start.elapsed().as_micros() as i64
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spec §5 "shutdown ... unblocks every wait on the condition
    /// variable; the driver exits its loop at the next suspension point."
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.task_end_cv.notify_all();
        self.completion_cv.notify_all();
    }

    /// Spawns the driver thread and returns its handle. The driver thread
    /// itself only fans work out; it never runs a task's RPC inline.
    /// `rt_config`, if given, is applied to the driver thread itself before
    /// it starts dispatching (spec §5 "1 scheduler driver thread (may use
    /// RT policy)").
    pub fn run(self: &Arc<Self>, rt_config: Option<satctl_rt::RtConfig>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        std::thread::Builder::new()
            .name("satctl-driver".to_string())
            .spawn(move || engine.driver_loop(rt_config))
            .expect("failed to spawn scheduler driver thread")
    }

    fn driver_loop(self: Arc<Self>, rt_config: Option<satctl_rt::RtConfig>) {
        if let Some(rt_config) = rt_config {
            if let Err(report) = satctl_rt::apply(&rt_config) {
                warn!(?report, "driver thread rt config apply failed; proceeding best-effort");
            }
        }
        info!(tasks = self.schedule.tasks.len(), "scheduler driver starting");

        // Phase 1 — timed release fan-out (spec §4.5 Phase 1).
        for task in self.schedule.timed_tasks() {
            if !self.is_running() {
                break;
            }
            self.spawn_launcher(task.clone());
        }

        // Phase 2 — sequential chain, walked in schedule order.
        for task in self.schedule.sequential_tasks() {
            if !self.is_running() {
                break;
            }
            if let Some(dep) = &task.wait_for_task_id {
                if !self.wait_for_dependency(dep) {
                    // Shutdown requested while waiting; stop dispatching.
                    break;
                }
            }
            self.spawn_executor(task.clone());
            self.wait_until_registered(&task.task_id);
            self.wait_until_retired(&task.task_id);
        }

        self.wait_until_all_pending_settle();

        let stats = crate::record::ContextSwitchStats::compute(&self.history());
        info!(
            count = stats.count,
            avg_us = stats.avg_us,
            min_us = stats.min_us,
            max_us = stats.max_us,
            total_us = stats.total_us,
            "scheduler driver finished dispatching; all tasks settled"
        );
    }

    fn spawn_launcher(self: &Arc<Self>, task: ScheduledTask) {
        let release_at = self.schedule_start + Duration::from_micros(task.scheduled_time_us.max(0) as u64);
        {
            let mut state = self.state.lock().unwrap();
            state.released_count += 1;
            state.pending_tasks += 1;
        }
        let engine = Arc::clone(self);
        std::thread::Builder::new()
            .name(format!("launch-{}", task.task_id))
            .spawn(move || {
                let now = Instant::now();
                if release_at > now {
                    std::thread::sleep(release_at - now);
                }
                if engine.is_running() {
                    engine.execute_task(&task);
                }
            })
            .expect("failed to spawn timed-release launcher thread");
    }

    fn spawn_executor(self: &Arc<Self>, task: ScheduledTask) {
        {
            let mut state = self.state.lock().unwrap();
            state.released_count += 1;
            state.pending_tasks += 1;
        }
        let engine = Arc::clone(self);
        std::thread::Builder::new()
            .name(format!("exec-{}", task.task_id))
            .spawn(move || engine.execute_task(&task))
            .expect("failed to spawn sequential executor thread");
    }

    /// Blocks until `task_completed[dep] == true` or shutdown. Returns
    /// `false` if it returned because of shutdown rather than completion.
    fn wait_for_dependency(&self, dep: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        while self.is_running() && !state.task_completed.get(dep).copied().unwrap_or(false) {
            state = self.task_end_cv.wait(state).unwrap();
        }
        self.is_running()
    }

    fn wait_until_registered(&self, task_id: &str) {
        let mut state = self.state.lock().unwrap();
        let deadline = Instant::now() + REGISTRATION_WAIT;
        while self.is_running() && !state.active_tasks.contains_key(task_id) {
            let now = Instant::now();
            if now >= deadline {
                warn!(task_id, "executor did not register within the bounded wait");
                break;
            }
            let (guard, timeout) = self
                .task_end_cv
                .wait_timeout(state, deadline - now)
                .unwrap();
            state = guard;
            if timeout.timed_out() {
                break;
            }
        }
    }

    fn wait_until_retired(&self, task_id: &str) {
        let mut state = self.state.lock().unwrap();
        while self.is_running() && state.active_tasks.contains_key(task_id) {
            state = self.task_end_cv.wait(state).unwrap();
        }
    }

    fn wait_until_all_pending_settle(&self) {
        let mut state = self.state.lock().unwrap();
        while state.pending_tasks > 0 && self.is_running() {
            state = self.completion_cv.wait(state).unwrap();
        }
    }

    /// Blocks the caller until every task in the schedule has reached a
    /// terminal Execution Record (spec §4.5 "Completion semantics").
    pub fn wait_for_completion(&self) {
        let mut state = self.state.lock().unwrap();
        while self.is_running()
            && (state.pending_tasks > 0
                || (state.released_count as usize) < self.schedule.tasks.len())
        {
            state = self.completion_cv.wait(state).unwrap();
        }
    }

    pub fn history(&self) -> Vec<ExecutionRecord> {
        self.state.lock().unwrap().completed_tasks.clone()
    }

    /// The per-release driver (spec §4.5 `execute_task`), invoked from a
    /// launcher or executor thread — never from the driver thread itself.
    fn execute_task(&self, task: &ScheduledTask) {
        let actual_start_time_us = self.now_us();

        let context_switch_time_us = {
            let mut state = self.state.lock().unwrap();
            let context_switch_time_us = if state.completed_tasks.is_empty() {
                0
            } else {
                actual_start_time_us - state.last_task_end_time_us
            };
            let record = ExecutionRecord::released(task, actual_start_time_us, context_switch_time_us);
            state.active_tasks.insert(task.task_id.clone(), record);
            self.task_end_cv.notify_all();
            context_switch_time_us
        };
        debug!(task_id = %task.task_id, context_switch_time_us, "task released");

        let parameters_json = match self.build_parameters(task) {
            Ok(json) => json,
            Err(e) => {
                self.fail_release(task, actual_start_time_us, format!("failed to build parameters: {e}"));
                return;
            }
        };

        let request = proto::StartTaskRequest {
            task_id: task.task_id.clone(),
            scheduled_time_us: task.scheduled_time_us,
            deadline_us: task.deadline_us,
            parameters_json,
            rt_policy: proto::RtPolicy::from(task.rt_policy) as i32,
            rt_priority: task.rt_priority as u32,
            cpu_affinity: task.cpu_affinity,
        };

        match self.send_start_task(&task.worker_endpoint, request) {
            Ok(response) if response.success => {
                let mut state = self.state.lock().unwrap();
                if let Some(record) = state.active_tasks.get_mut(&task.task_id) {
                    record.state = TaskState::Running;
                }
            }
            Ok(response) => {
                self.fail_release(
                    task,
                    actual_start_time_us,
                    format!("worker rejected StartTask: {}", response.message),
                );
            }
            Err(e) => {
                self.fail_release(task, actual_start_time_us, format!("transport error: {e}"));
            }
        }
    }

    /// Merge a predecessor's stored output under `dep_output` for a
    /// SEQUENTIAL task that names one (spec §4.5 step 4, §9 "Output
    /// propagation").
    fn build_parameters(&self, task: &ScheduledTask) -> Result<String, serde_json::Error> {
        let Some(dep) = &task.wait_for_task_id else {
            return Ok(task.parameters_json.clone());
        };
        let dep_output = {
            let state = self.state.lock().unwrap();
            state.task_outputs.get(dep).cloned().unwrap_or_default()
        };
        merge_dep_output(&task.parameters_json, &dep_output)
    }

    fn send_start_task(
        &self,
        endpoint: &str,
        request: proto::StartTaskRequest,
    ) -> Result<proto::StartTaskResponse, String> {
        let endpoint = endpoint.to_string();
        self.runtime.block_on(async move {
            let channel_endpoint = satctl_proto::dial_address(&endpoint).map_err(|e| e.to_string())?;
            let channel = channel_endpoint.connect().await.map_err(|e| e.to_string())?;
            let mut client = satctl_proto::TaskServiceClient::new(channel);
            let mut grpc_request = tonic::Request::new(request);
            grpc_request.set_timeout(RPC_DEADLINE);
            client
                .start_task(grpc_request)
                .await
                .map(|r| r.into_inner())
                .map_err(|status| status.message().to_string())
        })
    }

    /// Spec §4.5 `execute_task` step 7: a release that never reaches
    /// RUNNING still produces a terminal record, so dependents downstream
    /// are not starved and the completion count stays accurate.
    fn fail_release(&self, task: &ScheduledTask, actual_start_time_us: i64, message: String) {
        error!(task_id = %task.task_id, error = %message, "task release failed");
        let end_time_us = self.now_us();
        let mut state = self.state.lock().unwrap();
        state.active_tasks.remove(&task.task_id);
        let mut record = ExecutionRecord::synthetic_failure(task, actual_start_time_us, 0, message);
        record.end_time_us = end_time_us;
        state.last_task_end_time_us = end_time_us;
        state.task_outputs.insert(task.task_id.clone(), String::new());
        state.task_completed.insert(task.task_id.clone(), true);
        state.completed_tasks.push(record);
        state.pending_tasks -= 1;
        let done = state.pending_tasks == 0;
        drop(state);
        self.task_end_cv.notify_all();
        if done {
            self.completion_cv.notify_all();
        }
    }

    /// Spec §4.5 `on_task_end`, invoked from the gRPC server thread when a
    /// `NotifyTaskEnd` arrives. Returns `false` when the notification was
    /// discarded (spec §7 error kind 7 "unknown-task notification", and
    /// property P5 "idempotent notifications").
    pub fn on_task_end(&self, notification: &proto::TaskEndNotification) -> bool {
        // Timestamp first, so the measurement excludes mutex contention
        // (spec §4.5 step 1, §5 "must not perform I/O while holding it").
        let end_time_us = self.now_us();

        let result = match TaskResult::try_from(notification.result) {
            Ok(r) => r,
            Err(_) => TaskResult::Unknown,
        };
        let state_for_result = match result {
            TaskResult::Success => TaskState::Completed,
            TaskResult::Cancelled => TaskState::Cancelled,
            TaskResult::Failure | TaskResult::Unknown => TaskState::Failed,
        };

        let mut state = self.state.lock().unwrap();
        let Some(mut record) = state.active_tasks.remove(&notification.task_id) else {
            warn!(task_id = %notification.task_id, "discarding NotifyTaskEnd for an unregistered or already-completed task");
            return false;
        };

        record.end_time_us = end_time_us;
        record.state = state_for_result;
        record.result = result;
        record.error_message = notification.error_message.clone();
        record.output_data_json = notification.output_data_json.clone();

        state.last_task_end_time_us = end_time_us;
        state
            .task_outputs
            .insert(notification.task_id.clone(), notification.output_data_json.clone());
        state.task_completed.insert(notification.task_id.clone(), true);
        state.completed_tasks.push(record);
        state.pending_tasks -= 1;
        let done = state.pending_tasks == 0;
        drop(state);

        self.task_end_cv.notify_all();
        if done {
            self.completion_cv.notify_all();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use satctl_rt::RtPolicy;

    fn task(id: &str, mode: TaskMode, wait_for: Option<&str>) -> ScheduledTask {
        ScheduledTask {
            task_id: id.to_string(),
            worker_endpoint: "localhost:50051".to_string(),
            mode,
            scheduled_time_us: 0,
            wait_for_task_id: wait_for.map(str::to_string),
            deadline_us: 1_000_000,
            estimated_duration_us: 500_000,
            rt_policy: RtPolicy::None,
            rt_priority: 50,
            cpu_affinity: -1,
            max_retries: 0,
            critical: false,
            parameters_json: format!(r#"{{"task_id":"{id}"}}"#),
        }
    }

    fn schedule(tasks: Vec<ScheduledTask>) -> TaskSchedule {
        TaskSchedule {
            name: "test".to_string(),
            description: String::new(),
            start_us: 0,
            end_us: 10_000_000,
            tick_duration_us: 1_000,
            tasks,
        }
    }

    fn test_runtime() -> tokio::runtime::Handle {
        // Leaked deliberately: each test needs a live runtime for the
        // lifetime of the engine under test, and these are few and short.
        let rt = Box::leak(Box::new(tokio::runtime::Runtime::new().unwrap()));
        rt.handle().clone()
    }

    #[test]
    fn unregistered_notification_is_discarded() {
        let engine = Engine::new(schedule(vec![task("a", TaskMode::Sequential, None)]), test_runtime());
        let notification = proto::TaskEndNotification {
            task_id: "ghost".to_string(),
            result: proto::TaskResult::Success as i32,
            start_time_us: 0,
            end_time_us: 0,
            execution_duration_us: 0,
            error_message: String::new(),
            output_data_json: String::new(),
        };
        assert!(!engine.on_task_end(&notification));
        assert!(engine.history().is_empty());
    }

    #[test]
    fn duplicate_notification_after_completion_is_discarded() {
        let engine = Engine::new(schedule(vec![task("a", TaskMode::Sequential, None)]), test_runtime());
        {
            let mut state = engine.state.lock().unwrap();
            state.active_tasks.insert(
                "a".to_string(),
                ExecutionRecord::released(&task("a", TaskMode::Sequential, None), 0, 0),
            );
            state.pending_tasks = 1;
        }
        let notification = proto::TaskEndNotification {
            task_id: "a".to_string(),
            result: proto::TaskResult::Success as i32,
            start_time_us: 0,
            end_time_us: 10,
            execution_duration_us: 10,
            error_message: String::new(),
            output_data_json: r#"{"ok":true}"#.to_string(),
        };
        assert!(engine.on_task_end(&notification));
        assert_eq!(engine.history().len(), 1);

        // A duplicate arriving after the task is already in history must
        // leave the history unchanged (property P5).
        assert!(!engine.on_task_end(&notification));
        assert_eq!(engine.history().len(), 1);
    }

    #[test]
    fn failed_release_still_unblocks_a_dependent() {
        let engine = Engine::new(
            schedule(vec![
                task("a", TaskMode::Sequential, None),
                task("b", TaskMode::Sequential, Some("a")),
            ]),
            test_runtime(),
        );
        {
            let mut state = engine.state.lock().unwrap();
            state.pending_tasks = 1;
        }
        engine.fail_release(&task("a", TaskMode::Sequential, None), 0, "unreachable".to_string());

        let state = engine.state.lock().unwrap();
        assert_eq!(state.task_completed.get("a"), Some(&true));
        assert_eq!(state.pending_tasks, 0);
        let history = &state.completed_tasks;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].state, TaskState::Failed);
        assert_eq!(history[0].result, TaskResult::Failure);
    }

    #[test]
    fn build_parameters_merges_predecessor_output() {
        let engine = Engine::new(
            schedule(vec![
                task("a", TaskMode::Sequential, None),
                task("b", TaskMode::Sequential, Some("a")),
            ]),
            test_runtime(),
        );
        {
            let mut state = engine.state.lock().unwrap();
            state.task_outputs.insert("a".to_string(), r#"{"result":42}"#.to_string());
        }
        let merged = engine
            .build_parameters(&task("b", TaskMode::Sequential, Some("a")))
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&merged).unwrap();
        assert_eq!(parsed["dep_output"]["result"], 42);
    }

    #[test]
    fn wait_for_completion_returns_once_every_task_is_dispatched_and_settled() {
        let engine = Engine::new(schedule(vec![task("a", TaskMode::Sequential, None)]), test_runtime());
        {
            let mut state = engine.state.lock().unwrap();
            state.released_count = 1;
            state.pending_tasks = 1;
        }
        engine.fail_release(&task("a", TaskMode::Sequential, None), 0, "boom".to_string());
        engine.wait_for_completion();
        assert_eq!(engine.history().len(), 1);
    }
}
