use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{SystemTime, UNIX_EPOCH};

use satctl_proto::{proto, TaskResult, TaskState};
use tracing::{debug, error, warn};

use crate::callback::TaskCallback;
use crate::config::WorkerConfig;

fn now_wall_clock_us() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as i64
}

struct Shared {
    state: TaskState,
    start_time_us: i64,
    cancel_requested: Arc<AtomicBool>,
    execution_thread: Option<JoinHandle<()>>,
}

impl Default for Shared {
    fn default() -> Self {
        Self {
            state: TaskState::Idle,
            start_time_us: 0,
            cancel_requested: Arc::new(AtomicBool::new(false)),
            execution_thread: None,
        }
    }
}

/// Hosts exactly one user computation. `TaskService` (the gRPC adapter in
/// `service.rs`) drives this type; this type owns the lifecycle state
/// machine of spec §4.4.
pub struct Worker {
    config: WorkerConfig,
    callback: Arc<dyn TaskCallback>,
    runtime: tokio::runtime::Handle,
    shared: Mutex<Shared>,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        callback: Arc<dyn TaskCallback>,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        Self {
            config,
            callback,
            runtime,
            shared: Mutex::new(Shared::default()),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.config.task_id
    }

    /// Spec §4.4 rule 1: the server thread never runs the computation
    /// itself; a previous execution thread, if any, is joined before a
    /// new one is spawned.
    pub fn start_task(self: &Arc<Self>, request: proto::StartTaskRequest) -> proto::StartTaskResponse {
        let mut guard = self.shared.lock().unwrap();
        if guard.state != TaskState::Idle {
            return proto::StartTaskResponse {
                success: false,
                message: format!("worker busy (state={:?})", guard.state),
                task_id: request.task_id,
                actual_start_time_us: 0,
            };
        }

        guard.state = TaskState::Starting;
        let previous = guard.execution_thread.take();
        drop(guard);
        if let Some(handle) = previous {
            // The previous thread only reaches IDLE after it has already
            // returned, so this join does not block a fresh release.
            let _ = handle.join();
        }

        let cancel_requested = Arc::new(AtomicBool::new(false));
        let rt_config = self.rt_config_for(&request);
        let start_time_us = now_wall_clock_us();

        let handle = self.spawn_execution_thread(
            request.task_id.clone(),
            request.parameters_json.clone(),
            rt_config,
            Arc::clone(&cancel_requested),
        );

        let mut guard = self.shared.lock().unwrap();
        guard.execution_thread = Some(handle);
        guard.cancel_requested = cancel_requested;
        guard.start_time_us = start_time_us;
        drop(guard);

        proto::StartTaskResponse {
            success: true,
            message: "accepted".to_string(),
            task_id: request.task_id,
            actual_start_time_us: start_time_us,
        }
    }

    /// Spec §4.4 rule 5: sets a cooperative cancellation flag; never
    /// forcibly terminates the execution thread. Idempotent.
    pub fn stop_task(&self) -> proto::StopTaskResponse {
        let guard = self.shared.lock().unwrap();
        guard.cancel_requested.store(true, Ordering::Relaxed);
        proto::StopTaskResponse {
            success: true,
            message: "cancellation requested".to_string(),
        }
    }

    pub fn status(&self) -> proto::TaskStatusResponse {
        let guard = self.shared.lock().unwrap();
        let elapsed_time_us = if guard.state == TaskState::Idle {
            0
        } else {
            now_wall_clock_us() - guard.start_time_us
        };
        proto::TaskStatusResponse {
            task_id: self.config.task_id.clone(),
            state: proto::TaskState::from(guard.state) as i32,
            start_time_us: guard.start_time_us,
            elapsed_time_us,
            cpu_usage_percent: 0.0,
            memory_usage_bytes: 0,
        }
    }

    fn rt_config_for(&self, request: &proto::StartTaskRequest) -> satctl_rt::RtConfig {
        match satctl_proto::rt_policy_from_wire(request.rt_policy) {
            Ok(policy) => satctl_rt::RtConfig {
                policy,
                priority: request.rt_priority.min(99) as u8,
                cpu_affinity: request.cpu_affinity,
                lock_memory: self.config.default_rt_config.lock_memory,
                prefault_stack: self.config.default_rt_config.prefault_stack,
                stack_size: self.config.default_rt_config.stack_size,
            },
            Err(_) => self.config.default_rt_config.clone(),
        }
    }

    fn spawn_execution_thread(
        self: &Arc<Self>,
        task_id: String,
        parameters_json: String,
        rt_config: satctl_rt::RtConfig,
        cancel_requested: Arc<AtomicBool>,
    ) -> JoinHandle<()> {
        let worker = Arc::clone(self);
        std::thread::Builder::new()
            .name(format!("exec-{task_id}"))
            .spawn(move || worker.run_execution(task_id, parameters_json, rt_config, cancel_requested))
            .expect("failed to spawn execution thread")
    }

    fn run_execution(
        &self,
        task_id: String,
        parameters_json: String,
        rt_config: satctl_rt::RtConfig,
        cancel_requested: Arc<AtomicBool>,
    ) {
        // Spec §4.4 rule 2: failure to apply RT config is logged, not
        // fatal; the task still runs under the default scheduler.
        if let Err(report) = satctl_rt::apply(&rt_config) {
            warn!(?report, task_id, "rt config apply failed; proceeding best-effort");
        }

        {
            let mut guard = self.shared.lock().unwrap();
            guard.state = TaskState::Running;
        }

        let start_time_us = { self.shared.lock().unwrap().start_time_us };
        // Spec §4.4 rule 3: "throws/panics" map to FAILURE, never propagate
        // out of the execution thread (that would leave the worker stuck
        // RUNNING forever with no NotifyTaskEnd ever sent).
        let callback = Arc::clone(&self.callback);
        let params_for_panic = parameters_json.clone();
        let outcome = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            callback.execute(&params_for_panic, &cancel_requested)
        })) {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_message(&panic);
                error!(task_id, message, "user callback panicked");
                crate::callback::CallbackOutcome::failure(format!("panic: {message}"))
            }
        };
        let end_time_us = now_wall_clock_us();

        let new_state = match outcome.result {
            TaskResult::Success => TaskState::Completed,
            TaskResult::Cancelled => TaskState::Cancelled,
            TaskResult::Failure | TaskResult::Unknown => TaskState::Failed,
        };

        debug!(task_id, ?new_state, "execution finished");

        let notification = proto::TaskEndNotification {
            task_id: task_id.clone(),
            result: proto::TaskResult::from(outcome.result) as i32,
            start_time_us,
            end_time_us,
            execution_duration_us: end_time_us - start_time_us,
            error_message: outcome.error_message.clone().unwrap_or_default(),
            output_data_json: outcome.output_json,
        };

        // Spec §4.4 rule 4: exactly one NotifyTaskEnd; delivery failure is
        // logged, never retried.
        if let Err(e) = self.notify_orchestrator(notification) {
            error!(task_id, error = %e, "failed to deliver NotifyTaskEnd");
        }

        let mut guard = self.shared.lock().unwrap();
        guard.state = TaskState::Idle;
    }

    fn notify_orchestrator(&self, notification: proto::TaskEndNotification) -> Result<(), String> {
        let address = self.config.orchestrator_address.clone();
        self.runtime.block_on(async move {
            let endpoint = satctl_proto::dial_address(&address).map_err(|e| e.to_string())?;
            let channel = endpoint.connect().await.map_err(|e| e.to_string())?;
            let mut client = satctl_proto::OrchestratorServiceClient::new(channel);
            let mut request = tonic::Request::new(notification);
            request.set_timeout(std::time::Duration::from_secs(5));
            client
                .notify_task_end(request)
                .await
                .map(|_| ())
                .map_err(|status| status.message().to_string())
        })
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
