use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("schedule error: {0}")]
    Schedule(#[from] satctl_schedule::ScheduleError),

    #[error("transport error talking to worker {task_id} at {endpoint}: {source}")]
    Transport {
        task_id: String,
        endpoint: String,
        #[source]
        source: TransportCause,
    },

    #[error("worker rejected StartTask for {task_id}: {message}")]
    WorkerRejected { task_id: String, message: String },
}

/// A flattened transport failure cause (spec §7 error kind 2 "RPC transport
/// error"), covering both connection setup and RPC-in-flight failures so
/// `execute_task` can report one error string regardless of which stage
/// failed.
#[derive(Debug, Error)]
pub enum TransportCause {
    #[error("{0}")]
    Connect(String),
    #[error("{0}")]
    Rpc(String),
}
