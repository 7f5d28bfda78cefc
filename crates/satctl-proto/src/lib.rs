//! Generated gRPC types for the `TaskService`/`OrchestratorService` wire
//! protocol, plus the domain-facing enums and conversions every other
//! crate uses instead of touching `prost`-generated structs directly.

use satctl_rt::RtPolicy as DomainRtPolicy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod proto {
    tonic::include_proto!("satctl.v1");
}

pub use proto::{
    orchestrator_service_client::OrchestratorServiceClient,
    orchestrator_service_server::{OrchestratorService, OrchestratorServiceServer},
    task_service_client::TaskServiceClient,
    task_service_server::{TaskService, TaskServiceServer},
    HealthCheckRequest, HealthCheckResponse, StartTaskRequest, StartTaskResponse, StopTaskRequest,
    StopTaskResponse, TaskEndNotification, TaskEndResponse, TaskStatusRequest, TaskStatusResponse,
};

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("unknown wire enum value {0} for {1}")]
    UnknownEnumValue(i32, &'static str),
}

/// The worker-side lifecycle state (spec §4.4), shared between the worker
/// (authoritative) and the orchestrator (shadow copy in its execution
/// record).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Idle,
    Starting,
    Running,
    Completed,
    Failed,
    Cancelled,
    Stopped,
}

impl From<TaskState> for proto::TaskState {
    fn from(s: TaskState) -> Self {
        match s {
            TaskState::Idle => proto::TaskState::Idle,
            TaskState::Starting => proto::TaskState::Starting,
            TaskState::Running => proto::TaskState::Running,
            TaskState::Completed => proto::TaskState::Completed,
            TaskState::Failed => proto::TaskState::Failed,
            TaskState::Cancelled => proto::TaskState::Cancelled,
            TaskState::Stopped => proto::TaskState::Stopped,
        }
    }
}

impl TryFrom<i32> for TaskState {
    type Error = ConversionError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match proto::TaskState::try_from(value)
            .map_err(|_| ConversionError::UnknownEnumValue(value, "TaskState"))?
        {
            proto::TaskState::Idle => Ok(TaskState::Idle),
            proto::TaskState::Starting => Ok(TaskState::Starting),
            proto::TaskState::Running => Ok(TaskState::Running),
            proto::TaskState::Completed => Ok(TaskState::Completed),
            proto::TaskState::Failed => Ok(TaskState::Failed),
            proto::TaskState::Cancelled => Ok(TaskState::Cancelled),
            proto::TaskState::Stopped => Ok(TaskState::Stopped),
        }
    }
}

/// The terminal outcome of a task invocation (spec §3 "Task Execution
/// Record").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskResult {
    Unknown,
    Success,
    Failure,
    Cancelled,
}

impl From<TaskResult> for proto::TaskResult {
    fn from(r: TaskResult) -> Self {
        match r {
            TaskResult::Unknown => proto::TaskResult::Unknown,
            TaskResult::Success => proto::TaskResult::Success,
            TaskResult::Failure => proto::TaskResult::Failure,
            TaskResult::Cancelled => proto::TaskResult::Cancelled,
        }
    }
}

impl TryFrom<i32> for TaskResult {
    type Error = ConversionError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match proto::TaskResult::try_from(value)
            .map_err(|_| ConversionError::UnknownEnumValue(value, "TaskResult"))?
        {
            proto::TaskResult::Unknown => Ok(TaskResult::Unknown),
            proto::TaskResult::Success => Ok(TaskResult::Success),
            proto::TaskResult::Failure => Ok(TaskResult::Failure),
            proto::TaskResult::Cancelled => Ok(TaskResult::Cancelled),
        }
    }
}

impl From<DomainRtPolicy> for proto::RtPolicy {
    fn from(p: DomainRtPolicy) -> Self {
        match p {
            DomainRtPolicy::None => proto::RtPolicy::None,
            DomainRtPolicy::Fifo => proto::RtPolicy::Fifo,
            DomainRtPolicy::Rr => proto::RtPolicy::Rr,
            DomainRtPolicy::Deadline => proto::RtPolicy::Deadline,
        }
    }
}

/// Convert the wire `RtPolicy` enum value into the domain type used by
/// `satctl-rt`.
pub fn rt_policy_from_wire(value: i32) -> Result<DomainRtPolicy, ConversionError> {
    match proto::RtPolicy::try_from(value)
        .map_err(|_| ConversionError::UnknownEnumValue(value, "RtPolicy"))?
    {
        proto::RtPolicy::None => Ok(DomainRtPolicy::None),
        proto::RtPolicy::Fifo => Ok(DomainRtPolicy::Fifo),
        proto::RtPolicy::Rr => Ok(DomainRtPolicy::Rr),
        proto::RtPolicy::Deadline => Ok(DomainRtPolicy::Deadline),
    }
}

/// Accepts either a bare `host:port` or a fully-qualified `http(s)://...`
/// endpoint, matching the shapes used across the worker and orchestrator
/// CLIs and schedule files. Shared here so neither side re-implements the
/// `http://` default-scheme rule differently.
pub fn dial_address(address: &str) -> Result<tonic::transport::Endpoint, tonic::transport::Error> {
    let uri = if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{address}")
    };
    tonic::transport::Endpoint::from_shared(uri)
}

/// Merge a predecessor's `output_data_json` into a successor's
/// `parameters_json` under the `"dep_output"` key, per spec §9 "Output
/// propagation" — the one shape in the wire protocol that must be
/// preserved exactly.
pub fn merge_dep_output(
    parameters_json: &str,
    predecessor_output_json: &str,
) -> Result<String, serde_json::Error> {
    let mut params: serde_json::Value = serde_json::from_str(parameters_json)?;
    let dep_output: serde_json::Value = if predecessor_output_json.trim().is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_str(predecessor_output_json)?
    };
    if let serde_json::Value::Object(map) = &mut params {
        map.insert("dep_output".to_string(), dep_output);
    }
    serde_json::to_string(&params)
}
