use std::sync::Arc;

use satctl_proto::proto;
use tonic::{Request, Response, Status};
use tracing::info;

use crate::worker::Worker;

/// Thin gRPC adapter in front of [`Worker`]. Holds no state of its own.
pub struct TaskServiceImpl {
    worker: Arc<Worker>,
}

impl TaskServiceImpl {
    pub fn new(worker: Arc<Worker>) -> Self {
        Self { worker }
    }
}

#[tonic::async_trait]
impl satctl_proto::TaskService for TaskServiceImpl {
    async fn start_task(
        &self,
        request: Request<proto::StartTaskRequest>,
    ) -> Result<Response<proto::StartTaskResponse>, Status> {
        let request = request.into_inner();
        info!(task_id = %request.task_id, "StartTask received");
        let response = self.worker.start_task(request);
        Ok(Response::new(response))
    }

    async fn stop_task(
        &self,
        request: Request<proto::StopTaskRequest>,
    ) -> Result<Response<proto::StopTaskResponse>, Status> {
        info!(task_id = %request.into_inner().task_id, "StopTask received");
        Ok(Response::new(self.worker.stop_task()))
    }

    async fn get_task_status(
        &self,
        _request: Request<proto::TaskStatusRequest>,
    ) -> Result<Response<proto::TaskStatusResponse>, Status> {
        Ok(Response::new(self.worker.status()))
    }
}
