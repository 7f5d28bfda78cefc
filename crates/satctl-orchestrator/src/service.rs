use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use satctl_proto::proto;
use tonic::{Request, Response, Status};
use tracing::info;

use crate::engine::Engine;

fn now_wall_clock_us() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as i64
}

/// Thin gRPC adapter in front of [`Engine`] (spec §4.6): copies the
/// incoming notification into a plain record and forwards to
/// `on_task_end`. Holds no scheduling state of its own.
pub struct OrchestratorServiceImpl {
    engine: Arc<Engine>,
}

impl OrchestratorServiceImpl {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}

#[tonic::async_trait]
impl satctl_proto::OrchestratorService for OrchestratorServiceImpl {
    async fn notify_task_end(
        &self,
        request: Request<proto::TaskEndNotification>,
    ) -> Result<Response<proto::TaskEndResponse>, Status> {
        let notification = request.into_inner();
        info!(task_id = %notification.task_id, result = notification.result, "NotifyTaskEnd received");

        let processed = self.engine.on_task_end(&notification);
        let message = if processed {
            "recorded".to_string()
        } else {
            "discarded: unknown or already-completed task".to_string()
        };

        // Spec §4.6: "always returns acknowledged = true on successful
        // receipt" — the RPC itself succeeded regardless of whether the
        // notification was acted on.
        Ok(Response::new(proto::TaskEndResponse {
            acknowledged: true,
            message,
        }))
    }

    async fn health_check(
        &self,
        _request: Request<proto::HealthCheckRequest>,
    ) -> Result<Response<proto::HealthCheckResponse>, Status> {
        Ok(Response::new(proto::HealthCheckResponse {
            healthy: true,
            status: "running".to_string(),
            // Spec §9 Open Questions: health uses the wall clock, scheduling
            // uses the monotonic clock — deliberately not `Engine::now_us`.
            timestamp_us: now_wall_clock_us(),
        }))
    }
}
