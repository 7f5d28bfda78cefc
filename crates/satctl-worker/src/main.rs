use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use satctl_worker::{DemoCallback, TaskServiceImpl, Worker, WorkerArgs, WorkerConfig};
use tonic::transport::Server;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = WorkerArgs::parse();
    let config = match WorkerConfig::try_from(args) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration error");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = run(config).await {
        error!(error = %e, "worker exited with an error");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn run(config: WorkerConfig) -> anyhow::Result<()> {
    let listen_address = config.listen_address.clone();
    let task_id = config.task_id.clone();

    let worker = Arc::new(Worker::new(
        config,
        Arc::new(DemoCallback),
        tokio::runtime::Handle::current(),
    ));
    let service = TaskServiceImpl::new(Arc::clone(&worker));

    let addr = listen_address.parse()?;
    info!(task_id, %addr, "Task Worker listening");

    Server::builder()
        .add_service(satctl_proto::TaskServiceServer::new(service))
        .serve_with_shutdown(addr, shutdown_signal(Arc::clone(&worker)))
        .await?;

    info!(task_id, "Task Worker stopped");
    Ok(())
}

/// Waits for SIGINT/SIGTERM, requests a cooperative stop of any
/// in-progress invocation, then lets the server drain (spec §4.4
/// ambient process shape: "installs a single-shot SIGINT/SIGTERM handler
/// ... that calls Worker::stop() then exits 0").
async fn shutdown_signal(worker: Arc<Worker>) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received, requesting cooperative stop");
    let _ = worker.stop_task();
}
