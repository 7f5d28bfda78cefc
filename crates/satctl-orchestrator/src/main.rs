use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use satctl_orchestrator::{render_summary, Engine, OrchestratorArgs, OrchestratorConfig, OrchestratorServiceImpl};
use satctl_schedule::TaskSchedule;
use tonic::transport::Server;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = OrchestratorArgs::parse();
    let config = match OrchestratorConfig::try_from(args) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration error");
            return ExitCode::FAILURE;
        }
    };

    let schedule = match load_schedule(&config) {
        Ok(schedule) => schedule,
        Err(e) => {
            error!(error = %e, "failed to load schedule");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = run(config, schedule).await {
        error!(error = %e, "orchestrator exited with an error");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

/// Spec §4.2: parse errors surface with their source location rather than
/// silently substituting the built-in test schedule. `--fallback-to-test-schedule`
/// opts back into the legacy behavior.
fn load_schedule(config: &OrchestratorConfig) -> anyhow::Result<TaskSchedule> {
    let Some(path) = &config.schedule_path else {
        info!("no --schedule given, using the built-in test schedule");
        return Ok(satctl_schedule::create_test_schedule());
    };

    match satctl_schedule::load_from_path(path) {
        Ok(schedule) => Ok(schedule),
        Err(e) if config.fallback_to_test_schedule => {
            warn!(error = %e, path, "schedule failed to load; falling back to the built-in test schedule");
            Ok(satctl_schedule::create_test_schedule())
        }
        Err(e) => Err(e.into()),
    }
}

async fn run(config: OrchestratorConfig, schedule: TaskSchedule) -> anyhow::Result<()> {
    let listen_address = config.listen_address.clone();
    let task_count = schedule.tasks.len();

    let engine = Engine::new(schedule, tokio::runtime::Handle::current());
    let driver_handle = engine.run(Some(config.driver_rt_config.clone()));

    // Spec §5: the RPC server thread runs one priority step below the
    // driver when RT is enabled. Tokio's multi-threaded runtime pools
    // tasks across worker threads, so this is an approximation: it
    // configures whichever OS thread is executing this async task at the
    // moment `apply` runs, not a thread dedicated solely to serving.
    if config.server_rt_config.policy != satctl_rt::RtPolicy::None || config.server_rt_config.cpu_affinity >= 0 {
        if let Err(report) = satctl_rt::apply(&config.server_rt_config) {
            warn!(?report, "server thread rt config apply failed; proceeding best-effort");
        }
    }

    let service = OrchestratorServiceImpl::new(Arc::clone(&engine));
    let addr = listen_address.parse()?;
    info!(%addr, tasks = task_count, "Orchestrator listening");

    let server_engine = Arc::clone(&engine);
    tokio::spawn(async move {
        if let Err(e) = Server::builder()
            .add_service(satctl_proto::OrchestratorServiceServer::new(service))
            .serve(addr)
            .await
        {
            error!(error = %e, "gRPC server error");
            server_engine.stop();
        }
    });

    tokio::select! {
        _ = shutdown_signal() => {
            info!("shutdown signal received");
            engine.stop();
        }
        _ = tokio::task::spawn_blocking({
            let engine = Arc::clone(&engine);
            move || engine.wait_for_completion()
        }) => {
            info!("schedule complete");
        }
    }

    // Best-effort join; the driver exits promptly at its next suspension
    // point once `engine.stop()` has been called (spec §5 shutdown rule).
    let _ = driver_handle.join();

    let history = engine.history();
    println!("{}", render_summary(&history));
    info!(
        total = history.len(),
        expected = task_count,
        "execution complete"
    );
    Ok(())
}

async fn shutdown_signal() {
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
}
