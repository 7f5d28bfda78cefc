use clap::Parser;
use satctl_rt::{RtConfig, RtPolicy};
use std::str::FromStr;

use crate::error::{Result, WorkerError};

/// Command-line surface for a worker binary (spec §6 "Worker command-line").
#[derive(Debug, Parser)]
#[command(name = "satctl-worker", about = "Task Worker control-plane endpoint")]
pub struct WorkerArgs {
    /// task_id this worker serves.
    #[arg(long)]
    pub name: String,

    /// Listen endpoint, e.g. 0.0.0.0:50061.
    #[arg(long)]
    pub address: String,

    /// Orchestrator endpoint to send NotifyTaskEnd to.
    #[arg(long, env = "ORCHESTRATOR_ADDR")]
    pub orchestrator: String,

    /// Default real-time scheduling policy, overridden per invocation by
    /// the StartTask request.
    #[arg(long, default_value = "none")]
    pub policy: String,

    #[arg(long, default_value_t = 50)]
    pub priority: u8,

    #[arg(long = "cpu-affinity", default_value_t = -1)]
    pub cpu_affinity: i32,

    #[arg(long = "lock-memory", default_value_t = false)]
    pub lock_memory: bool,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub task_id: String,
    pub listen_address: String,
    pub orchestrator_address: String,
    pub default_rt_config: RtConfig,
}

impl TryFrom<WorkerArgs> for WorkerConfig {
    type Error = WorkerError;

    fn try_from(args: WorkerArgs) -> Result<Self> {
        let policy = RtPolicy::from_str(&args.policy)
            .map_err(|e| WorkerError::Configuration(format!("--policy: {e}")))?;

        if !(1..=99).contains(&args.priority) {
            return Err(WorkerError::Configuration(format!(
                "--priority must be in 1..=99, got {}",
                args.priority
            )));
        }

        Ok(WorkerConfig {
            task_id: args.name,
            listen_address: args.address,
            orchestrator_address: args.orchestrator,
            default_rt_config: RtConfig {
                policy,
                priority: args.priority,
                cpu_affinity: args.cpu_affinity,
                lock_memory: args.lock_memory,
                prefault_stack: false,
                stack_size: 8 * 1024 * 1024,
            },
        })
    }
}
