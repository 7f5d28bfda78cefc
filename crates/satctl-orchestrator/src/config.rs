use std::str::FromStr;

use clap::Parser;
use satctl_rt::{RtConfig, RtPolicy};

use crate::error::{OrchestratorError, Result};

/// Command-line surface for the orchestrator binary (spec §6
/// "Orchestrator command-line").
#[derive(Debug, Parser)]
#[command(name = "satctl-orchestrator", about = "Schedule-driven task orchestrator")]
pub struct OrchestratorArgs {
    #[arg(long, default_value = "0.0.0.0:50050")]
    pub address: String,

    /// Path to the declarative schedule; the built-in test schedule is
    /// used when omitted.
    #[arg(long)]
    pub schedule: Option<String>,

    /// Opt into the legacy behavior of substituting the built-in test
    /// schedule on a parse/validation failure, instead of exiting
    /// non-zero (spec §4.2, §9 Open Questions).
    #[arg(long, default_value_t = false)]
    pub fallback_to_test_schedule: bool,

    /// Real-time scheduling policy for the driver thread.
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
pub struct OrchestratorConfig {
    pub listen_address: String,
    pub schedule_path: Option<String>,
    pub fallback_to_test_schedule: bool,
    pub driver_rt_config: RtConfig,
    /// The RPC server thread's RT config — one priority step below the
    /// driver's when RT is enabled (spec §5 "to avoid starving
    /// notifications by active releases").
    pub server_rt_config: RtConfig,
}

impl TryFrom<OrchestratorArgs> for OrchestratorConfig {
    type Error = OrchestratorError;

    fn try_from(args: OrchestratorArgs) -> Result<Self> {
        let policy = RtPolicy::from_str(&args.policy)
            .map_err(|e| OrchestratorError::Configuration(format!("--policy: {e}")))?;

        if !(1..=99).contains(&args.priority) {
            return Err(OrchestratorError::Configuration(format!(
                "--priority must be in 1..=99, got {}",
                args.priority
            )));
        }

        let driver_rt_config = RtConfig {
            policy,
            priority: args.priority,
            cpu_affinity: args.cpu_affinity,
            lock_memory: args.lock_memory,
            prefault_stack: false,
            stack_size: 8 * 1024 * 1024,
        };

        let mut server_rt_config = driver_rt_config.clone();
        if policy != RtPolicy::None {
            server_rt_config.priority = driver_rt_config.priority.saturating_sub(1).max(1);
        }

        Ok(OrchestratorConfig {
            listen_address: args.address,
            schedule_path: args.schedule,
            fallback_to_test_schedule: args.fallback_to_test_schedule,
            driver_rt_config,
            server_rt_config,
        })
    }
}
