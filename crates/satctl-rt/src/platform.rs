//! OS-specific backing for the operations in `lib.rs`. Linux is the only
//! target that can actually apply real-time scheduling; every other target
//! reports [`RtError::Unsupported`] rather than panicking, so a worker
//! built for development on macOS still runs — just without RT guarantees.

use crate::{RtError, RtPolicy, Result};

#[cfg(target_os = "linux")]
mod linux {
    use super::*;

    fn sched_policy_const(policy: RtPolicy) -> Result<libc::c_int> {
        match policy {
            RtPolicy::Fifo => Ok(libc::SCHED_FIFO),
            RtPolicy::Rr => Ok(libc::SCHED_RR),
            RtPolicy::None => Ok(libc::SCHED_OTHER),
            // SCHED_DEADLINE has no libc constant and a kernel-specific
            // syscall ABI (sched_setattr); not wired up.
            RtPolicy::Deadline => Err(RtError::Unsupported(
                "SCHED_DEADLINE requires sched_setattr(2), not exposed by libc".into(),
            )),
        }
    }

    pub fn lock_process_memory() -> Result<()> {
        // SAFETY: mlockall takes only flag bits, no pointers; failure is
        // reported through errno and mapped below.
        let rc = unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) };
        if rc == 0 {
            tracing::debug!("process memory locked (mlockall)");
            Ok(())
        } else {
            map_errno("mlockall")
        }
    }

    pub fn unlock_process_memory() -> Result<()> {
        // SAFETY: munlockall takes no arguments.
        let rc = unsafe { libc::munlockall() };
        if rc == 0 {
            Ok(())
        } else {
            map_errno("munlockall")
        }
    }

    pub fn set_thread_policy(policy: RtPolicy, priority: u8) -> Result<()> {
        let sched_policy = sched_policy_const(policy)?;
        let param = libc::sched_param {
            sched_priority: priority as libc::c_int,
        };
        // SAFETY: pthread_self() is always valid for the calling thread;
        // `param` is a valid, fully-initialized sched_param.
        let rc = unsafe {
            libc::pthread_setschedparam(libc::pthread_self(), sched_policy, &param)
        };
        if rc == 0 {
            tracing::debug!(?policy, priority, "thread scheduling policy applied");
            Ok(())
        } else {
            map_pthread_errno("pthread_setschedparam", rc)
        }
    }

    pub fn set_thread_cpu(core_id: i32) -> Result<()> {
        // SAFETY: CPU_ZERO/CPU_SET operate on a stack-local cpu_set_t.
        unsafe {
            let mut cpuset: libc::cpu_set_t = std::mem::zeroed();
            libc::CPU_ZERO(&mut cpuset);
            libc::CPU_SET(core_id as usize, &mut cpuset);
            let rc = libc::pthread_setaffinity_np(
                libc::pthread_self(),
                std::mem::size_of::<libc::cpu_set_t>(),
                &cpuset,
            );
            if rc == 0 {
                tracing::debug!(core_id, "thread CPU affinity applied");
                Ok(())
            } else {
                map_pthread_errno("pthread_setaffinity_np", rc)
            }
        }
    }

    pub fn priority_bounds(policy: RtPolicy) -> Result<(i32, i32)> {
        let sched_policy = sched_policy_const(policy)?;
        // SAFETY: pure queries, no pointers involved.
        let min = unsafe { libc::sched_get_priority_min(sched_policy) };
        let max = unsafe { libc::sched_get_priority_max(sched_policy) };
        if min == -1 || max == -1 {
            map_errno("sched_get_priority_min/max")
        } else {
            Ok((min, max))
        }
    }

    pub fn effective_policy() -> Result<(RtPolicy, i32)> {
        // SAFETY: 0 means "calling thread" (within the process, using the
        // Linux gettid() semantics sched_getscheduler(0) relies on).
        let raw = unsafe { libc::sched_getscheduler(0) };
        if raw == -1 {
            return map_errno("sched_getscheduler");
        }
        let policy = match raw {
            libc::SCHED_FIFO => RtPolicy::Fifo,
            libc::SCHED_RR => RtPolicy::Rr,
            _ => RtPolicy::None,
        };
        let mut param: libc::sched_param = unsafe { std::mem::zeroed() };
        // SAFETY: `param` is a valid out-pointer of the right size.
        let rc = unsafe { libc::sched_getparam(0, &mut param) };
        if rc == -1 {
            return map_errno("sched_getparam");
        }
        Ok((policy, param.sched_priority))
    }

    fn map_errno<T>(call: &str) -> Result<T> {
        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EPERM) | Some(libc::EACCES) => {
                Err(RtError::PermissionDenied(format!("{call}: {err}")))
            }
            Some(libc::ENOMEM) => Err(RtError::ResourceLimitExceeded(format!("{call}: {err}"))),
            _ => Err(RtError::Os(format!("{call}: {err}"))),
        }
    }

    fn map_pthread_errno<T>(call: &str, rc: libc::c_int) -> Result<T> {
        match rc {
            libc::EPERM => Err(RtError::PermissionDenied(format!(
                "{call}: operation not permitted (need CAP_SYS_NICE or root)"
            ))),
            libc::ENOMEM => Err(RtError::ResourceLimitExceeded(format!(
                "{call}: resource limit exceeded"
            ))),
            code => Err(RtError::Os(format!("{call}: errno {code}"))),
        }
    }
}

#[cfg(target_os = "linux")]
pub use linux::*;

#[cfg(not(target_os = "linux"))]
mod unsupported {
    use super::*;

    pub fn lock_process_memory() -> Result<()> {
        Err(RtError::Unsupported("mlockall".into()))
    }

    pub fn unlock_process_memory() -> Result<()> {
        Err(RtError::Unsupported("munlockall".into()))
    }

    pub fn set_thread_policy(_policy: RtPolicy, _priority: u8) -> Result<()> {
        Err(RtError::Unsupported("real-time scheduling policies".into()))
    }

    pub fn set_thread_cpu(_core_id: i32) -> Result<()> {
        Err(RtError::Unsupported("CPU affinity".into()))
    }

    pub fn priority_bounds(_policy: RtPolicy) -> Result<(i32, i32)> {
        Err(RtError::Unsupported("sched_get_priority_{min,max}".into()))
    }

    pub fn effective_policy() -> Result<(RtPolicy, i32)> {
        Err(RtError::Unsupported("sched_getscheduler".into()))
    }
}

#[cfg(not(target_os = "linux"))]
pub use unsupported::*;
