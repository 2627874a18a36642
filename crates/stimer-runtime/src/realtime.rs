//! Real-time scheduling and memory locking.
//!
//! [`set_realtime_priority`] is the minimal entry point: `SCHED_FIFO` at the
//! maximum priority for the calling process. [`init_realtime`] applies a full
//! [`RealtimeConfig`] (policy, priority, memory locking, capability checks).

#![allow(unused_imports)] // Platform-specific code may not use all imports

use nix::errno::Errno;
use stimer_common::config::{RealtimeConfig, SchedPolicy};
use stimer_common::error::PriorityError;
use tracing::{debug, error, info, warn};

/// Result of real-time initialization.
#[derive(Debug, Clone, Default)]
pub struct RealtimeStatus {
    /// Whether memory was locked successfully.
    pub memory_locked: bool,
    /// Applied scheduler policy.
    pub scheduler_policy: Option<SchedPolicy>,
    /// Applied scheduler priority.
    pub scheduler_priority: Option<i32>,
}

/// Switch the calling process to `SCHED_FIFO` at its maximum priority.
///
/// Returns the applied priority. The failure is returned as-is; whether to
/// continue without real-time scheduling is the caller's decision.
///
/// # Errors
///
/// [`PriorityError::SchedulerSet`] carrying the OS error (typically `EPERM`
/// without `CAP_SYS_NICE`).
pub fn set_realtime_priority() -> Result<i32, PriorityError> {
    set_scheduler(SchedPolicy::Fifo, None)
}

/// Initialize the real-time environment based on configuration.
///
/// With `fail_fast` unset, missing privileges are logged and reported as
/// not-applied in the returned status. With `fail_fast` set, they are errors.
///
/// # Errors
///
/// Returns [`PriorityError`] if a required step fails.
pub fn init_realtime(config: &RealtimeConfig) -> Result<RealtimeStatus, PriorityError> {
    if !config.enabled {
        info!("Real-time scheduling disabled in configuration");
        return Ok(RealtimeStatus::default());
    }

    if config.fail_fast {
        info!("Validating real-time capabilities (fail_fast=true)");
        validate_rt_capabilities(config)?;
    }

    let memory_locked = if config.lock_memory {
        match lock_memory() {
            Ok(()) => true,
            Err(e) if !config.fail_fast => {
                warn!(error = %e, "Continuing without locked memory");
                false
            }
            Err(e) => return Err(e),
        }
    } else {
        false
    };

    let (scheduler_policy, scheduler_priority) =
        match set_scheduler(config.policy, config.priority) {
            Ok(priority) => (Some(config.policy), Some(priority)),
            Err(e) if !config.fail_fast => {
                warn!(
                    error = %e,
                    "Continuing with the default scheduler. \
                     Consider running with CAP_SYS_NICE capability or as root."
                );
                (None, None)
            }
            Err(e) => return Err(e),
        };

    let status = RealtimeStatus {
        memory_locked,
        scheduler_policy,
        scheduler_priority,
    };
    info!(?status, "Real-time initialization complete");
    Ok(status)
}

/// Lock all current and future memory pages.
#[cfg(target_os = "linux")]
fn lock_memory() -> Result<(), PriorityError> {
    use nix::sys::mman::{mlockall, MlockAllFlags};

    debug!("Locking memory pages with mlockall");
    mlockall(MlockAllFlags::MCL_CURRENT | MlockAllFlags::MCL_FUTURE)
        .map_err(PriorityError::MemoryLock)?;
    info!("Memory locked successfully");
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn lock_memory() -> Result<(), PriorityError> {
    Err(PriorityError::MemoryLock(Errno::ENOSYS))
}

/// Apply a real-time policy; `None` selects the policy maximum.
#[cfg(target_os = "linux")]
fn set_scheduler(policy: SchedPolicy, priority: Option<u8>) -> Result<i32, PriorityError> {
    let linux_policy = match policy {
        SchedPolicy::Fifo => libc::SCHED_FIFO,
        SchedPolicy::Rr => libc::SCHED_RR,
    };

    // SAFETY: sched_get_priority_max has no memory-safety preconditions.
    let max = Errno::result(unsafe { libc::sched_get_priority_max(linux_policy) })
        .map_err(PriorityError::SchedulerSet)?;

    let sched_priority = match priority {
        Some(p) => {
            let clamped = i32::from(p).clamp(1, max);
            if clamped != i32::from(p) {
                warn!(
                    original = p,
                    clamped, "Scheduler priority clamped to valid range"
                );
            }
            clamped
        }
        None => max,
    };

    debug!(?policy, priority = sched_priority, "Setting real-time scheduler");

    let param = libc::sched_param { sched_priority };
    // SAFETY: param is a valid sched_param; pid 0 is the calling process.
    Errno::result(unsafe { libc::sched_setscheduler(0, linux_policy, &param) })
        .map_err(PriorityError::SchedulerSet)?;

    info!(?policy, priority = sched_priority, "Real-time scheduler configured");
    Ok(sched_priority)
}

#[cfg(not(target_os = "linux"))]
fn set_scheduler(policy: SchedPolicy, priority: Option<u8>) -> Result<i32, PriorityError> {
    warn!(?policy, ?priority, "Real-time scheduling not available on this platform");
    Err(PriorityError::SchedulerSet(Errno::ENOSYS))
}

/// Information about real-time capabilities of the system.
#[derive(Debug, Clone, Default)]
pub struct RtCapabilities {
    /// Whether running as root.
    pub is_root: bool,
    /// RLIMIT_RTPRIO value (max RT priority allowed).
    pub rtprio_limit: Option<u64>,
    /// RLIMIT_MEMLOCK value (max lockable memory).
    pub memlock_limit: Option<u64>,
    /// Whether running on a PREEMPT_RT kernel.
    pub preempt_rt: bool,
}

impl RtCapabilities {
    /// Check if RT scheduling is likely to succeed.
    pub fn can_use_rt_scheduling(&self) -> bool {
        self.is_root || self.rtprio_limit.is_some_and(|l| l > 0)
    }

    /// Check if memory locking is likely to succeed.
    pub fn can_lock_memory(&self) -> bool {
        self.is_root || self.memlock_limit.is_some_and(|l| l == libc::RLIM_INFINITY)
    }
}

/// Probe the current process for real-time capabilities.
#[cfg(target_os = "linux")]
pub fn check_rt_capabilities() -> RtCapabilities {
    use nix::sys::resource::{getrlimit, Resource};

    RtCapabilities {
        is_root: nix::unistd::geteuid().is_root(),
        rtprio_limit: getrlimit(Resource::RLIMIT_RTPRIO).ok().map(|(soft, _)| soft),
        memlock_limit: getrlimit(Resource::RLIMIT_MEMLOCK).ok().map(|(soft, _)| soft),
        preempt_rt: std::fs::read_to_string("/proc/version")
            .is_ok_and(|v| v.contains("PREEMPT_RT") || v.contains("PREEMPT RT")),
    }
}

#[cfg(not(target_os = "linux"))]
pub fn check_rt_capabilities() -> RtCapabilities {
    RtCapabilities::default()
}

/// Validate that real-time capabilities are available.
///
/// # Errors
///
/// Returns [`PriorityError::Unavailable`] listing every unmet requirement.
/// A missing PREEMPT_RT kernel only warns.
pub fn validate_rt_capabilities(config: &RealtimeConfig) -> Result<(), PriorityError> {
    if !config.enabled {
        return Ok(());
    }

    let caps = check_rt_capabilities();
    let mut issues = Vec::new();

    if !caps.preempt_rt {
        warn!("PREEMPT_RT kernel not detected. Tick jitter may be degraded.");
    }

    if !caps.can_use_rt_scheduling() {
        issues.push(format!(
            "cannot use SCHED_{:?}: RLIMIT_RTPRIO={:?}, is_root={}",
            config.policy, caps.rtprio_limit, caps.is_root
        ));
    }

    if config.lock_memory && !caps.can_lock_memory() {
        issues.push(format!(
            "cannot lock memory: RLIMIT_MEMLOCK={:?}, is_root={}",
            caps.memlock_limit, caps.is_root
        ));
    }

    if issues.is_empty() {
        info!("Real-time capabilities validated successfully");
        Ok(())
    } else {
        let message = issues.join("; ");
        error!("{}", message);
        Err(PriorityError::Unavailable(message))
    }
}
