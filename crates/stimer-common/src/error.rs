use nix::errno::Errno;
use thiserror::Error;

/// Top-level timer error covering every fallible timer operation.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum TimerError {
    /// Timer creation failed.
    #[error("timer initialization failed: {0}")]
    Init(#[from] InitError),

    /// Arming the timer failed.
    #[error("timer start failed: {0}")]
    Start(#[from] StartError),

    /// The wait loop hit an internal failure.
    #[error("timer loop failed: {0}")]
    Loop(#[from] LoopError),

    /// Invalid lifecycle transition attempted.
    #[error("invalid timer state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Source state.
        from: &'static str,
        /// Attempted target state.
        to: &'static str,
    },

    /// The wait loop was entered on a timer that is not armed.
    #[error("timer is not running (state {state})")]
    NotRunning {
        /// Current state.
        state: &'static str,
    },
}

/// Failures while setting up the signal handler and the kernel timer.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InitError {
    /// `sigaction` rejected the notification signal.
    #[error("failed to install notification signal handler: {0}")]
    HandlerInstall(Errno),

    /// Blocking the notification signal failed.
    #[error("failed to block notification signal: {0}")]
    SignalMask(Errno),

    /// `timer_create` failed (e.g. resource exhaustion).
    #[error("failed to create kernel timer: {0}")]
    TimerCreate(Errno),
}

/// Failures while arming the timer.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum StartError {
    /// Unblocking the notification signal failed.
    #[error("failed to unblock notification signal: {0}")]
    SignalMask(Errno),

    /// The period cannot be expressed as a non-zero `itimerspec`.
    #[error("period {period_ms}ms cannot be converted to a timer interval")]
    IntervalConvert {
        /// Requested period in milliseconds.
        period_ms: f64,
    },

    /// `timer_settime` failed.
    #[error("failed to arm kernel timer: {0}")]
    TimerArm(Errno),
}

/// Failures inside the blocking wait loop.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LoopError {
    /// Reading or changing the thread signal mask failed.
    #[error("failed to update notification signal mask: {0}")]
    SignalMask(Errno),
}

/// Failure to elevate the scheduling class or prepare the process for it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PriorityError {
    /// `sched_get_priority_max` or `sched_setscheduler` failed.
    #[error("failed to set real-time scheduler: {0}")]
    SchedulerSet(Errno),

    /// `mlockall` failed.
    #[error("failed to lock memory: {0}")]
    MemoryLock(Errno),

    /// Real-time requirements are not met and `fail_fast` is set.
    #[error("real-time requirements not met: {0}")]
    Unavailable(String),
}

/// `timer_getoverrun` failure observed inside the signal handler.
///
/// Never propagated from signal context; recorded and reported by the loop.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("overrun query failed ({failures} time(s)), last error: {last}")]
pub struct OverrunQueryError {
    /// Number of failed queries since the timer was created.
    pub failures: u64,
    /// Errno of the most recent failure.
    pub last: Errno,
}

/// Digital output failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OutputError {
    /// The output is not available.
    #[error("output unavailable: {0}")]
    Unavailable(String),

    /// Writing the level failed.
    #[error("failed to write output level: {0}")]
    Write(String),
}

/// Convenience type alias for timer operations.
pub type TimerResult<T> = Result<T, TimerError>;
