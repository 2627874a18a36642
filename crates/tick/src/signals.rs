//! SIGINT/SIGTERM handling for the tick loop.
//!
//! The handlers only store to atomics and call [`TimerHandle::stop`]; the loop
//! then returns `0` at the top of its next iteration.

use nix::errno::Errno;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::ffi::c_int;
use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::OnceLock;
use stimer_runtime::TimerHandle;
use tracing::{debug, warn};

static STOP_TARGET: OnceLock<TimerHandle> = OnceLock::new();
static SIGNAL_COUNT: AtomicU32 = AtomicU32::new(0);
static LAST_SIGNAL: AtomicI32 = AtomicI32::new(0);

/// Shutdown signals handled by `tick`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// SIGINT - Interrupt (Ctrl+C).
    Interrupt,
    /// SIGTERM - Graceful termination request.
    Terminate,
}

impl SignalKind {
    fn from_raw(signo: c_int) -> Option<Self> {
        match signo {
            libc::SIGINT => Some(Self::Interrupt),
            libc::SIGTERM => Some(Self::Terminate),
            _ => None,
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::Interrupt => write!(f, "SIGINT"),
            SignalKind::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Observes shutdown signals received since [`install`].
#[derive(Debug, Clone, Copy)]
pub struct ShutdownSignals {
    _private: (),
}

impl ShutdownSignals {
    /// Number of shutdown signals received.
    pub fn count(&self) -> u32 {
        SIGNAL_COUNT.load(Ordering::Relaxed)
    }

    /// The most recent shutdown signal, if any.
    pub fn last(&self) -> Option<SignalKind> {
        SignalKind::from_raw(LAST_SIGNAL.load(Ordering::Relaxed))
    }
}

extern "C" fn on_shutdown_signal(signo: c_int) {
    SIGNAL_COUNT.fetch_add(1, Ordering::Relaxed);
    LAST_SIGNAL.store(signo, Ordering::Relaxed);
    if let Some(handle) = STOP_TARGET.get() {
        handle.stop();
    }
}

/// Route SIGINT and SIGTERM to `handle.stop()`.
///
/// Only the first handle registered in a process is used.
///
/// # Errors
///
/// Returns the errno if a handler cannot be installed.
pub fn install(handle: TimerHandle) -> Result<ShutdownSignals, Errno> {
    if STOP_TARGET.set(handle).is_err() {
        warn!("Shutdown signals already bound to a timer");
    }

    let action = SigAction::new(
        SigHandler::Handler(on_shutdown_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    for signal in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only touches atomics and a set OnceLock.
        unsafe { sigaction(signal, &action) }?;
    }

    debug!("Shutdown signal handlers registered");
    Ok(ShutdownSignals { _private: () })
}
