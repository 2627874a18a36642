//! Signal-driven periodic timer.
//!
//! An [`IntervalTimer`] owns one POSIX timer that notifies its owning thread
//! with a realtime signal. The work is split in two layers:
//!
//! 1. The signal handler (see `notify`) only counts deliveries and kernel
//!    overruns into atomics.
//! 2. [`IntervalTimer::run_loop`] parks the thread in `sigsuspend`, and once
//!    a delivery has been handled and the signal is masked again, invokes the
//!    user callback.
//!
//! The notification signal is blocked on the owning thread at all times except
//! while the loop is parked, so the callback never overlaps a handler run.
//!
//! # Threading
//!
//! Deliveries are directed at the thread that called
//! [`IntervalTimer::initialize`] (`SIGEV_THREAD_ID`), and the timer is `!Send`:
//! `start`, `run_loop` and drop all happen on that thread. Use a
//! [`TimerHandle`] to stop the loop or read counters from elsewhere, including
//! from a signal handler.

use crate::notify::{self, TimerShared};
use nix::errno::Errno;
use nix::unistd::gettid;
use std::ffi::{c_int, c_void};
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ptr;
use std::sync::Arc;
use std::time::Duration;
use stimer_common::config::{TimerClock, TimerConfig};
use stimer_common::daytime::timespec_from_seconds;
use stimer_common::error::{
    InitError, LoopError, OverrunQueryError, StartError, TimerError, TimerResult,
};
use stimer_common::state::{StateMachine, TimerState};
use tracing::{debug, info, trace, warn};

/// Cloneable, thread-safe view of a timer's control flag and counters.
///
/// [`TimerHandle::stop`] is a single atomic store and may be called from a
/// signal handler.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    shared: Arc<TimerShared>,
}

impl TimerHandle {
    /// Ask the loop to return at the top of its next iteration.
    #[inline]
    pub fn stop(&self) {
        self.shared.request_stop();
    }

    /// Check if a stop has been requested.
    #[inline]
    pub fn stop_requested(&self) -> bool {
        self.shared.stop_requested()
    }

    /// Kernel-reported expirations that were coalesced into earlier deliveries.
    #[inline]
    pub fn overrun_count(&self) -> u64 {
        self.shared.overruns()
    }

    /// Signal deliveries handled so far.
    #[inline]
    pub fn expirations(&self) -> u64 {
        self.shared.expirations()
    }

    /// Deliveries that were handled while the callback was running.
    ///
    /// Always zero unless the masking discipline is broken.
    pub fn callback_collisions(&self) -> u64 {
        self.shared.callback_collisions()
    }
}

/// Periodic timer driving a callback from a realtime signal.
///
/// The callback receives the caller-supplied context; returning `0` keeps the
/// loop running, any other value ends [`run_loop`](Self::run_loop) with that
/// value.
pub struct IntervalTimer<C, F> {
    shared: Arc<TimerShared>,
    timer_id: libc::timer_t,
    signo: c_int,
    callback: F,
    context: C,
    state: StateMachine,
    period: Option<libc::itimerspec>,
    /// Expirations already answered with a callback.
    serviced: u64,
    reported_query_failures: u64,
    /// Deliveries target the creating thread.
    _thread_bound: PhantomData<*const ()>,
}

impl<C, F> IntervalTimer<C, F>
where
    F: FnMut(&mut C) -> i32,
{
    /// Create a timer with the default configuration (`CLOCK_REALTIME`,
    /// notification on `SIGRTMIN`).
    ///
    /// # Errors
    ///
    /// See [`with_config`](Self::with_config).
    pub fn initialize(callback: F, context: C) -> TimerResult<Self> {
        Self::with_config(&TimerConfig::default(), callback, context)
    }

    /// Install the signal handler, block the notification signal on the
    /// calling thread, and create the (disarmed) kernel timer.
    ///
    /// # Errors
    ///
    /// Returns [`InitError::HandlerInstall`], [`InitError::SignalMask`] or
    /// [`InitError::TimerCreate`]. Anything set up before the failing step is
    /// undone.
    pub fn with_config(config: &TimerConfig, callback: F, context: C) -> TimerResult<Self> {
        let mut state = StateMachine::new();

        let signo =
            notify::notification_signal(config.signal_offset).map_err(InitError::HandlerInstall)?;
        let previous_action = notify::install_handler(signo).map_err(InitError::HandlerInstall)?;

        // Mask before the timer exists: no delivery may arrive outside the loop.
        let previous_mask = match notify::block(signo) {
            Ok(mask) => mask,
            Err(errno) => {
                notify::restore_handler(signo, &previous_action);
                return Err(InitError::SignalMask(errno).into());
            }
        };

        let shared = Arc::new(TimerShared::new());
        let timer_id = match create_kernel_timer(config.clock, signo, &shared) {
            Ok(id) => id,
            Err(errno) => {
                warn!(%errno, signo, "timer_create failed");
                if let Err(e) = notify::restore_mask(&previous_mask) {
                    warn!(errno = %e, "Failed to restore signal mask");
                }
                notify::restore_handler(signo, &previous_action);
                return Err(InitError::TimerCreate(errno).into());
            }
        };
        shared.set_timer_id(timer_id);

        state.transition(TimerState::Ready)?;
        debug!(signo, clock = ?config.clock, "Interval timer initialized");

        Ok(Self {
            shared,
            timer_id,
            signo,
            callback,
            context,
            state,
            period: None,
            serviced: 0,
            reported_query_failures: 0,
            _thread_bound: PhantomData,
        })
    }

    /// Arm the timer with `period_ms` (fractional milliseconds allowed).
    ///
    /// The first expiration happens one full period from now, then every
    /// period after that.
    ///
    /// # Errors
    ///
    /// Returns [`StartError`] if the signal cannot be unblocked, the period is
    /// not a positive representable interval, or `timer_settime` fails. The
    /// timer then stays in READY (with the signal possibly unblocked).
    pub fn start(&mut self, period_ms: f64) -> TimerResult<()> {
        self.state.ensure_can_transition(TimerState::Running)?;

        notify::unblock(self.signo).map_err(StartError::SignalMask)?;

        let interval = interval_from_millis(period_ms)
            .ok_or(StartError::IntervalConvert { period_ms })?;
        let spec = libc::itimerspec {
            it_interval: interval,
            it_value: interval,
        };

        // SAFETY: timer_id is live; spec is a valid itimerspec.
        Errno::result(unsafe { libc::timer_settime(self.timer_id, 0, &spec, ptr::null_mut()) })
            .map_err(StartError::TimerArm)?;

        self.period = Some(spec);
        self.state.transition(TimerState::Running)?;
        info!(period_ms, signo = self.signo, "Interval timer started");
        Ok(())
    }

    /// Request the loop to return `0` at the top of its next iteration.
    ///
    /// Does not disarm the timer or touch the signal mask.
    #[inline]
    pub fn stop(&self) {
        self.shared.request_stop();
    }

    /// Run the tick loop on the calling thread until stopped.
    ///
    /// Each iteration: return `0` if a stop was requested; otherwise wait for
    /// the next delivery with the signal unblocked, re-mask it, then invoke the
    /// callback. A nonzero callback result is returned verbatim. Wake-ups by
    /// other signals re-check the stop flag without invoking the callback.
    ///
    /// There is no timeout: without ticks or a stop request this blocks
    /// forever. On return the timer is disarmed and STOPPED.
    ///
    /// # Errors
    ///
    /// [`TimerError::NotRunning`] unless started; [`LoopError::SignalMask`] if
    /// the signal mask cannot be read or changed.
    pub fn run_loop(&mut self) -> TimerResult<i32> {
        if !self.state.state().is_running() {
            return Err(TimerError::NotRunning {
                state: self.state.state().as_str(),
            });
        }

        // start() left the signal unblocked; mask it until we park.
        let base_mask = notify::block(self.signo).map_err(LoopError::SignalMask)?;
        let wait_mask = notify::without(base_mask, self.signo);

        info!("Entering timer loop");

        let code = loop {
            if self.shared.stop_requested() {
                debug!("Stop requested");
                break 0;
            }

            // Unblock, wait, and re-block in one step.
            notify::wait_for_signal(&wait_mask);

            self.report_overrun_query_failures();

            let expirations = self.shared.expirations();
            if expirations == self.serviced {
                trace!("Woken by a foreign signal");
                continue;
            }
            self.serviced = expirations;

            self.shared.enter_callback();
            let code = (self.callback)(&mut self.context);
            self.shared.leave_callback();

            if code != 0 {
                debug!(code, "Callback requested termination");
                break code;
            }
        };

        self.finish();
        Ok(code)
    }

    /// Disarm and move to STOPPED.
    fn finish(&mut self) {
        let disarm: libc::itimerspec = zeroed_itimerspec();
        // SAFETY: timer_id is live; a zero it_value disarms.
        if let Err(errno) =
            Errno::result(unsafe { libc::timer_settime(self.timer_id, 0, &disarm, ptr::null_mut()) })
        {
            warn!(%errno, "Failed to disarm timer");
        }
        if let Err(e) = self.state.transition(TimerState::Stopped) {
            warn!(error = %e, "Unexpected state on loop exit");
        }
        info!(
            expirations = self.shared.expirations(),
            overruns = self.shared.overruns(),
            "Timer loop exited"
        );
    }

    fn report_overrun_query_failures(&mut self) {
        let (failures, last) = self.shared.overrun_query_failures();
        if failures > self.reported_query_failures {
            self.reported_query_failures = failures;
            warn!(failures, errno = %last, "timer_getoverrun failed in signal handler");
        }
    }
}

impl<C, F> IntervalTimer<C, F> {
    /// Handle for stopping the loop and reading counters from other contexts.
    #[must_use]
    pub fn handle(&self) -> TimerHandle {
        TimerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TimerState {
        self.state.state()
    }

    /// Kernel-reported overruns accumulated so far.
    #[must_use]
    pub fn overrun_count(&self) -> u64 {
        self.shared.overruns()
    }

    /// Signal deliveries handled so far.
    #[must_use]
    pub fn expirations(&self) -> u64 {
        self.shared.expirations()
    }

    /// Most recent overrun query failure, if any occurred.
    #[must_use]
    pub fn overrun_query_error(&self) -> Option<OverrunQueryError> {
        let (failures, last) = self.shared.overrun_query_failures();
        (failures > 0).then_some(OverrunQueryError { failures, last })
    }

    /// Realtime signal number used for notification.
    #[must_use]
    pub fn signal(&self) -> c_int {
        self.signo
    }

    /// Armed period, once started.
    #[must_use]
    pub fn period(&self) -> Option<Duration> {
        self.period.map(|spec| {
            let secs = u64::try_from(spec.it_interval.tv_sec).unwrap_or(0);
            let nanos = u32::try_from(spec.it_interval.tv_nsec).unwrap_or(0);
            Duration::new(secs, nanos)
        })
    }

    /// Context passed to the callback.
    pub fn context(&self) -> &C {
        &self.context
    }

    /// Mutable context, e.g. to attach a [`TimerHandle`] before looping.
    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }
}

impl<C, F> fmt::Debug for IntervalTimer<C, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntervalTimer")
            .field("signo", &self.signo)
            .field("state", &self.state.state())
            .field("period", &self.period())
            .field("expirations", &self.shared.expirations())
            .field("overruns", &self.shared.overruns())
            .finish_non_exhaustive()
    }
}

impl<C, F> Drop for IntervalTimer<C, F> {
    fn drop(&mut self) {
        self.shared.clear_timer_id();
        // SAFETY: timer_id came from timer_create and is deleted exactly once.
        if let Err(errno) = Errno::result(unsafe { libc::timer_delete(self.timer_id) }) {
            warn!(%errno, "timer_delete failed");
        }

        // Deliveries already queued still point at `shared`; discard them
        // while the signal is masked.
        match notify::block(self.signo) {
            Ok(_) => {
                let drained = notify::drain_pending(self.signo);
                if drained > 0 {
                    debug!(drained, "Discarded pending timer notifications");
                }
            }
            Err(errno) => warn!(%errno, "Failed to mask notification signal on drop"),
        }
        debug!(signo = self.signo, "Interval timer destroyed");
    }
}

fn create_kernel_timer(
    clock: TimerClock,
    signo: c_int,
    shared: &Arc<TimerShared>,
) -> Result<libc::timer_t, Errno> {
    let clock_id = match clock {
        TimerClock::Realtime => libc::CLOCK_REALTIME,
        TimerClock::Monotonic => libc::CLOCK_MONOTONIC,
        TimerClock::Boottime => libc::CLOCK_BOOTTIME,
    };

    // SAFETY: an all-zero sigevent is valid; the relevant fields are set below.
    let mut event: libc::sigevent = unsafe { mem::zeroed() };
    event.sigev_notify = libc::SIGEV_THREAD_ID;
    event.sigev_signo = signo;
    event.sigev_value = libc::sigval {
        sival_ptr: Arc::as_ptr(shared).cast_mut().cast::<c_void>(),
    };
    event.sigev_notify_thread_id = gettid().as_raw();

    let mut timer_id: libc::timer_t = ptr::null_mut();
    // SAFETY: both pointers reference live stack values.
    Errno::result(unsafe { libc::timer_create(clock_id, &mut event, &mut timer_id) })?;
    Ok(timer_id)
}

/// Convert a millisecond period into a non-zero `timespec`.
fn interval_from_millis(period_ms: f64) -> Option<libc::timespec> {
    if !(period_ms.is_finite() && period_ms > 0.0) {
        return None;
    }
    let seconds = period_ms * 1e-3;
    if seconds >= libc::time_t::MAX as f64 {
        return None;
    }
    let (tv_sec, tv_nsec) = timespec_from_seconds(seconds);
    if tv_sec == 0 && tv_nsec == 0 {
        return None;
    }
    Some(libc::timespec {
        tv_sec: tv_sec as libc::time_t,
        tv_nsec: tv_nsec as libc::c_long,
    })
}

fn zeroed_itimerspec() -> libc::itimerspec {
    let zero = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    libc::itimerspec {
        it_interval: zero,
        it_value: zero,
    }
}
