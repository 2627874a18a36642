//! Signal-side half of the interval timer.
//!
//! The handler installed here runs in async-signal context. It touches only
//! the atomics in [`TimerShared`] and calls `timer_getoverrun`; it never runs
//! user code, allocates, locks, or logs. Failures it observes are recorded
//! and reported later by the consumer loop.

use nix::errno::Errno;
use std::ffi::{c_int, c_void};
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicPtr, AtomicU64, Ordering};

/// `si_code` of a POSIX timer expiration on Linux.
const SI_TIMER: c_int = -2;

/// State shared between one timer instance and the signal handler.
///
/// The kernel timer carries a pointer to this struct as its `sigev_value`
/// payload, so deliveries are routed to the right instance when several
/// timers coexist.
#[derive(Debug)]
pub(crate) struct TimerShared {
    /// Kernel timer id, null until created and after deletion.
    timer_id: AtomicPtr<c_void>,
    stop_requested: AtomicBool,
    /// Signal deliveries handled.
    expirations: AtomicU64,
    /// Extra expirations the kernel coalesced into earlier deliveries.
    overruns: AtomicU64,
    overrun_query_failures: AtomicU64,
    last_query_errno: AtomicI32,
    /// Set by the consumer loop while the user callback runs.
    callback_active: AtomicBool,
    /// Deliveries that found `callback_active` set. Stays zero while the
    /// masking discipline holds.
    callback_collisions: AtomicU64,
}

impl TimerShared {
    pub(crate) fn new() -> Self {
        Self {
            timer_id: AtomicPtr::new(ptr::null_mut()),
            stop_requested: AtomicBool::new(false),
            expirations: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            overrun_query_failures: AtomicU64::new(0),
            last_query_errno: AtomicI32::new(0),
            callback_active: AtomicBool::new(false),
            callback_collisions: AtomicU64::new(0),
        }
    }

    pub(crate) fn set_timer_id(&self, id: libc::timer_t) {
        self.timer_id.store(id, Ordering::Release);
    }

    pub(crate) fn clear_timer_id(&self) {
        self.timer_id.store(ptr::null_mut(), Ordering::Release);
    }

    /// Async-signal-safe: atomics and `timer_getoverrun` only.
    fn on_expiry(&self) {
        if self.callback_active.load(Ordering::Acquire) {
            self.callback_collisions.fetch_add(1, Ordering::Relaxed);
        }

        let id = self.timer_id.load(Ordering::Acquire);
        if !id.is_null() {
            // SAFETY: `id` was returned by timer_create and is cleared before timer_delete.
            let overrun = unsafe { libc::timer_getoverrun(id) };
            if overrun < 0 {
                self.overrun_query_failures.fetch_add(1, Ordering::Relaxed);
                self.last_query_errno
                    .store(Errno::last() as i32, Ordering::Relaxed);
            } else {
                self.overruns
                    .fetch_add(u64::from(overrun.unsigned_abs()), Ordering::Relaxed);
            }
        }

        self.expirations.fetch_add(1, Ordering::Release);
    }

    pub(crate) fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    pub(crate) fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Acquire)
    }

    pub(crate) fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    pub(crate) fn overrun_query_failures(&self) -> (u64, Errno) {
        let failures = self.overrun_query_failures.load(Ordering::Relaxed);
        let errno = Errno::from_raw(self.last_query_errno.load(Ordering::Relaxed));
        (failures, errno)
    }

    pub(crate) fn enter_callback(&self) {
        self.callback_active.store(true, Ordering::Release);
    }

    pub(crate) fn leave_callback(&self) {
        self.callback_active.store(false, Ordering::Release);
    }

    pub(crate) fn callback_collisions(&self) -> u64 {
        self.callback_collisions.load(Ordering::Relaxed)
    }
}

extern "C" fn on_timer_signal(_signo: c_int, info: *mut libc::siginfo_t, _context: *mut c_void) {
    if info.is_null() {
        return;
    }
    // SAFETY: the kernel passes a valid siginfo to SA_SIGINFO handlers.
    let info = unsafe { &*info };
    if info.si_code != SI_TIMER {
        return;
    }
    // SAFETY: SI_TIMER deliveries carry the sigev_value given to timer_create.
    let payload = unsafe { info.si_value().sival_ptr }.cast::<TimerShared>();
    if payload.is_null() {
        return;
    }

    // SAFETY: errno is thread-local; the interrupted code must see it unchanged.
    let saved_errno = unsafe { *libc::__errno_location() };
    // SAFETY: the owning timer deletes the kernel timer and drains pending
    // deliveries before releasing its reference to the payload.
    unsafe { &*payload }.on_expiry();
    // SAFETY: see above.
    unsafe { *libc::__errno_location() = saved_errno };
}

/// `SIGRTMIN + offset`, rejected past `SIGRTMAX`.
pub(crate) fn notification_signal(offset: u8) -> Result<c_int, Errno> {
    let signo = libc::SIGRTMIN() + c_int::from(offset);
    if signo > libc::SIGRTMAX() {
        return Err(Errno::EINVAL);
    }
    Ok(signo)
}

/// Install the timer handler for `signo`, returning the previous action.
pub(crate) fn install_handler(signo: c_int) -> Result<libc::sigaction, Errno> {
    // SAFETY: an all-zero sigaction is a valid starting point.
    let mut action: libc::sigaction = unsafe { mem::zeroed() };
    action.sa_sigaction = on_timer_signal as libc::sighandler_t;
    action.sa_flags = libc::SA_SIGINFO | libc::SA_RESTART;
    // SAFETY: sa_mask is a valid sigset_t inside `action`.
    unsafe { libc::sigemptyset(&mut action.sa_mask) };

    // SAFETY: as above.
    let mut previous: libc::sigaction = unsafe { mem::zeroed() };
    // SAFETY: both pointers reference live stack values.
    Errno::result(unsafe { libc::sigaction(signo, &action, &mut previous) })?;
    Ok(previous)
}

/// Put back the action replaced by [`install_handler`], unless it was ours
/// (another live timer may depend on it).
pub(crate) fn restore_handler(signo: c_int, previous: &libc::sigaction) {
    if previous.sa_sigaction == on_timer_signal as libc::sighandler_t {
        return;
    }
    // SAFETY: `previous` was filled in by sigaction.
    unsafe { libc::sigaction(signo, previous, ptr::null_mut()) };
}

/// Signal set holding only `signo`.
pub(crate) fn signal_set(signo: c_int) -> libc::sigset_t {
    // SAFETY: sigemptyset initialises the set before use.
    let mut set: libc::sigset_t = unsafe { mem::zeroed() };
    // SAFETY: `set` is a live sigset_t.
    unsafe {
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, signo);
    }
    set
}

fn thread_mask(how: c_int, set: Option<&libc::sigset_t>) -> Result<libc::sigset_t, Errno> {
    // SAFETY: zeroed sigset_t is a valid out-parameter.
    let mut previous: libc::sigset_t = unsafe { mem::zeroed() };
    let set_ptr = set.map_or(ptr::null(), |s| s as *const libc::sigset_t);
    // SAFETY: pointers are null or reference live sigset_t values.
    let rc = unsafe { libc::pthread_sigmask(how, set_ptr, &mut previous) };
    if rc != 0 {
        return Err(Errno::from_raw(rc));
    }
    Ok(previous)
}

/// Block `signo` on the calling thread, returning the previous mask.
pub(crate) fn block(signo: c_int) -> Result<libc::sigset_t, Errno> {
    thread_mask(libc::SIG_BLOCK, Some(&signal_set(signo)))
}

/// Unblock `signo` on the calling thread.
pub(crate) fn unblock(signo: c_int) -> Result<(), Errno> {
    thread_mask(libc::SIG_UNBLOCK, Some(&signal_set(signo))).map(drop)
}

/// Replace the calling thread's mask.
pub(crate) fn restore_mask(mask: &libc::sigset_t) -> Result<(), Errno> {
    thread_mask(libc::SIG_SETMASK, Some(mask)).map(drop)
}

/// Whether `signo` is currently blocked on the calling thread.
#[cfg(test)]
pub(crate) fn is_blocked(signo: c_int) -> Result<bool, Errno> {
    let current = thread_mask(libc::SIG_BLOCK, None)?;
    // SAFETY: `current` was filled in by pthread_sigmask.
    Ok(unsafe { libc::sigismember(&current, signo) } == 1)
}

/// `mask` with `signo` removed.
pub(crate) fn without(mut mask: libc::sigset_t, signo: c_int) -> libc::sigset_t {
    // SAFETY: `mask` is a valid sigset_t.
    unsafe { libc::sigdelset(&mut mask, signo) };
    mask
}

/// Atomically install `wait_mask`, sleep until a handled signal arrives, and
/// restore the previous mask before returning.
pub(crate) fn wait_for_signal(wait_mask: &libc::sigset_t) {
    // SAFETY: `wait_mask` is a valid sigset_t. sigsuspend always returns -1/EINTR.
    unsafe { libc::sigsuspend(wait_mask) };
}

/// Discard pending instances of `signo` without running the handler.
///
/// `signo` must be blocked on the calling thread.
pub(crate) fn drain_pending(signo: c_int) -> usize {
    let set = signal_set(signo);
    let zero = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let mut drained = 0;
    // SAFETY: valid set and timeout; a null siginfo pointer is allowed.
    while unsafe { libc::sigtimedwait(&set, ptr::null_mut(), &zero) } >= 0 {
        drained += 1;
    }
    drained
}
