//! Kernel resource accounting for interval timers.
//!
//! Kept in its own test binary: `/proc/self/timers` is process-wide, so no
//! other timers may be created concurrently.

#![cfg(target_os = "linux")]

use std::fs;
use stimer_runtime::IntervalTimer;

/// Number of POSIX timers owned by this process, if the kernel exposes them.
fn live_timers() -> Option<usize> {
    let listing = fs::read_to_string("/proc/self/timers").ok()?;
    Some(listing.lines().filter(|l| l.starts_with("ID:")).count())
}

#[test]
fn test_timers_are_deleted_on_drop() {
    let Some(baseline) = live_timers() else {
        eprintln!("Skipping test: /proc/self/timers not available");
        return;
    };

    for round in 0..20 {
        let mut timer = IntervalTimer::initialize(
            |calls: &mut u32| {
                *calls += 1;
                i32::from(*calls == 2)
            },
            0u32,
        )
        .unwrap();
        assert_eq!(live_timers(), Some(baseline + 1));

        // Half the instances never start.
        if round % 2 == 0 {
            timer.start(1.0).unwrap();
            assert_eq!(timer.run_loop(), Ok(1));
        }
        drop(timer);
        assert_eq!(live_timers(), Some(baseline));
    }
}
