//! Common utilities for acceptance tests.
//!
//! Provides helpers for:
//! - Checking real-time prerequisites (PREEMPT_RT, privileges)
//! - Running a timer and collecting tick interval statistics
//! - Generating test reports

#![allow(dead_code)] // Not every helper is used by every test module

use serde::Serialize;
use std::fs;
use std::thread;
use std::time::{Duration, Instant};
use stimer_common::metrics::TickMetrics;
use stimer_runtime::{set_realtime_priority, IntervalTimer};

/// Tick interval statistics of one measurement session.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JitterStats {
    /// Nominal period in microseconds.
    pub period_us: f64,
    /// Number of intervals measured.
    pub samples: u64,
    /// Shortest interval in microseconds.
    pub min_us: f64,
    /// Mean interval in microseconds.
    pub mean_us: f64,
    /// Longest interval in microseconds.
    pub max_us: f64,
    /// 99th percentile interval in microseconds.
    pub p99_us: f64,
    /// Largest deviation from the period in microseconds.
    pub max_jitter_us: f64,
    /// Kernel-reported overruns.
    pub overruns: u64,
    /// Signal deliveries handled while a callback was running.
    pub collisions: u64,
    /// Scheduler priority applied, if real-time was requested and granted.
    pub rt_priority: Option<i32>,
}

/// Check if the system has PREEMPT_RT kernel.
pub fn has_preempt_rt() -> bool {
    fs::read_to_string("/proc/version")
        .is_ok_and(|v| v.contains("PREEMPT_RT") || v.contains("PREEMPT RT"))
}

/// Check if running as root (required for RT priority).
pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Check all prerequisites for real-time tests.
pub fn check_rt_prerequisites() -> Result<(), String> {
    if !has_preempt_rt() {
        eprintln!("WARNING: PREEMPT_RT kernel not detected - jitter results may be unreliable");
    }
    if is_root() {
        Ok(())
    } else {
        Err("Not running as root - RT priority tests will fail".into())
    }
}

fn us(d: Option<Duration>) -> f64 {
    d.map_or(0.0, |d| d.as_secs_f64() * 1e6)
}

/// Run a timer for `ticks` intervals on a dedicated thread and measure them.
///
/// With `realtime` set, the thread switches to `SCHED_FIFO` first and the
/// session fails if that is refused.
pub fn measure_ticks(period_ms: f64, ticks: u64, realtime: bool) -> Result<JitterStats, String> {
    thread::spawn(move || {
        let rt_priority = if realtime {
            Some(set_realtime_priority().map_err(|e| e.to_string())?)
        } else {
            None
        };

        let period = Duration::from_secs_f64(period_ms * 1e-3);
        let capacity = usize::try_from(ticks + 1).map_err(|e| e.to_string())?;
        let mut timer = IntervalTimer::initialize(
            move |stamps: &mut Vec<Instant>| {
                stamps.push(Instant::now());
                i32::from(stamps.len() == capacity)
            },
            Vec::with_capacity(capacity),
        )
        .map_err(|e| e.to_string())?;

        timer.start(period_ms).map_err(|e| e.to_string())?;
        let code = timer.run_loop().map_err(|e| e.to_string())?;
        if code != 1 {
            return Err(format!("unexpected loop result {code}"));
        }

        let mut metrics = TickMetrics::new(capacity, period, Duration::from_micros(100));
        for pair in timer.context().windows(2) {
            metrics.record(pair[1] - pair[0]);
        }
        metrics.set_overrun_count(timer.overrun_count());

        let snap = metrics.snapshot();
        Ok(JitterStats {
            period_us: period.as_secs_f64() * 1e6,
            samples: snap.total_intervals,
            min_us: us(metrics.min()),
            mean_us: us(metrics.mean()),
            max_us: us(metrics.max()),
            p99_us: us(metrics.percentile(99.0)),
            max_jitter_us: snap.max_jitter_ns as f64 / 1e3,
            overruns: snap.overrun_count,
            collisions: timer.handle().callback_collisions(),
            rt_priority,
        })
    })
    .join()
    .map_err(|_| "measurement thread panicked".to_string())?
}

/// Get current process memory usage in bytes.
pub fn get_memory_usage() -> u64 {
    fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|status| {
            status
                .lines()
                .find(|line| line.starts_with("VmRSS:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok())
        })
        .map_or(0, |kb| kb * 1024)
}

#[derive(Serialize)]
struct Report<'a> {
    test: &'a str,
    passed: bool,
    jitter: &'a JitterStats,
    notes: &'a str,
}

/// Generate a JSON report from test results.
pub fn generate_report(test_name: &str, stats: &JitterStats, passed: bool, notes: &str) -> String {
    serde_json::to_string_pretty(&Report {
        test: test_name,
        passed,
        jitter: stats,
        notes,
    })
    .unwrap_or_default()
}

/// Acceptance criteria for jitter tests.
pub struct AcceptanceCriteria {
    /// Maximum acceptable deviation of any interval from the period.
    pub max_jitter_us: f64,
    /// Maximum acceptable deviation of the mean interval from the period.
    pub max_mean_error_us: f64,
    /// Maximum acceptable overrun count.
    pub max_overruns: u64,
}

impl Default for AcceptanceCriteria {
    fn default() -> Self {
        Self {
            max_jitter_us: 200.0,
            max_mean_error_us: 20.0,
            max_overruns: 0,
        }
    }
}

impl AcceptanceCriteria {
    /// Loose bounds for a shared, non-real-time test machine.
    pub fn best_effort() -> Self {
        Self {
            max_jitter_us: f64::INFINITY,
            max_mean_error_us: 500.0,
            max_overruns: u64::MAX,
        }
    }

    /// Check if jitter stats meet acceptance criteria.
    pub fn check(&self, stats: &JitterStats) -> bool {
        stats.collisions == 0
            && stats.max_jitter_us <= self.max_jitter_us
            && (stats.mean_us - stats.period_us).abs() <= self.max_mean_error_us
            && stats.overruns <= self.max_overruns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats() -> JitterStats {
        JitterStats {
            period_us: 1000.0,
            samples: 100,
            min_us: 950.0,
            mean_us: 1001.0,
            max_us: 1080.0,
            p99_us: 1050.0,
            max_jitter_us: 80.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_acceptance_criteria_pass() {
        assert!(AcceptanceCriteria::default().check(&stats()));
    }

    #[test]
    fn test_acceptance_criteria_fail_jitter() {
        let stats = JitterStats {
            max_jitter_us: 250.0,
            ..stats()
        };
        assert!(!AcceptanceCriteria::default().check(&stats));
        assert!(AcceptanceCriteria::best_effort().check(&stats));
    }

    #[test]
    fn test_collisions_always_fail() {
        let stats = JitterStats {
            collisions: 1,
            ..stats()
        };
        assert!(!AcceptanceCriteria::best_effort().check(&stats));
    }

    #[test]
    fn test_generate_report() {
        let report = generate_report("test", &stats(), true, "ok");
        assert!(report.contains("\"test\": \"test\""));
        assert!(report.contains("\"passed\": true"));
        assert!(report.contains("\"max_jitter_us\": 80.0"));
    }

    #[test]
    fn test_memory_usage() {
        assert!(get_memory_usage() > 0);
    }
}
