//! Tick interval statistics.
//!
//! Keeps a fixed-size ring buffer of observed inter-tick intervals so that
//! recording never allocates after construction.

use serde::Serialize;
use std::time::Duration;

/// Inter-tick interval statistics with ring buffer for jitter tracking.
#[derive(Debug)]
pub struct TickMetrics {
    /// Ring buffer of intervals in nanoseconds.
    samples: Box<[u64]>,
    write_pos: usize,
    /// Number of samples held (saturates at buffer size).
    sample_count: usize,
    /// Intervals recorded.
    total_intervals: u64,
    min_ns: u64,
    max_ns: u64,
    sum_ns: u64,
    /// Largest absolute deviation from the period.
    max_jitter_ns: u64,
    /// Intervals deviating from the period by more than the threshold.
    late_count: u64,
    /// Kernel-reported overruns, mirrored from the timer.
    overrun_count: u64,
    period_ns: u64,
    late_threshold_ns: u64,
}

impl TickMetrics {
    /// Create a collector for the given nominal period.
    ///
    /// # Arguments
    ///
    /// * `histogram_size` - Number of samples to retain in the ring buffer.
    /// * `period` - Nominal tick period.
    /// * `late_threshold` - Allowed deviation before an interval counts as late.
    #[must_use]
    pub fn new(histogram_size: usize, period: Duration, late_threshold: Duration) -> Self {
        let size = histogram_size.max(1);
        Self {
            samples: vec![0u64; size].into_boxed_slice(),
            write_pos: 0,
            sample_count: 0,
            total_intervals: 0,
            min_ns: u64::MAX,
            max_ns: 0,
            sum_ns: 0,
            max_jitter_ns: 0,
            late_count: 0,
            overrun_count: 0,
            period_ns: duration_ns(period),
            late_threshold_ns: duration_ns(late_threshold),
        }
    }

    /// Record one inter-tick interval.
    pub fn record(&mut self, interval: Duration) {
        self.record_ns(duration_ns(interval));
    }

    /// Record an interval given in seconds (e.g. from a day-tick delta).
    ///
    /// Negative values (clock stepped backwards) are recorded as zero.
    pub fn record_seconds(&mut self, seconds: f64) {
        self.record_ns((seconds.max(0.0) * 1e9) as u64);
    }

    /// Record an interval in nanoseconds.
    pub fn record_ns(&mut self, ns: u64) {
        self.samples[self.write_pos] = ns;
        self.write_pos = (self.write_pos + 1) % self.samples.len();
        self.sample_count = self.sample_count.saturating_add(1).min(self.samples.len());

        self.total_intervals += 1;
        self.min_ns = self.min_ns.min(ns);
        self.max_ns = self.max_ns.max(ns);
        self.sum_ns = self.sum_ns.wrapping_add(ns);

        let jitter = ns.abs_diff(self.period_ns);
        self.max_jitter_ns = self.max_jitter_ns.max(jitter);
        if jitter > self.late_threshold_ns {
            self.late_count += 1;
        }
    }

    /// Mirror the timer's overrun counter.
    pub fn set_overrun_count(&mut self, overruns: u64) {
        self.overrun_count = overruns;
    }

    /// Number of intervals recorded.
    #[must_use]
    pub fn total_intervals(&self) -> u64 {
        self.total_intervals
    }

    /// Shortest observed interval.
    #[must_use]
    pub fn min(&self) -> Option<Duration> {
        (self.total_intervals > 0).then(|| Duration::from_nanos(self.min_ns))
    }

    /// Longest observed interval.
    #[must_use]
    pub fn max(&self) -> Option<Duration> {
        (self.total_intervals > 0).then(|| Duration::from_nanos(self.max_ns))
    }

    /// Mean interval.
    #[must_use]
    pub fn mean(&self) -> Option<Duration> {
        (self.total_intervals > 0).then(|| Duration::from_nanos(self.sum_ns / self.total_intervals))
    }

    /// Number of late intervals.
    #[must_use]
    pub fn late_count(&self) -> u64 {
        self.late_count
    }

    /// Kernel-reported overruns.
    #[must_use]
    pub fn overrun_count(&self) -> u64 {
        self.overrun_count
    }

    /// Compute a percentile (0.0 to 100.0) over the retained samples.
    ///
    /// Returns `None` without samples or for an out-of-range percentile.
    #[must_use]
    pub fn percentile(&self, percentile: f64) -> Option<Duration> {
        self.percentiles(&[percentile]).first().map(|&(_, d)| d)
    }

    /// Compute several percentiles with a single sort.
    ///
    /// Invalid percentiles (< 0, > 100, or NaN) are skipped.
    #[must_use]
    pub fn percentiles(&self, percentiles: &[f64]) -> Vec<(f64, Duration)> {
        if self.sample_count == 0 {
            return vec![];
        }

        let mut sorted: Vec<u64> = self.samples[..self.sample_count].to_vec();
        sorted.sort_unstable();

        percentiles
            .iter()
            .filter(|p| (0.0..=100.0).contains(*p))
            .map(|&p| {
                let idx = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
                (p, Duration::from_nanos(sorted[idx.min(sorted.len() - 1)]))
            })
            .collect()
    }

    /// Get a snapshot of current statistics.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let any = self.total_intervals > 0;
        MetricsSnapshot {
            total_intervals: self.total_intervals,
            min_ns: any.then_some(self.min_ns),
            max_ns: any.then_some(self.max_ns),
            mean_ns: any.then(|| self.sum_ns / self.total_intervals),
            max_jitter_ns: self.max_jitter_ns,
            late_count: self.late_count,
            overrun_count: self.overrun_count,
            period_ns: self.period_ns,
        }
    }
}

fn duration_ns(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Immutable snapshot of tick statistics for reporting.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricsSnapshot {
    /// Intervals recorded.
    pub total_intervals: u64,
    /// Shortest interval in nanoseconds.
    pub min_ns: Option<u64>,
    /// Longest interval in nanoseconds.
    pub max_ns: Option<u64>,
    /// Mean interval in nanoseconds.
    pub mean_ns: Option<u64>,
    /// Largest absolute deviation from the period in nanoseconds.
    pub max_jitter_ns: u64,
    /// Late intervals.
    pub late_count: u64,
    /// Kernel-reported overruns.
    pub overrun_count: u64,
    /// Nominal period in nanoseconds.
    pub period_ns: u64,
}

impl MetricsSnapshot {
    /// Spread between longest and shortest interval in nanoseconds.
    #[must_use]
    pub fn spread_ns(&self) -> Option<u64> {
        match (self.min_ns, self.max_ns) {
            (Some(min), Some(max)) => Some(max - min),
            _ => None,
        }
    }
}
