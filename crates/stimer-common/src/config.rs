//! Configuration structures for the tick generator and its timer.
//!
//! Supports TOML deserialization with sensible defaults; every section can be
//! omitted.

use crate::daytime::DayClockSource;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level tick generator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    /// Timer period in milliseconds (fractional values allowed).
    pub interval_ms: f64,

    /// Stop after this many ticks (0 = run until interrupted).
    pub max_ticks: u64,

    /// Interval between periodic status log lines.
    #[serde(with = "humantime_serde")]
    pub report_interval: Duration,

    /// Clock used for day-time stamps.
    pub day_clock: DayClockSource,

    /// Kernel timer configuration.
    pub timer: TimerConfig,

    /// Real-time scheduling configuration.
    pub realtime: RealtimeConfig,

    /// Pulse output configuration.
    pub output: OutputConfig,

    /// Statistics configuration.
    pub metrics: MetricsConfig,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            interval_ms: 100.0,
            max_ticks: 0,
            report_interval: Duration::from_secs(10),
            day_clock: DayClockSource::default(),
            timer: TimerConfig::default(),
            realtime: RealtimeConfig::default(),
            output: OutputConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

/// Clock driving the kernel interval timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimerClock {
    /// `CLOCK_REALTIME`.
    #[default]
    Realtime,
    /// `CLOCK_MONOTONIC`.
    Monotonic,
    /// `CLOCK_BOOTTIME` (keeps counting across suspend).
    Boottime,
}

/// Kernel timer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Clock the timer is created against.
    pub clock: TimerClock,

    /// Notification signal, as an offset from `SIGRTMIN`.
    ///
    /// Change this if the host already uses `SIGRTMIN` for something else.
    pub signal_offset: u8,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            clock: TimerClock::Realtime,
            signal_offset: 0,
        }
    }
}

/// Real-time scheduling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Request real-time scheduling (requires privileges).
    pub enabled: bool,

    /// Scheduler policy: "fifo" or "rr" (round-robin).
    pub policy: SchedPolicy,

    /// Scheduler priority (1-99); `None` selects the policy maximum.
    pub priority: Option<u8>,

    /// Lock all memory pages (mlockall).
    pub lock_memory: bool,

    /// Abort startup if real-time scheduling cannot be applied.
    pub fail_fast: bool,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            policy: SchedPolicy::Fifo,
            priority: None,
            lock_memory: false,
            fail_fast: false,
        }
    }
}

/// Scheduler policy for real-time threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchedPolicy {
    /// SCHED_FIFO: First-in-first-out real-time.
    #[default]
    Fifo,
    /// SCHED_RR: Round-robin real-time.
    Rr,
}

/// Pulse output configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Idle level is high, pulses are low.
    pub negative: bool,

    /// Toggle on every tick (square wave with period 2T) instead of pulsing.
    pub meandr: bool,

    /// Pulse width in busy-loop iterations.
    pub tau: u32,
}

/// Statistics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Size of the interval histogram ring buffer.
    pub histogram_size: usize,

    /// Percentiles to report (e.g., [50, 99, 99.9]).
    pub percentiles: Vec<f64>,

    /// Intervals deviating from the period by more than this count as late.
    #[serde(with = "humantime_serde")]
    pub late_threshold: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            histogram_size: 10_000,
            percentiles: vec![50.0, 90.0, 99.0, 99.9],
            late_threshold: Duration::from_micros(500),
        }
    }
}

impl TickConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or the values are out of range.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.interval_ms.is_finite() && self.interval_ms > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "interval_ms must be a positive number, got {}",
                self.interval_ms
            )));
        }
        let seconds = self.interval_ms * 1e-3;
        if seconds >= libc::time_t::MAX as f64 || Duration::try_from_secs_f64(seconds).is_err() {
            return Err(ConfigError::Invalid(format!(
                "interval_ms is too large, got {}",
                self.interval_ms
            )));
        }
        if let Some(priority) = self.realtime.priority {
            if !(1..=99).contains(&priority) {
                return Err(ConfigError::Invalid(format!(
                    "realtime.priority must be in 1..=99, got {priority}"
                )));
            }
        }
        if self.metrics.histogram_size == 0 {
            return Err(ConfigError::Invalid(
                "metrics.histogram_size must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Timer period as a `Duration` (used for statistics).
    ///
    /// Saturates at `Duration::MAX` for intervals [`validate`](Self::validate)
    /// rejects; non-positive or NaN intervals give zero.
    #[must_use]
    pub fn period(&self) -> Duration {
        let seconds = self.interval_ms * 1e-3;
        if seconds > 0.0 {
            Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
        } else {
            Duration::ZERO
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
