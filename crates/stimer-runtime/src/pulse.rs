//! Clock-pulse generator run from the timer callback.
//!
//! Two waveforms are supported:
//!
//! - **Pulse**: on every tick the output goes to the active level, is held for
//!   `tau` busy-loop iterations, then returns to idle.
//! - **Meander**: the output toggles on every tick, producing a square wave
//!   with period `2·T`.
//!
//! With `negative` set, idle is high and the active level is low.
//!
//! Every tick also stamps the local day time and feeds the inter-tick interval
//! into [`TickMetrics`].

use crate::output::DigitalOutput;
use serde::Serialize;
use std::hint::black_box;
use stimer_common::config::OutputConfig;
use stimer_common::daytime::{delta_to_seconds, DayClockSource, DayTick};
use stimer_common::error::OutputError;
use stimer_common::metrics::TickMetrics;
use tracing::{error, trace};

/// Callback result reported when the output cannot be driven.
pub const OUTPUT_FAILURE: i32 = -1;

/// Per-tick observation, emitted as one JSON line in data mode.
#[derive(Debug, Clone, Serialize)]
pub struct TickSample {
    /// 1-based tick number.
    pub tick: u64,
    /// Local day time of the tick (`HH:MM:SS.uuuuuu`).
    pub daytime: String,
    /// Seconds since the previous tick, absent on the first one.
    pub interval_s: Option<f64>,
    /// Output level after the tick.
    pub level: bool,
}

/// Drives a [`DigitalOutput`] once per timer tick.
#[derive(Debug)]
pub struct PulseGenerator<O> {
    output: O,
    negative: bool,
    meandr: bool,
    tau: u32,
    level: bool,
    clock: DayClockSource,
    last_tick: Option<DayTick>,
    last_interval: Option<f64>,
    ticks: u64,
    metrics: TickMetrics,
    last_error: Option<OutputError>,
}

impl<O: DigitalOutput> PulseGenerator<O> {
    /// Create a generator; call [`init`](Self::init) before the first tick.
    pub fn new(output: O, config: &OutputConfig, metrics: TickMetrics) -> Self {
        Self {
            output,
            negative: config.negative,
            meandr: config.meandr,
            tau: config.tau,
            level: config.negative,
            clock: DayClockSource::default(),
            last_tick: None,
            last_interval: None,
            ticks: 0,
            metrics,
            last_error: None,
        }
    }

    /// Use `clock` for the per-tick day-time stamps.
    #[must_use]
    pub fn with_day_clock(mut self, clock: DayClockSource) -> Self {
        self.clock = clock;
        self
    }

    /// Drive the output to its idle level.
    ///
    /// # Errors
    ///
    /// Returns the output's error.
    pub fn init(&mut self) -> Result<(), OutputError> {
        self.level = self.idle_level();
        self.output.set(self.level)
    }

    /// Tick callback body: `0` to keep running, [`OUTPUT_FAILURE`] otherwise.
    ///
    /// The failure itself is kept in [`last_error`](Self::last_error).
    pub fn on_tick(&mut self) -> i32 {
        let now = DayTick::now_from(self.clock);
        self.last_interval = self
            .last_tick
            .map(|prev| delta_to_seconds(now.wrapping_delta(prev)));
        if let Some(interval) = self.last_interval {
            self.metrics.record_seconds(interval);
        }
        self.last_tick = Some(now);
        self.ticks += 1;

        let result = if self.meandr {
            self.toggle()
        } else {
            self.pulse()
        };

        match result {
            Ok(()) => {
                trace!(tick = self.ticks, %now, level = self.level, "Tick");
                0
            }
            Err(e) => {
                error!(tick = self.ticks, error = %e, "Output write failed");
                self.last_error = Some(e);
                OUTPUT_FAILURE
            }
        }
    }

    fn toggle(&mut self) -> Result<(), OutputError> {
        let next = !self.level;
        self.output.set(next)?;
        self.level = next;
        Ok(())
    }

    fn pulse(&mut self) -> Result<(), OutputError> {
        let active = !self.idle_level();
        self.output.set(active)?;
        self.level = active;

        for i in 0..self.tau {
            black_box(i);
        }

        let idle = self.idle_level();
        self.output.set(idle)?;
        self.level = idle;
        Ok(())
    }

    /// Return the output to idle and release it.
    ///
    /// # Errors
    ///
    /// Returns the first output error; release is attempted either way.
    pub fn release(&mut self) -> Result<(), OutputError> {
        let idle = self.output.set(self.idle_level());
        let released = self.output.release();
        idle.and(released)
    }

    /// The most recent tick as a serializable sample.
    pub fn sample(&self) -> Option<TickSample> {
        self.last_tick.map(|tick| TickSample {
            tick: self.ticks,
            daytime: tick.to_string(),
            interval_s: self.last_interval,
            level: self.level,
        })
    }

    fn idle_level(&self) -> bool {
        self.negative
    }

    /// Ticks handled.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Current output level.
    pub fn level(&self) -> bool {
        self.level
    }

    /// Interval statistics.
    pub fn metrics(&self) -> &TickMetrics {
        &self.metrics
    }

    /// Mutable statistics, e.g. to mirror the timer's overrun count.
    pub fn metrics_mut(&mut self) -> &mut TickMetrics {
        &mut self.metrics
    }

    /// Error that ended the last failing tick.
    pub fn last_error(&self) -> Option<&OutputError> {
        self.last_error.as_ref()
    }

    /// The driven output.
    pub fn output(&self) -> &O {
        &self.output
    }
}
