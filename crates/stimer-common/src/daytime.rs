//! Fixed-point time of day.
//!
//! A [`DayTick`] is a `u32` where the full range `[0, 2^32)` maps linearly
//! onto `[0, 86400)` seconds since local midnight, so one LSB is
//! `86400 / 2^32` s (about 20.1 µs). Differences between two ticks taken less
//! than 12 hours apart are computed with wrapping arithmetic and read as `i32`.
//!
//! # Clock source
//!
//! [`DayTick::now`] samples `CLOCK_MONOTONIC` and projects its seconds through
//! `localtime_r`. This is only meaningful while the offset between the
//! monotonic epoch and local midnight stays constant for the life of the
//! process; the value does not follow wall-clock midnight. Use
//! [`DayClockSource::Realtime`] for true time-of-day (which may jump when the
//! system clock is adjusted).

use nix::time::{clock_gettime, ClockId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Seconds in one day.
pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Number of distinct tick values in one day.
const TICKS_PER_DAY: f64 = 4_294_967_296.0;

/// Seconds represented by one tick.
const SECONDS_PER_TICK: f64 = SECONDS_PER_DAY / TICKS_PER_DAY;

/// Ticks per second.
const TICKS_PER_SECOND: f64 = TICKS_PER_DAY / SECONDS_PER_DAY;

const MICROS_PER_DAY: u128 = 86_400_000_000;

/// Clock sampled by [`DayTick::now_from`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DayClockSource {
    /// `CLOCK_MONOTONIC` projected onto local calendar fields.
    #[default]
    Monotonic,
    /// `CLOCK_REALTIME` (wall clock).
    Realtime,
}

impl DayClockSource {
    fn clock_id(self) -> ClockId {
        match self {
            Self::Monotonic => ClockId::CLOCK_MONOTONIC,
            Self::Realtime => ClockId::CLOCK_REALTIME,
        }
    }
}

/// 32-bit fixed-point time of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DayTick(pub u32);

impl DayTick {
    /// Midnight.
    pub const MIDNIGHT: DayTick = DayTick(0);

    /// Sample the monotonic clock.
    #[must_use]
    pub fn now() -> Self {
        Self::now_from(DayClockSource::Monotonic)
    }

    /// Sample the given clock source.
    ///
    /// Returns [`DayTick::MIDNIGHT`] if the clock cannot be read.
    #[must_use]
    pub fn now_from(source: DayClockSource) -> Self {
        match clock_gettime(source.clock_id()) {
            Ok(ts) => {
                let seconds = local_seconds_of_day(ts.tv_sec());
                Self::from_seconds(f64::from(seconds) + ts.tv_nsec() as f64 * 1e-9)
            }
            Err(_) => Self::MIDNIGHT,
        }
    }

    /// Scale seconds since midnight into ticks, truncating.
    ///
    /// Values outside `[0, 86400)` saturate at the range ends.
    #[must_use]
    pub fn from_seconds(seconds: f64) -> Self {
        // `as` saturates for out-of-range floats and maps NaN to 0.
        Self((seconds * TICKS_PER_SECOND) as u32)
    }

    /// Seconds since midnight, in `[0, 86400)`.
    #[must_use]
    pub fn to_seconds(self) -> f64 {
        f64::from(self.0) * SECONDS_PER_TICK
    }

    /// Signed distance from `earlier` to `self`, modulo one day.
    #[must_use]
    pub fn wrapping_delta(self, earlier: DayTick) -> i32 {
        self.0.wrapping_sub(earlier.0) as i32
    }

    /// Raw fixed-point value.
    #[must_use]
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Convert a tick delta to seconds, in `(-43200, 43200]`.
#[must_use]
pub fn delta_to_seconds(delta: i32) -> f64 {
    f64::from(delta) * SECONDS_PER_TICK
}

/// Split a second count into whole seconds and nanoseconds.
///
/// The integer part truncates toward zero, so negative inputs yield a
/// non-positive nanosecond part. Nanoseconds come from the fractional
/// remainder rather than from an independent rounding of `t`.
#[must_use]
pub fn timespec_from_seconds(t: f64) -> (i64, i64) {
    let seconds = t as i64;
    let nanoseconds = ((t - seconds as f64) * 1e9) as i64;
    (seconds, nanoseconds)
}

/// Seconds since local midnight for an epoch-relative second count.
fn local_seconds_of_day(epoch_seconds: i64) -> u32 {
    let time = epoch_seconds as libc::time_t;
    // SAFETY: zeroed `tm` is a valid out-parameter for localtime_r.
    let mut tm: libc::tm = unsafe { std::mem::zeroed() };
    // SAFETY: both pointers reference live stack values.
    let result = unsafe { libc::localtime_r(&time, &mut tm) };
    if result.is_null() {
        return 0;
    }
    (tm.tm_sec + tm.tm_min * 60 + tm.tm_hour * 3600).clamp(0, 86_399) as u32
}

impl fmt::Display for DayTick {
    /// `HH:MM:SS.uuuuuu`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = self.to_seconds();
        let whole = t as u32;
        let h = whole / 3600;
        let m = (whole / 60) % 60;
        let s = whole % 60;
        // Sub-second part from the unrounded value.
        let us = ((t - f64::from(h * 3600 + m * 60 + s)) * 1e6) as u32;
        write!(f, "{h:02}:{m:02}:{s:02}.{us:06}")
    }
}

/// Error parsing a `HH:MM:SS[.uuuuuu]` string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid day time {input:?}: {reason}")]
pub struct ParseDayTickError {
    input: String,
    reason: &'static str,
}

impl FromStr for DayTick {
    type Err = ParseDayTickError;

    /// Parse `HH:MM:SS[.uuuuuu]`, rounding up to the first tick at or after
    /// the given instant so that formatting reproduces the same second.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason| ParseDayTickError {
            input: s.to_string(),
            reason,
        };

        let (clock, fraction) = match s.split_once('.') {
            Some((clock, fraction)) => (clock, Some(fraction)),
            None => (s, None),
        };

        let mut fields = clock.split(':');
        let mut next_field = |limit: u64| -> Result<u64, ParseDayTickError> {
            let field = fields.next().ok_or_else(|| err("expected HH:MM:SS"))?;
            if field.len() != 2 {
                return Err(err("fields must have two digits"));
            }
            let value: u64 = field.parse().map_err(|_| err("non-numeric field"))?;
            if value >= limit {
                return Err(err("field out of range"));
            }
            Ok(value)
        };
        let h = next_field(24)?;
        let m = next_field(60)?;
        let sec = next_field(60)?;
        if fields.next().is_some() {
            return Err(err("expected HH:MM:SS"));
        }

        let micros = match fraction {
            None => 0,
            Some(digits) => {
                if digits.is_empty() || digits.len() > 6 || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(err("fraction must be 1-6 digits"));
                }
                let value: u64 = digits.parse().map_err(|_| err("non-numeric fraction"))?;
                value * 10u64.pow(6 - digits.len() as u32)
            }
        };

        let total_us = u128::from((h * 3600 + m * 60 + sec) * 1_000_000 + micros);
        let ticks = (total_us << 32).div_ceil(MICROS_PER_DAY);
        Ok(Self(u32::try_from(ticks).unwrap_or(u32::MAX)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_to_seconds_endpoints() {
        assert_eq!(DayTick(0).to_seconds(), 0.0);
        let last = DayTick(u32::MAX).to_seconds();
        assert!(last < SECONDS_PER_DAY);
        assert!(SECONDS_PER_DAY - last <= SECONDS_PER_TICK);
    }

    #[test]
    fn test_timespec_from_seconds() {
        assert_eq!(timespec_from_seconds(1.5), (1, 500_000_000));
        assert_eq!(timespec_from_seconds(0.000_001), (0, 1000));
        assert_eq!(timespec_from_seconds(0.1), (0, 100_000_000));
        assert_eq!(timespec_from_seconds(0.0), (0, 0));
    }

    #[test]
    fn test_timespec_negative_truncates_toward_zero() {
        assert_eq!(timespec_from_seconds(-1.5), (-1, -500_000_000));
    }

    #[test]
    fn test_format() {
        assert_eq!(DayTick(0).to_string(), "00:00:00.000000");
        assert_eq!(DayTick::from_seconds(3600.0).to_string(), "00:59:59.999986");
        assert_eq!(DayTick(u32::MAX).to_string(), "23:59:59.999979");
        // 12:00:00 is exactly 2^31 ticks.
        assert_eq!(DayTick(1 << 31).to_string(), "12:00:00.000000");
    }

    #[test]
    fn test_parse() {
        assert_eq!("12:00:00".parse::<DayTick>().unwrap(), DayTick(1 << 31));
        assert_eq!("00:00:00.000000".parse::<DayTick>().unwrap(), DayTick(0));
        assert_eq!(
            "01:02:03.5".parse::<DayTick>().unwrap().to_string(),
            "01:02:03.500000"
        );
        assert!("24:00:00".parse::<DayTick>().is_err());
        assert!("1:00:00".parse::<DayTick>().is_err());
        assert!("10:00".parse::<DayTick>().is_err());
        assert!("10:00:00.".parse::<DayTick>().is_err());
        assert!("10:00:00.1234567".parse::<DayTick>().is_err());
        assert_eq!(
            "23:59:59.999999".parse::<DayTick>().unwrap(),
            DayTick(u32::MAX)
        );
    }

    #[test]
    fn test_delta_wraps_over_midnight() {
        let before = DayTick::from_seconds(SECONDS_PER_DAY - 1.0);
        let after = DayTick::from_seconds(1.0);
        let delta = delta_to_seconds(after.wrapping_delta(before));
        assert!((delta - 2.0).abs() < 2.0 * SECONDS_PER_TICK);

        let back = delta_to_seconds(before.wrapping_delta(after));
        assert!((back + 2.0).abs() < 2.0 * SECONDS_PER_TICK);
    }

    #[test]
    fn test_delta_range() {
        assert_eq!(delta_to_seconds(i32::MIN), -43_200.0);
        assert!(delta_to_seconds(i32::MAX) < 43_200.0);
    }

    #[test]
    fn test_now_is_in_range() {
        for source in [DayClockSource::Monotonic, DayClockSource::Realtime] {
            let tick = DayTick::now_from(source);
            assert!(tick.to_seconds() < SECONDS_PER_DAY);
        }
    }

    #[test]
    fn test_now_samples_advance() {
        let first = DayTick::now();
        std::thread::sleep(std::time::Duration::from_millis(20));
        let second = DayTick::now();
        let elapsed = delta_to_seconds(second.wrapping_delta(first));
        assert!(elapsed > 0.015, "elapsed {elapsed}");
        assert!(elapsed < 5.0, "elapsed {elapsed}");
    }

    proptest! {
        #[test]
        fn prop_to_seconds_monotonic(a in any::<u32>(), b in any::<u32>()) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(DayTick(lo).to_seconds() <= DayTick(hi).to_seconds());
        }

        #[test]
        fn prop_format_parse_keeps_whole_seconds(raw in any::<u32>()) {
            let text = DayTick(raw).to_string();
            let parsed: DayTick = text.parse().unwrap();
            prop_assert_eq!(&parsed.to_string()[..8], &text[..8]);
            prop_assert!(parsed <= DayTick(raw));
        }

        #[test]
        fn prop_delta_matches_plain_difference(
            start in any::<u32>(),
            step in -(i32::MAX / 2)..(i32::MAX / 2),
        ) {
            let first = DayTick(start);
            let second = DayTick(start.wrapping_add(step as u32));
            let delta = delta_to_seconds(second.wrapping_delta(first));

            let mut plain = second.to_seconds() - first.to_seconds();
            if plain > SECONDS_PER_DAY / 2.0 {
                plain -= SECONDS_PER_DAY;
            } else if plain <= -SECONDS_PER_DAY / 2.0 {
                plain += SECONDS_PER_DAY;
            }
            prop_assert!((delta - plain).abs() < 1e-6);
        }

        #[test]
        fn prop_timespec_nanos_in_range(t in 0.0f64..1.0e6) {
            let (secs, nanos) = timespec_from_seconds(t);
            prop_assert!(secs >= 0);
            prop_assert!((0..1_000_000_000).contains(&nanos));
        }
    }
}
