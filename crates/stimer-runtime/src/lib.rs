#![doc = "Signal-driven interval timer and pulse output for stimer."]

#[cfg(target_os = "linux")]
pub mod interval_timer;
#[cfg(target_os = "linux")]
mod notify;
pub mod output;
pub mod pulse;
pub mod realtime;

#[cfg(target_os = "linux")]
pub use interval_timer::*;
pub use output::*;
pub use pulse::*;
pub use realtime::*;
