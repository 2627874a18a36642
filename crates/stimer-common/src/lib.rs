#![doc = "Common types shared across the stimer workspace."]

pub mod config;
pub mod daytime;
pub mod error;
pub mod metrics;
pub mod state;

pub use config::*;
pub use daytime::*;
pub use error::*;
pub use metrics::*;
pub use state::*;
