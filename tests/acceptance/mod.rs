//! Integration tests for stimer acceptance testing.
//!
//! These tests verify timing characteristics of the signal-driven timer:
//! - Tick interval jitter with and without real-time scheduling
//! - Long-duration stability (soak tests)
//!
//! Real-time tests require:
//! - Root privileges or CAP_SYS_NICE
//! - PREEMPT_RT kernel (recommended)

mod common;
mod jitter_test;
mod soak_test;
