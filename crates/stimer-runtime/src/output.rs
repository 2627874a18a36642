//! Digital output abstraction driven by the tick callback.
//!
//! Hardware drivers live outside this crate; [`FakeOutput`] keeps the levels in
//! memory so the generator can run (and be tested) without any hardware.

use stimer_common::error::OutputError;

/// A single digital output line.
pub trait DigitalOutput {
    /// Drive the line to `level` (`true` = high).
    ///
    /// # Errors
    ///
    /// Returns [`OutputError`] if the level cannot be written.
    fn set(&mut self, level: bool) -> Result<(), OutputError>;

    /// Return the line to a safe state before shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`OutputError`] if the line cannot be released.
    fn release(&mut self) -> Result<(), OutputError> {
        Ok(())
    }
}

impl<O: DigitalOutput + ?Sized> DigitalOutput for Box<O> {
    fn set(&mut self, level: bool) -> Result<(), OutputError> {
        (**self).set(level)
    }

    fn release(&mut self) -> Result<(), OutputError> {
        (**self).release()
    }
}

/// In-memory output that records level transitions.
#[derive(Debug, Default)]
pub struct FakeOutput {
    level: bool,
    writes: u64,
    rising_edges: u64,
    falling_edges: u64,
    released: bool,
    /// Fail every write once this many have succeeded.
    fail_after: Option<u64>,
}

impl FakeOutput {
    /// Create a fake output starting low.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fake output that rejects writes after `writes` successful ones.
    pub fn failing_after(writes: u64) -> Self {
        Self {
            fail_after: Some(writes),
            ..Self::default()
        }
    }

    /// Current level.
    pub fn level(&self) -> bool {
        self.level
    }

    /// Successful writes, including ones that did not change the level.
    pub fn writes(&self) -> u64 {
        self.writes
    }

    /// Low-to-high transitions.
    pub fn rising_edges(&self) -> u64 {
        self.rising_edges
    }

    /// High-to-low transitions.
    pub fn falling_edges(&self) -> u64 {
        self.falling_edges
    }

    /// Whether [`DigitalOutput::release`] was called.
    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl DigitalOutput for FakeOutput {
    fn set(&mut self, level: bool) -> Result<(), OutputError> {
        if self.released {
            return Err(OutputError::Unavailable("output released".into()));
        }
        if self.fail_after.is_some_and(|limit| self.writes >= limit) {
            return Err(OutputError::Write(format!(
                "simulated failure after {} writes",
                self.writes
            )));
        }
        match (self.level, level) {
            (false, true) => self.rising_edges += 1,
            (true, false) => self.falling_edges += 1,
            _ => {}
        }
        self.level = level;
        self.writes += 1;
        Ok(())
    }

    fn release(&mut self) -> Result<(), OutputError> {
        self.released = true;
        Ok(())
    }
}
