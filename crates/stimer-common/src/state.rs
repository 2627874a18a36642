//! Lifecycle state machine for an interval timer.
//!
//! UNINITIALIZED → READY → RUNNING → STOPPED
//!
//! STOPPED is terminal: re-arming requires a fresh timer instance.

use crate::error::{TimerError, TimerResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states of an interval timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimerState {
    /// No kernel resources exist yet.
    #[default]
    Uninitialized,
    /// Handler installed, signal blocked, kernel timer created but disarmed.
    Ready,
    /// Timer armed and ticking.
    Running,
    /// Loop exited; the instance cannot be restarted.
    Stopped,
}

impl TimerState {
    /// Upper-case name used in logs and errors.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "UNINITIALIZED",
            Self::Ready => "READY",
            Self::Running => "RUNNING",
            Self::Stopped => "STOPPED",
        }
    }

    /// Check if a transition to `target` is valid from the current state.
    #[must_use]
    pub fn can_transition_to(&self, target: TimerState) -> bool {
        use TimerState::{Ready, Running, Stopped, Uninitialized};

        matches!(
            (self, target),
            (Uninitialized, Ready)
                | (Ready, Running)
                | (Running, Stopped)
                // Never started, torn down directly
                | (Ready, Stopped)
        )
    }

    /// Returns true if the timer is armed.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for TimerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State machine wrapper with transition history tracking.
#[derive(Debug, Clone)]
pub struct StateMachine {
    current: TimerState,
    previous: Option<TimerState>,
    transition_count: u64,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Create a new state machine starting in UNINITIALIZED.
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: TimerState::Uninitialized,
            previous: None,
            transition_count: 0,
        }
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> TimerState {
        self.current
    }

    /// Get the previous state (if any transition occurred).
    #[must_use]
    pub fn previous_state(&self) -> Option<TimerState> {
        self.previous
    }

    /// Get total number of transitions.
    #[must_use]
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Fail with `InvalidStateTransition` unless `target` is reachable.
    pub fn ensure_can_transition(&self, target: TimerState) -> TimerResult<()> {
        if self.current.can_transition_to(target) {
            Ok(())
        } else {
            Err(TimerError::InvalidStateTransition {
                from: self.current.as_str(),
                to: target.as_str(),
            })
        }
    }

    /// Attempt a state transition.
    pub fn transition(&mut self, target: TimerState) -> TimerResult<()> {
        self.ensure_can_transition(target)?;
        self.previous = Some(self.current);
        self.current = target;
        self.transition_count += 1;
        Ok(())
    }
}
