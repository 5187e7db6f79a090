//! Runtime lifecycle state machine.
//!
//! State transitions follow the firmware lifecycle:
//! BOOT → SETUP → LOOP → (BOOT on reboot | HALTED on stop)
//!
//! A failing setup stage or task body moves the runtime to FAULT, from
//! which only a reboot or a halt is possible.

use crate::error::{McuError, McuResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Runtime states for the firmware lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuntimeState {
    /// Power-on; nothing has run yet.
    #[default]
    Boot,
    /// Setup stages are running.
    Setup,
    /// Periodic tasks are being swept.
    Loop,
    /// A stage or task body failed without recovering.
    Fault,
    /// Stopped on request; no further sweeps.
    Halted,
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boot => write!(f, "BOOT"),
            Self::Setup => write!(f, "SETUP"),
            Self::Loop => write!(f, "LOOP"),
            Self::Fault => write!(f, "FAULT"),
            Self::Halted => write!(f, "HALTED"),
        }
    }
}

impl RuntimeState {
    /// Check if a transition to `target` is valid from the current state.
    #[must_use]
    pub fn can_transition_to(&self, target: RuntimeState) -> bool {
        use RuntimeState::{Boot, Fault, Halted, Loop, Setup};

        matches!(
            (self, target),
            // Normal forward progression
            (Boot, Setup)
                | (Setup, Loop)
                // Body failures
                | (Boot, Fault)
                | (Setup, Fault)
                | (Loop, Fault)
                // Reboot, from a healthy loop or after a fault
                | (Loop, Boot)
                | (Fault, Boot)
                // Stop
                | (Loop, Halted)
                | (Fault, Halted)
                // Restart after a halt
                | (Halted, Boot)
        )
    }

    /// Returns true while setup or the loop is making progress.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Setup | Self::Loop)
    }
}

/// State machine wrapper with transition history tracking.
#[derive(Debug, Clone)]
pub struct StateMachine {
    current: RuntimeState,
    previous: Option<RuntimeState>,
    transition_count: u64,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Create a new state machine starting in BOOT.
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: RuntimeState::Boot,
            previous: None,
            transition_count: 0,
        }
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> RuntimeState {
        self.current
    }

    /// Get the previous state (if any transition occurred).
    #[must_use]
    pub fn previous_state(&self) -> Option<RuntimeState> {
        self.previous
    }

    /// Get total number of transitions.
    #[must_use]
    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    /// Attempt a state transition.
    pub fn transition(&mut self, target: RuntimeState) -> McuResult<()> {
        if self.current.can_transition_to(target) {
            self.previous = Some(self.current);
            self.current = target;
            self.transition_count += 1;
            Ok(())
        } else {
            Err(McuError::InvalidStateTransition {
                from: self.current.to_string(),
                to: target.to_string(),
            })
        }
    }

    /// Force a transition to FAULT (no-op from states that cannot fault).
    pub fn enter_fault(&mut self) {
        if self.current.can_transition_to(RuntimeState::Fault) {
            self.previous = Some(self.current);
            self.current = RuntimeState::Fault;
            self.transition_count += 1;
        }
    }
}
