//! Setup-phase runner.
//!
//! Runs each stage once, in declared order, to completion. There is no
//! timing gate, no timeout and no retry: a stage that waits forever for a
//! network holds setup forever, and a stage that fails stops setup. Retry or
//! reboot policy belongs to the stage body (see [`crate::service`]).

use crate::task::SetupStage;
use oasis_common::error::{McuError, McuResult};
use oasis_common::state::{RuntimeState, StateMachine};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Outcome of a completed setup phase.
#[derive(Debug, Clone, Default)]
pub struct SetupReport {
    /// Stage names with their run time, in execution order.
    pub stages: Vec<(String, Duration)>,
}

impl SetupReport {
    /// Total setup time.
    #[must_use]
    pub fn total(&self) -> Duration {
        self.stages.iter().map(|(_, d)| *d).sum()
    }
}

/// Ordered list of one-shot setup stages.
#[derive(Debug, Default)]
pub struct SetupRunner {
    stages: Vec<SetupStage>,
}

impl SetupRunner {
    /// Runner with no stages.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage.
    ///
    /// # Errors
    ///
    /// Returns [`McuError::DuplicateTask`] if a stage with this name exists.
    pub fn push(&mut self, stage: SetupStage) -> McuResult<()> {
        if self.stages.iter().any(|s| s.name() == stage.name()) {
            return Err(McuError::DuplicateTask(stage.name().to_string()));
        }
        self.stages.push(stage);
        Ok(())
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// True if there is nothing to run.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage names in execution order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(SetupStage::name)
    }

    /// Run every stage once and move the lifecycle to LOOP.
    ///
    /// The lifecycle must be in BOOT.
    ///
    /// # Errors
    ///
    /// Returns [`McuError::InvalidStateTransition`] outside BOOT. On a stage
    /// failure the lifecycle enters FAULT, the remaining stages are dropped
    /// without running, and the error is returned wrapped in
    /// [`McuError::StageFailed`].
    pub fn run(self, state: &mut StateMachine) -> McuResult<SetupReport> {
        state.transition(RuntimeState::Setup)?;
        info!(stages = self.stages.len(), "Running setup stages");

        let mut report = SetupReport::default();
        for stage in self.stages {
            let (name, body) = stage.into_parts();
            debug!(stage = %name, "Setup stage starting");

            let start = Instant::now();
            if let Err(e) = body.run() {
                error!(stage = %name, error = %e, "Setup stage failed - entering FAULT state");
                state.enter_fault();
                return Err(McuError::StageFailed {
                    stage: name,
                    source: Box::new(e),
                });
            }
            let elapsed = start.elapsed();

            debug!(stage = %name, elapsed_us = elapsed.as_micros(), "Setup stage complete");
            report.stages.push((name, elapsed));
        }

        state.transition(RuntimeState::Loop)?;
        info!(
            elapsed_us = report.total().as_micros(),
            "Setup complete, state: LOOP"
        );
        Ok(report)
    }
}
