//! Error types shared by the runtime and the daemon.

use thiserror::Error;

/// Error types covering configuration, setup/loop body failures, and service routines.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum McuError {
    /// Configuration or registration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A task or stage name was registered twice.
    #[error("duplicate task name: {0}")]
    DuplicateTask(String),

    /// A task name that was never registered.
    #[error("unknown task: {0}")]
    UnknownTask(String),

    /// A setup stage returned an error; later stages did not run.
    #[error("setup stage '{stage}' failed: {source}")]
    StageFailed {
        /// Name of the failing stage.
        stage: String,
        /// Error returned by the stage body.
        #[source]
        source: Box<McuError>,
    },

    /// A periodic task body returned an error; the sweep was aborted.
    #[error("task '{task}' failed: {source}")]
    TaskFailed {
        /// Name of the failing task.
        task: String,
        /// Error returned by the task body.
        #[source]
        source: Box<McuError>,
    },

    /// Failure raised by user code inside a stage or task body.
    #[error("body failure: {0}")]
    Body(String),

    /// A service routine (reboot, reconnect, ...) could not complete.
    #[error("service routine '{routine}' failed: {reason}")]
    Service {
        /// Service routine name.
        routine: String,
        /// Failure description.
        reason: String,
    },

    /// Watchdog timer expired without being kicked.
    #[error("watchdog timeout: {0}")]
    WatchdogTimeout(String),

    /// I/O operation error.
    #[error("I/O error: {0}")]
    IoError(String),

    /// Operation not allowed in the current lifecycle state.
    #[error("cannot {action} in state {state}")]
    NotReady {
        /// What was attempted.
        action: String,
        /// State the runtime was in.
        state: String,
    },

    /// Invalid lifecycle transition attempted.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Source state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl McuError {
    /// Build a [`McuError::Body`] from anything printable.
    pub fn body(reason: impl std::fmt::Display) -> Self {
        Self::Body(reason.to_string())
    }

    /// Name of the stage or task that failed, if this error came out of a runner.
    #[must_use]
    pub fn failed_unit(&self) -> Option<&str> {
        match self {
            Self::StageFailed { stage, .. } => Some(stage),
            Self::TaskFailed { task, .. } => Some(task),
            _ => None,
        }
    }
}

/// Convenience type alias for runtime operations.
pub type McuResult<T> = Result<T, McuError>;
