//! Diagnostics and health reporting for the daemon.
//!
//! Sweep metrics live in each scheduler and reset on every reboot. This
//! module keeps the daemon-wide totals across boots and renders them as a
//! JSON status line.

use oasis_common::metrics::SweepSnapshot;
use oasis_common::state::RuntimeState;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Health status of the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Sweeping with few slow sweeps.
    Healthy,
    /// Sweeping, but sweeps are often slow or the watchdog fired.
    Degraded,
    /// A stage or body failed.
    Unhealthy,
    /// Booting or running setup.
    Starting,
    /// Halted on request.
    ShuttingDown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Starting => write!(f, "starting"),
            HealthStatus::ShuttingDown => write!(f, "shutting_down"),
        }
    }
}

/// Snapshot of daemon diagnostics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsSnapshot {
    /// Current health status.
    pub health: HealthStatus,
    /// Current lifecycle state.
    pub state: RuntimeState,
    /// Boots so far, including the current one.
    pub boots: u32,
    /// Sweeps across all boots.
    pub total_sweeps: u64,
    /// Slow sweeps across all boots.
    pub slow_sweeps: u64,
    /// Whether the watchdog has fired in any boot.
    pub watchdog_fired: bool,
    /// Uptime since daemon start.
    #[serde(with = "humantime_string")]
    pub uptime: Duration,
    /// Mean sweep time of the most recent boot.
    pub mean_sweep_ns: Option<u64>,
    /// Maximum sweep time of the most recent boot.
    pub max_sweep_ns: Option<u64>,
}

impl DiagnosticsSnapshot {
    /// Render as a single JSON line.
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

mod humantime_string {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        // Whole milliseconds keep the line readable.
        let rounded = Duration::from_millis(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX));
        serializer.collect_str(&humantime::format_duration(rounded))
    }
}

/// Daemon-wide counters, shared across boots.
#[derive(Debug)]
pub struct DiagnosticsState {
    boots: AtomicU32,
    total_sweeps: AtomicU64,
    slow_sweeps: AtomicU64,
    watchdog_fired: AtomicBool,
    start_time: Instant,
}

impl Default for DiagnosticsState {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticsState {
    /// Create new diagnostics state.
    pub fn new() -> Self {
        Self {
            boots: AtomicU32::new(0),
            total_sweeps: AtomicU64::new(0),
            slow_sweeps: AtomicU64::new(0),
            watchdog_fired: AtomicBool::new(false),
            start_time: Instant::now(),
        }
    }

    /// Record the start of a boot and return its number (1-based).
    pub fn record_boot(&self) -> u32 {
        self.boots.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Fold in the sweep metrics of a finished boot.
    pub fn record_run(&self, sweeps: &SweepSnapshot, watchdog_fired: bool) {
        self.total_sweeps
            .fetch_add(sweeps.total_sweeps, Ordering::Relaxed);
        self.slow_sweeps
            .fetch_add(sweeps.slow_count, Ordering::Relaxed);
        if watchdog_fired {
            self.watchdog_fired.store(true, Ordering::Relaxed);
        }
    }

    /// Boots so far.
    pub fn boots(&self) -> u32 {
        self.boots.load(Ordering::Relaxed)
    }

    /// Sweeps across all boots.
    pub fn total_sweeps(&self) -> u64 {
        self.total_sweeps.load(Ordering::Relaxed)
    }

    /// Slow sweeps across all boots.
    pub fn slow_sweeps(&self) -> u64 {
        self.slow_sweeps.load(Ordering::Relaxed)
    }

    /// Get uptime since daemon start.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// Diagnostics collector that aggregates runtime information.
pub struct DiagnosticsCollector {
    state: Arc<DiagnosticsState>,
}

impl DiagnosticsCollector {
    /// Create a new diagnostics collector.
    pub fn new(state: Arc<DiagnosticsState>) -> Self {
        Self { state }
    }

    /// Determine health status from runtime state.
    #[allow(clippy::cast_precision_loss)]
    pub fn health_from_state(&self, runtime_state: RuntimeState) -> HealthStatus {
        match runtime_state {
            RuntimeState::Boot | RuntimeState::Setup => HealthStatus::Starting,
            RuntimeState::Loop => {
                let sweeps = self.state.total_sweeps();
                let slow_rate = if sweeps > 0 {
                    self.state.slow_sweeps() as f64 / sweeps as f64
                } else {
                    0.0
                };

                // More than 1% slow sweeps
                if slow_rate > 0.01 || self.state.watchdog_fired.load(Ordering::Relaxed) {
                    HealthStatus::Degraded
                } else {
                    HealthStatus::Healthy
                }
            }
            RuntimeState::Halted => HealthStatus::ShuttingDown,
            RuntimeState::Fault => HealthStatus::Unhealthy,
        }
    }

    /// Create a snapshot of current diagnostics.
    pub fn snapshot(&self, runtime_state: RuntimeState, last: &SweepSnapshot) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            health: self.health_from_state(runtime_state),
            state: runtime_state,
            boots: self.state.boots(),
            total_sweeps: self.state.total_sweeps(),
            slow_sweeps: self.state.slow_sweeps(),
            watchdog_fired: self.state.watchdog_fired.load(Ordering::Relaxed),
            uptime: self.state.uptime(),
            mean_sweep_ns: last.mean_ns,
            max_sweep_ns: last.max_ns,
        }
    }

    /// Get the underlying state for updates.
    pub fn state(&self) -> &Arc<DiagnosticsState> {
        &self.state
    }
}
