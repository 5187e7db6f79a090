//! Software watchdog for detecting hung task bodies.
//!
//! The loop runner kicks the watchdog at the start of every sweep and again
//! before each body, recording which task is about to run. A monitor thread
//! reports when no kick arrives within the timeout. The watchdog only
//! observes: a body that never returns keeps running, and the rest of the
//! sweep keeps waiting, until something outside the scheduler acts on the
//! report (a reboot request, or an external reset).

use oasis_common::error::{McuError, McuResult};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Checkpoint value meaning "between tasks".
const NO_CHECKPOINT: usize = usize::MAX;

/// Checkpoint value meaning "idle between sweeps"; the monitor ignores silence.
const IDLE: usize = usize::MAX - 1;

/// What the watchdog saw when it fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogEvent {
    /// Sweep-order index of the task that was running, if any.
    pub checkpoint: Option<usize>,
    /// Time since the last kick when the timeout was detected.
    pub silent_for: Duration,
}

/// Watchdog timer that monitors the loop runner.
#[derive(Debug)]
pub struct Watchdog {
    /// Shared state between the loop runner and the monitor thread.
    state: Arc<WatchdogState>,
    /// Handle to the monitor thread.
    monitor_handle: Option<JoinHandle<()>>,
    /// Configured timeout duration.
    timeout: Duration,
    /// Whether the monitor thread is running.
    running: Arc<AtomicBool>,
}

/// Shared state for watchdog synchronization.
#[derive(Debug)]
struct WatchdogState {
    /// Timestamp of last kick (nanoseconds since start).
    last_kick_ns: AtomicU64,
    /// Task index recorded with the last kick.
    checkpoint: AtomicUsize,
    /// Monotonic start time for relative timestamps.
    start_time: Instant,
    /// Flag set when watchdog triggers, cleared on re-arm.
    triggered: AtomicBool,
    /// Timeout episodes detected so far.
    trips: AtomicU32,
    /// Flag to signal monitor thread to stop.
    stop_requested: AtomicBool,
}

impl WatchdogState {
    fn new() -> Self {
        Self {
            last_kick_ns: AtomicU64::new(0),
            checkpoint: AtomicUsize::new(NO_CHECKPOINT),
            start_time: Instant::now(),
            triggered: AtomicBool::new(false),
            trips: AtomicU32::new(0),
            stop_requested: AtomicBool::new(false),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn elapsed_ns(&self) -> u64 {
        self.start_time.elapsed().as_nanos() as u64
    }

    // Timestamp first, so leaving IDLE never exposes a stale kick time.
    fn kick(&self, checkpoint: usize) {
        self.last_kick_ns.store(self.elapsed_ns(), Ordering::Release);
        self.checkpoint.store(checkpoint, Ordering::Release);
    }

    fn silent_ns(&self) -> u64 {
        let last = self.last_kick_ns.load(Ordering::Acquire);
        self.elapsed_ns().saturating_sub(last)
    }

    fn is_idle(&self) -> bool {
        self.checkpoint.load(Ordering::Acquire) == IDLE
    }

    fn event(&self) -> WatchdogEvent {
        let checkpoint = self.checkpoint.load(Ordering::Acquire);
        WatchdogEvent {
            checkpoint: (checkpoint < IDLE).then_some(checkpoint),
            silent_for: Duration::from_nanos(self.silent_ns()),
        }
    }
}

impl Watchdog {
    /// Create a new watchdog with the specified timeout.
    ///
    /// The watchdog is created in a stopped state. Call `start()` to begin monitoring.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: Arc::new(WatchdogState::new()),
            monitor_handle: None,
            timeout,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Configured timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Start the monitor thread.
    ///
    /// `on_trigger` runs on the monitor thread, once per timeout episode.
    /// It must not touch the scheduler; raising a flag or requesting a
    /// reboot through a [`crate::service::ControlHandle`] is fine.
    pub fn start<F>(&mut self, on_trigger: F) -> McuResult<()>
    where
        F: Fn(WatchdogEvent) + Send + 'static,
    {
        if self.running.load(Ordering::Acquire) {
            return Err(McuError::Config("Watchdog already running".into()));
        }

        info!(timeout_ms = self.timeout.as_millis(), "Starting watchdog");

        self.state.stop_requested.store(false, Ordering::Release);
        self.state.triggered.store(false, Ordering::Release);
        self.state.kick(NO_CHECKPOINT);

        let state = Arc::clone(&self.state);
        let running = Arc::clone(&self.running);
        #[allow(clippy::cast_possible_truncation)]
        let timeout_ns = self.timeout.as_nanos() as u64;
        // Check 4x per timeout period, at most once per millisecond
        let check_interval = (self.timeout / 4).max(Duration::from_millis(1));

        self.running.store(true, Ordering::Release);

        let handle = match thread::Builder::new()
            .name("oasis-watchdog".into())
            .spawn(move || {
                debug!("Watchdog monitor thread started");

                while !state.stop_requested.load(Ordering::Acquire) {
                    thread::sleep(check_interval);

                    if state.stop_requested.load(Ordering::Acquire) {
                        break;
                    }

                    if state.is_idle() {
                        continue;
                    }

                    if state.silent_ns() > timeout_ns && !state.triggered.swap(true, Ordering::AcqRel)
                    {
                        state.trips.fetch_add(1, Ordering::AcqRel);
                        let event = state.event();
                        error!(
                            checkpoint = ?event.checkpoint,
                            silent_ms = event.silent_for.as_millis(),
                            "Watchdog timeout! Loop runner has not responded."
                        );
                        on_trigger(event);
                    }
                }

                running.store(false, Ordering::Release);
                debug!("Watchdog monitor thread stopped");
            }) {
            Ok(h) => h,
            Err(e) => {
                self.running.store(false, Ordering::Release);
                return Err(McuError::Config(format!(
                    "Failed to spawn watchdog thread: {e}"
                )));
            }
        };

        self.monitor_handle = Some(handle);
        Ok(())
    }

    /// Kick between tasks.
    #[inline]
    pub fn kick(&self) {
        self.state.kick(NO_CHECKPOINT);
    }

    /// Kick and record that the task at `index` is about to run.
    #[inline]
    pub fn kick_at(&self, index: usize) {
        self.state.kick(index);
    }

    /// Suspend monitoring until the next kick.
    ///
    /// Used while the loop runner sleeps between sweeps, where silence is
    /// expected and says nothing about a hung body.
    #[inline]
    pub fn pause(&self) {
        self.state.kick(IDLE);
    }

    /// Check if the watchdog has triggered since it was last re-armed.
    #[inline]
    #[must_use]
    pub fn has_triggered(&self) -> bool {
        self.state.triggered.load(Ordering::Acquire)
    }

    /// Timeout episodes detected since the watchdog was created.
    #[must_use]
    pub fn trip_count(&self) -> u32 {
        self.state.trips.load(Ordering::Acquire)
    }

    /// Clear the triggered flag and kick, re-arming the watchdog.
    pub fn reset(&self) {
        self.state.triggered.store(false, Ordering::Release);
        self.state.kick(NO_CHECKPOINT);
        info!("Watchdog reset");
    }

    /// Stop the monitor thread.
    pub fn stop(&mut self) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }

        info!("Stopping watchdog");
        self.state.stop_requested.store(true, Ordering::Release);

        if let Some(handle) = self.monitor_handle.take() {
            if let Err(e) = handle.join() {
                warn!("Watchdog thread panicked: {:?}", e);
            }
        }
    }

    /// Check if the monitor thread is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}
