//! Service routines.
//!
//! Named utilities that stage and task bodies call explicitly: reboot, stop,
//! sleep and reconnect. The loop runner never schedules these itself; it only
//! honours reboot and stop requests between sweeps.

use oasis_common::config::NetworkingConfig;
use oasis_common::error::{McuError, McuResult};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct ControlFlags {
    reboot: AtomicBool,
    stop: AtomicBool,
    reboot_count: AtomicU32,
}

/// Reboot/stop requests shared between bodies, signal handlers and the loop.
///
/// Requests are atomic stores, so they are safe from any thread. The loop
/// runner acts on them after the sweep in progress completes.
#[derive(Debug, Clone, Default)]
pub struct ControlHandle {
    flags: Arc<ControlFlags>,
}

impl ControlHandle {
    /// Fresh handle with no pending request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for a reboot once the current sweep has finished.
    pub fn request_reboot(&self) {
        info!("Reboot requested");
        self.flags.reboot.store(true, Ordering::Release);
        self.flags.reboot_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Ask the loop to halt once the current sweep has finished.
    pub fn request_stop(&self) {
        info!("Stop requested");
        self.flags.stop.store(true, Ordering::Release);
    }

    /// True if a stop is pending.
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.flags.stop.load(Ordering::Acquire)
    }

    /// True if a reboot is pending.
    #[must_use]
    pub fn reboot_requested(&self) -> bool {
        self.flags.reboot.load(Ordering::Acquire)
    }

    /// Consume a pending reboot request.
    pub fn take_reboot(&self) -> bool {
        self.flags.reboot.swap(false, Ordering::AcqRel)
    }

    /// Total reboot requests seen by this handle and its clones.
    #[must_use]
    pub fn reboot_count(&self) -> u32 {
        self.flags.reboot_count.load(Ordering::Relaxed)
    }
}

/// Block the calling body for `duration`.
///
/// This stalls the whole sweep: every later task waits too.
pub fn sleep(duration: Duration) {
    debug!(sleep_ms = duration.as_millis(), "Sleeping");
    std::thread::sleep(duration);
}

/// Bounded retry with doubling backoff, for "reconnect" style routines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconnect {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl Reconnect {
    /// Retry policy.
    ///
    /// `max_attempts` is clamped to at least one attempt.
    #[must_use]
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff: max_backoff.max(initial_backoff),
        }
    }

    /// Policy from the `[networking]` configuration table.
    #[must_use]
    pub fn from_config(config: &NetworkingConfig) -> Self {
        Self::new(
            config.max_attempts,
            config.initial_backoff,
            config.max_backoff,
        )
    }

    /// Delay before retry number `retry` (1-based), doubling up to the cap.
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }

    /// Call `attempt` until it succeeds or the attempts run out.
    ///
    /// `attempt` receives the 1-based attempt number. Returns the number of
    /// the successful attempt, or [`McuError::Service`] with the last error.
    pub fn run<F>(&self, routine: &str, mut attempt: F) -> McuResult<u32>
    where
        F: FnMut(u32) -> McuResult<()>,
    {
        let mut last_error = None;
        for n in 1..=self.max_attempts {
            if n > 1 {
                let delay = self.backoff(n - 1);
                debug!(routine, attempt = n, delay_ms = delay.as_millis(), "Retrying");
                sleep(delay);
            }
            match attempt(n) {
                Ok(()) => {
                    if n > 1 {
                        info!(routine, attempts = n, "Recovered after retry");
                    }
                    return Ok(n);
                }
                Err(e) => {
                    warn!(routine, attempt = n, error = %e, "Attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(McuError::Service {
            routine: routine.to_string(),
            reason: format!(
                "gave up after {} attempts: {}",
                self.max_attempts,
                last_error.map_or_else(|| "no attempt made".to_string(), |e| e.to_string())
            ),
        })
    }
}
