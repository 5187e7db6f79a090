//! Sweep and task metrics.
//!
//! Sweep durations go into a fixed-size ring buffer so percentiles can be
//! reported without growing memory over a long run. Per-task counters are
//! kept separately in [`TaskStats`].

use serde::Serialize;
use std::time::Duration;

/// Sweep execution metrics with ring buffer for latency tracking.
#[derive(Debug)]
pub struct SweepMetrics {
    /// Ring buffer of sweep durations in nanoseconds.
    samples: Box<[u64]>,
    /// Current write position in the ring buffer.
    write_pos: usize,
    /// Number of samples collected (saturates at buffer size).
    sample_count: usize,
    /// Total sweeps executed.
    total_sweeps: u64,
    /// Sweeps in which no task was eligible.
    idle_sweeps: u64,
    /// Total task bodies invoked across all sweeps.
    bodies_run: u64,
    /// Minimum observed sweep time in nanoseconds.
    min_ns: u64,
    /// Maximum observed sweep time in nanoseconds.
    max_ns: u64,
    /// Sum of all sweep times for mean calculation.
    sum_ns: u64,
    /// Sweeps longer than the slow threshold.
    slow_count: u64,
    /// Slow sweep threshold in nanoseconds.
    slow_threshold_ns: u64,
}

#[allow(clippy::cast_possible_truncation)]
fn duration_ns(duration: Duration) -> u64 {
    duration.as_nanos().min(u128::from(u64::MAX)) as u64
}

impl SweepMetrics {
    /// Create a new metrics collector.
    ///
    /// * `histogram_size` - Number of sweep samples retained for percentiles.
    /// * `slow_threshold` - Sweeps longer than this are counted as slow.
    #[must_use]
    pub fn new(histogram_size: usize, slow_threshold: Duration) -> Self {
        let size = histogram_size.max(1);
        Self {
            samples: vec![0u64; size].into_boxed_slice(),
            write_pos: 0,
            sample_count: 0,
            total_sweeps: 0,
            idle_sweeps: 0,
            bodies_run: 0,
            min_ns: u64::MAX,
            max_ns: 0,
            sum_ns: 0,
            slow_count: 0,
            slow_threshold_ns: duration_ns(slow_threshold),
        }
    }

    /// Record one sweep and how many bodies it ran.
    pub fn record(&mut self, duration: Duration, fired: usize) {
        let ns = duration_ns(duration);

        self.samples[self.write_pos] = ns;
        self.write_pos = (self.write_pos + 1) % self.samples.len();
        self.sample_count = self.sample_count.saturating_add(1).min(self.samples.len());

        self.total_sweeps += 1;
        self.bodies_run += fired as u64;
        if fired == 0 {
            self.idle_sweeps += 1;
        }
        self.min_ns = self.min_ns.min(ns);
        self.max_ns = self.max_ns.max(ns);
        self.sum_ns = self.sum_ns.wrapping_add(ns);

        if ns > self.slow_threshold_ns {
            self.slow_count += 1;
        }
    }

    /// Get total number of sweeps executed.
    #[must_use]
    pub fn total_sweeps(&self) -> u64 {
        self.total_sweeps
    }

    /// Sweeps in which nothing fired.
    #[must_use]
    pub fn idle_sweeps(&self) -> u64 {
        self.idle_sweeps
    }

    /// Total task bodies invoked.
    #[must_use]
    pub fn bodies_run(&self) -> u64 {
        self.bodies_run
    }

    /// Get number of slow sweeps.
    #[must_use]
    pub fn slow_count(&self) -> u64 {
        self.slow_count
    }

    /// Get minimum observed sweep time.
    #[must_use]
    pub fn min(&self) -> Option<Duration> {
        (self.total_sweeps > 0).then(|| Duration::from_nanos(self.min_ns))
    }

    /// Get maximum observed sweep time.
    #[must_use]
    pub fn max(&self) -> Option<Duration> {
        (self.total_sweeps > 0).then(|| Duration::from_nanos(self.max_ns))
    }

    /// Get mean sweep time.
    #[must_use]
    pub fn mean(&self) -> Option<Duration> {
        (self.total_sweeps > 0).then(|| Duration::from_nanos(self.sum_ns / self.total_sweeps))
    }

    /// Compute a percentile (0.0 to 100.0) from the ring buffer.
    ///
    /// Returns `None` if no samples have been collected or if percentile is out of range.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn percentile(&self, percentile: f64) -> Option<Duration> {
        if self.sample_count == 0 || !(0.0..=100.0).contains(&percentile) {
            return None;
        }

        let mut sorted: Vec<u64> = self.samples[..self.sample_count].to_vec();
        sorted.sort_unstable();

        let idx = ((percentile / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        let idx = idx.min(sorted.len() - 1);

        Some(Duration::from_nanos(sorted[idx]))
    }

    /// Get a snapshot of current metrics.
    #[must_use]
    pub fn snapshot(&self) -> SweepSnapshot {
        let any = self.total_sweeps > 0;
        SweepSnapshot {
            total_sweeps: self.total_sweeps,
            idle_sweeps: self.idle_sweeps,
            bodies_run: self.bodies_run,
            min_ns: any.then_some(self.min_ns),
            max_ns: any.then_some(self.max_ns),
            mean_ns: any.then(|| self.sum_ns / self.total_sweeps),
            slow_count: self.slow_count,
            sample_count: self.sample_count,
        }
    }
}

/// Immutable snapshot of sweep metrics for reporting.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SweepSnapshot {
    /// Total sweeps executed.
    pub total_sweeps: u64,
    /// Sweeps in which nothing fired.
    pub idle_sweeps: u64,
    /// Total task bodies invoked.
    pub bodies_run: u64,
    /// Minimum sweep time in nanoseconds.
    pub min_ns: Option<u64>,
    /// Maximum sweep time in nanoseconds.
    pub max_ns: Option<u64>,
    /// Mean sweep time in nanoseconds.
    pub mean_ns: Option<u64>,
    /// Number of slow sweeps.
    pub slow_count: u64,
    /// Number of samples in the histogram.
    pub sample_count: usize,
}

/// Per-task run counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TaskStats {
    /// Times the gate opened and the body ran.
    pub runs: u64,
    /// Times the gate stayed closed.
    pub skips: u64,
    /// Duration of the most recent body invocation.
    pub last_duration: Duration,
    /// Longest body invocation seen.
    pub max_duration: Duration,
}

impl TaskStats {
    /// Record a completed body invocation.
    pub fn record_run(&mut self, duration: Duration) {
        self.runs += 1;
        self.last_duration = duration;
        self.max_duration = self.max_duration.max(duration);
    }

    /// Record a sweep in which the gate stayed closed.
    pub fn record_skip(&mut self) {
        self.skips += 1;
    }
}
