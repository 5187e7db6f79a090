//! Millisecond clock abstraction.
//!
//! Timestamps are 32-bit millisecond counters that wrap after ~49.7 days,
//! the same width as the `millis()` counter on common microcontrollers.
//! Elapsed time is always computed with same-width wrapping subtraction, so
//! a wrap between two readings still yields the correct small delta.

use crate::error::{McuError, McuResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Milliseconds since system start, wrapping at `u32::MAX`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Millis(pub u32);

impl Millis {
    /// Timestamp zero, also the "never run" marker for task descriptors.
    pub const ZERO: Millis = Millis(0);

    /// Raw counter value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Milliseconds elapsed since `earlier`, absorbing counter wraparound.
    #[must_use]
    pub const fn elapsed_since(self, earlier: Millis) -> u32 {
        self.0.wrapping_sub(earlier.0)
    }

    /// Advance by `ms`, wrapping like the hardware counter.
    #[must_use]
    pub const fn wrapping_add(self, ms: u32) -> Millis {
        Millis(self.0.wrapping_add(ms))
    }
}

impl fmt::Display for Millis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

impl From<u32> for Millis {
    fn from(ms: u32) -> Self {
        Millis(ms)
    }
}

/// Convert an interval to whole milliseconds of counter width.
///
/// Sub-millisecond parts are truncated. Intervals that cannot be represented
/// by the counter are rejected, since the gate could never observe them.
pub fn interval_ms(interval: Duration) -> McuResult<u32> {
    u32::try_from(interval.as_millis()).map_err(|_| {
        McuError::Config(format!(
            "interval {} exceeds the {}ms clock range",
            humantime::format_duration(interval),
            u32::MAX
        ))
    })
}

/// Source of monotonic millisecond timestamps.
pub trait Clock {
    /// Current time since system start.
    fn now(&self) -> Millis;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Millis {
        (**self).now()
    }
}

impl<C: Clock + ?Sized> Clock for Box<C> {
    fn now(&self) -> Millis {
        (**self).now()
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Millis {
        (**self).now()
    }
}

/// Host clock backed by [`Instant`], truncated to the 32-bit counter.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    start: Instant,
    offset: Millis,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    /// Clock reading zero now.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(Millis::ZERO)
    }

    /// Clock reading `offset` now. Useful to exercise wraparound on a host.
    #[must_use]
    pub fn starting_at(offset: Millis) -> Self {
        Self {
            start: Instant::now(),
            offset,
        }
    }
}

impl Clock for MonotonicClock {
    #[allow(clippy::cast_possible_truncation)]
    fn now(&self) -> Millis {
        // Truncation is the wrap.
        let elapsed = self.start.elapsed().as_millis() as u32;
        self.offset.wrapping_add(elapsed)
    }
}

/// Manually driven clock for simulation and tests.
///
/// Clones share the same counter, so a test can keep a handle while the
/// scheduler owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU32>,
}

impl ManualClock {
    /// Clock reading `start`.
    #[must_use]
    pub fn new(start: Millis) -> Self {
        Self {
            now: Arc::new(AtomicU32::new(start.0)),
        }
    }

    /// Jump to an absolute time.
    pub fn set(&self, now: Millis) {
        self.now.store(now.0, Ordering::Release);
    }

    /// Advance by `ms`, wrapping at the counter width.
    pub fn advance(&self, ms: u32) {
        let current = self.now.load(Ordering::Acquire);
        self.now.store(current.wrapping_add(ms), Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Millis {
        Millis(self.now.load(Ordering::Acquire))
    }
}
