//! Interrupt flags.
//!
//! Interrupt handlers run outside the sweep and must stay short: they only
//! raise a flag. A task body picks the flag up on a later sweep and does the
//! actual work, typically by calling a service routine.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct FlagState {
    name: &'static str,
    raised: AtomicBool,
    count: AtomicU32,
}

/// A latched, named interrupt flag.
///
/// Clones share the same flag. [`InterruptFlag::raise`] is a pair of atomic
/// operations and is safe to call from a signal handler thread or an ISR-like
/// context.
#[derive(Debug, Clone)]
pub struct InterruptFlag {
    state: Arc<FlagState>,
}

impl InterruptFlag {
    /// New lowered flag.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            state: Arc::new(FlagState {
                name,
                raised: AtomicBool::new(false),
                count: AtomicU32::new(0),
            }),
        }
    }

    /// Flag name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.state.name
    }

    /// Latch the flag.
    #[inline]
    pub fn raise(&self) {
        self.state.count.fetch_add(1, Ordering::Relaxed);
        self.state.raised.store(true, Ordering::Release);
    }

    /// Check without clearing.
    #[inline]
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.state.raised.load(Ordering::Acquire)
    }

    /// Check and clear. Several raises between two takes collapse into one.
    #[inline]
    pub fn take(&self) -> bool {
        self.state.raised.swap(false, Ordering::AcqRel)
    }

    /// Total raises since creation.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.state.count.load(Ordering::Relaxed)
    }
}

/// Fixed set of interrupt flags registered during setup.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlags {
    flags: Vec<InterruptFlag>,
}

impl InterruptFlags {
    /// Empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a flag, or return the existing one with this name.
    pub fn register(&mut self, name: &'static str) -> InterruptFlag {
        if let Some(flag) = self.get(name) {
            return flag;
        }
        let flag = InterruptFlag::new(name);
        self.flags.push(flag.clone());
        flag
    }

    /// Look up a flag by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<InterruptFlag> {
        self.flags.iter().find(|f| f.name() == name).cloned()
    }

    /// Take every raised flag, returning their names in registration order.
    pub fn take_raised(&self) -> Vec<&'static str> {
        self.flags
            .iter()
            .filter(|f| f.take())
            .map(InterruptFlag::name)
            .collect()
    }
}
