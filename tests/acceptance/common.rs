//! Common utilities for integration tests.
//!
//! Provides helpers for:
//! - Recording which task ran at which clock reading
//! - Checking the gate properties over a recorded run
//! - A deterministic pseudo-random clock stepper

#![allow(dead_code)] // Not every helper is used by every test module

use oasis_common::error::McuResult;
use oasis_common::time::{Clock, Millis};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// One body invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunRecord {
    /// Task name.
    pub task: &'static str,
    /// Clock reading when the body ran.
    pub at: Millis,
}

/// Shared log of body invocations.
#[derive(Debug, Clone, Default)]
pub struct RunLog {
    runs: Rc<RefCell<Vec<RunRecord>>>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Body that appends `task` with the current clock reading.
    pub fn body<C>(&self, task: &'static str, clock: C) -> impl FnMut() -> McuResult<()> + 'static
    where
        C: Clock + 'static,
    {
        let runs = Rc::clone(&self.runs);
        move || {
            runs.borrow_mut().push(RunRecord {
                task,
                at: clock.now(),
            });
            Ok(())
        }
    }

    /// All records so far.
    pub fn records(&self) -> Vec<RunRecord> {
        self.runs.borrow().clone()
    }

    /// Task names in invocation order.
    pub fn names(&self) -> Vec<&'static str> {
        self.runs.borrow().iter().map(|r| r.task).collect()
    }

    /// Number of runs of `task`.
    pub fn count(&self, task: &str) -> usize {
        self.runs.borrow().iter().filter(|r| r.task == task).count()
    }

    /// Forget everything recorded.
    pub fn clear(&self) {
        self.runs.borrow_mut().clear();
    }

    /// Check that consecutive runs of each task are at least its interval
    /// apart, measured with wrapping subtraction.
    pub fn assert_never_early(&self, intervals: &BTreeMap<&'static str, u32>) {
        let mut last: BTreeMap<&'static str, Millis> = BTreeMap::new();
        for record in self.records() {
            if let Some(prev) = last.insert(record.task, record.at) {
                let gap = record.at.elapsed_since(prev);
                let interval = intervals[record.task];
                assert!(
                    gap >= interval,
                    "{} ran {}ms after its previous run, interval is {}ms",
                    record.task,
                    gap,
                    interval
                );
            }
        }
    }
}

/// Small deterministic generator for clock steps.
#[derive(Debug, Clone)]
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed)
    }

    /// Next value in `0..bound`.
    pub fn next_below(&mut self, bound: u32) -> u32 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        u32::try_from((self.0 >> 33) % u64::from(bound)).unwrap()
    }
}
