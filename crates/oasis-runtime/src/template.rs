//! The firmware template's fixed section layout.
//!
//! Three setup sections run once, then five loop sections are swept, each
//! at an interval of 0 ms unless configured otherwise:
//!
//! | Phase | Sections |
//! |-------|----------|
//! | setup | `hardware`, `networking`, `set_interrupts` |
//! | loop  | `collect_data`, `process_data`, `actuate_io`, `communicate`, `misc_tasks` |
//!
//! Every section starts as a no-op placeholder. An application replaces the
//! sections it needs and converts the template into a [`SchedulerBuilder`].

use crate::scheduler::SchedulerBuilder;
use oasis_common::error::{McuError, McuResult};
use oasis_common::time::Clock;
use std::time::Duration;
use tracing::trace;

/// Setup sections in execution order.
pub const SETUP_SECTIONS: [&str; 3] = ["hardware", "networking", "set_interrupts"];

/// Loop sections in sweep order.
pub const LOOP_SECTIONS: [&str; 5] = [
    "collect_data",
    "process_data",
    "actuate_io",
    "communicate",
    "misc_tasks",
];

type StageFn = Box<dyn FnOnce() -> McuResult<()>>;
type TaskFn = Box<dyn FnMut() -> McuResult<()>>;

fn placeholder_stage(name: &'static str) -> StageFn {
    Box::new(move || {
        trace!(stage = name, "Placeholder setup section");
        Ok(())
    })
}

fn placeholder_task(name: &'static str) -> TaskFn {
    Box::new(move || {
        trace!(task = name, "Placeholder loop section");
        Ok(())
    })
}

struct LoopSection {
    name: &'static str,
    interval: Duration,
    body: TaskFn,
}

/// Section bodies for the standard layout.
pub struct Template {
    stages: [(&'static str, StageFn); 3],
    sections: [LoopSection; 5],
    error: Option<McuError>,
}

impl Default for Template {
    fn default() -> Self {
        Self::new()
    }
}

impl Template {
    /// Template with every section a placeholder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stages: SETUP_SECTIONS.map(|name| (name, placeholder_stage(name))),
            sections: LOOP_SECTIONS.map(|name| LoopSection {
                name,
                interval: Duration::ZERO,
                body: placeholder_task(name),
            }),
            error: None,
        }
    }

    fn set_stage(mut self, index: usize, body: StageFn) -> Self {
        self.stages[index].1 = body;
        self
    }

    fn set_section(mut self, index: usize, body: TaskFn) -> Self {
        self.sections[index].body = body;
        self
    }

    /// Initialize pins, buses and peripherals.
    #[must_use]
    pub fn hardware(self, body: impl FnOnce() -> McuResult<()> + 'static) -> Self {
        self.set_stage(0, Box::new(body))
    }

    /// Bring up connectivity. Use [`crate::service::Reconnect`] to retry.
    #[must_use]
    pub fn networking(self, body: impl FnOnce() -> McuResult<()> + 'static) -> Self {
        self.set_stage(1, Box::new(body))
    }

    /// Register interrupt flags and their handlers.
    #[must_use]
    pub fn set_interrupts(self, body: impl FnOnce() -> McuResult<()> + 'static) -> Self {
        self.set_stage(2, Box::new(body))
    }

    /// Read sensors.
    #[must_use]
    pub fn collect_data(self, body: impl FnMut() -> McuResult<()> + 'static) -> Self {
        self.set_section(0, Box::new(body))
    }

    /// Compute on collected data.
    #[must_use]
    pub fn process_data(self, body: impl FnMut() -> McuResult<()> + 'static) -> Self {
        self.set_section(1, Box::new(body))
    }

    /// Drive outputs.
    #[must_use]
    pub fn actuate_io(self, body: impl FnMut() -> McuResult<()> + 'static) -> Self {
        self.set_section(2, Box::new(body))
    }

    /// Talk to the outside world.
    #[must_use]
    pub fn communicate(self, body: impl FnMut() -> McuResult<()> + 'static) -> Self {
        self.set_section(3, Box::new(body))
    }

    /// Housekeeping, interrupt follow-up and service routine calls.
    #[must_use]
    pub fn misc_tasks(self, body: impl FnMut() -> McuResult<()> + 'static) -> Self {
        self.set_section(4, Box::new(body))
    }

    /// Interval compiled into the template for `section`.
    ///
    /// Configured `[intervals]` entries are applied on top of these when the
    /// scheduler is built. A name that is not a loop section makes
    /// [`SchedulerBuilder::build`] fail with [`McuError::UnknownTask`].
    #[must_use]
    pub fn interval(mut self, section: &str, interval: Duration) -> Self {
        match self.sections.iter_mut().find(|s| s.name == section) {
            Some(s) => s.interval = interval,
            None => {
                self.error
                    .get_or_insert_with(|| McuError::UnknownTask(section.to_string()));
            }
        }
        self
    }

    /// Register all sections, in layout order, on a new builder.
    pub fn into_builder<C: Clock>(self, clock: C) -> SchedulerBuilder<C> {
        let mut builder = SchedulerBuilder::new(clock);
        if let Some(e) = self.error {
            builder.record(Err(e));
        }
        for (name, body) in self.stages {
            builder = builder.stage(name, body);
        }
        for section in self.sections {
            builder = builder.task(section.name, section.interval, section.body);
        }
        builder
    }
}
