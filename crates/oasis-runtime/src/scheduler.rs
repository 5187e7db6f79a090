//! Fixed-set multi-rate cooperative scheduler.
//!
//! The scheduler implements the firmware main loop:
//! 1. Run every setup stage once, in order
//! 2. Sweep the periodic tasks in declared order, forever
//!
//! Each sweep evaluates every task's gate: `now - last_run >= interval`,
//! computed with wrapping 32-bit subtraction. An open gate stamps
//! `last_run = now` and then runs the body to completion. A closed gate
//! skips the task; missed windows are never made up.
//!
//! # Latency coupling
//!
//! There is one thread of control and no preemption. A body that blocks
//! delays every task after it in the same sweep, and a body that never
//! returns stops the scheduler until an external reset. The optional
//! [`Watchdog`] reports such a hang; it cannot end it.
//!
//! # Failure
//!
//! A body returning `Err` aborts the sweep, puts the lifecycle in FAULT and
//! surfaces as [`McuError::TaskFailed`]. There is no isolation between
//! tasks. Panics are not caught.

use crate::service::ControlHandle;
use crate::setup::{SetupReport, SetupRunner};
use crate::task::{PeriodicTask, SetupStage, TaskId, TaskTable};
use crate::watchdog::Watchdog;
use oasis_common::config::McuConfig;
use oasis_common::error::{McuError, McuResult};
use oasis_common::metrics::SweepMetrics;
use oasis_common::state::{RuntimeState, StateMachine};
use oasis_common::time::{Clock, Millis};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Result of a single sweep.
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    /// Sweep number, starting at 1.
    pub sweep: u64,
    /// Tasks whose body ran, in sweep order.
    #[serde(skip)]
    pub fired: Vec<TaskId>,
    /// Wall time of the whole sweep.
    pub duration: Duration,
}

impl SweepReport {
    /// True if the task ran during this sweep.
    #[must_use]
    pub fn fired(&self, id: TaskId) -> bool {
        self.fired.contains(&id)
    }
}

/// Why [`Scheduler::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopExit {
    /// A stop was requested; the lifecycle is HALTED.
    Stopped,
    /// A reboot was requested; the lifecycle is back in BOOT and the caller
    /// should rebuild and rerun setup.
    Reboot,
    /// The configured sweep limit was reached; the lifecycle stays in LOOP.
    SweepLimit,
}

/// Cooperative multi-rate scheduler.
///
/// Owns every task descriptor. Because bodies are owned by the scheduler
/// and [`Scheduler::sweep`] takes `&mut self`, no body can reach another
/// descriptor's `last_run` or `interval`, and no two sweeps can overlap.
pub struct Scheduler<C: Clock> {
    /// Time source for the gates.
    clock: C,
    /// Setup stages; taken by the first `setup()` call.
    setup: Option<SetupRunner>,
    /// Periodic tasks in sweep order.
    tasks: TaskTable,
    /// Lifecycle state machine.
    state: StateMachine,
    /// Reboot/stop requests.
    control: ControlHandle,
    /// Sweeps executed.
    sweep_count: u64,
    /// Sweep metrics.
    metrics: SweepMetrics,
    /// Bodies slower than this are logged.
    slow_task_warn: Duration,
    /// Sleep between sweeps in `run()`.
    idle_sleep: Duration,
    /// Sweep limit for `run()` (0 = none).
    max_sweeps: u64,
    /// Period of the status log line in `run()`.
    log_interval: Duration,
    /// Optional hang detector.
    watchdog: Option<Watchdog>,
    /// Reboot when the watchdog fires.
    reboot_on_watchdog: bool,
}

impl<C: Clock> Scheduler<C> {
    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RuntimeState {
        self.state.state()
    }

    /// Sweep metrics.
    #[must_use]
    pub fn metrics(&self) -> &SweepMetrics {
        &self.metrics
    }

    /// Sweeps executed so far.
    #[must_use]
    pub fn sweep_count(&self) -> u64 {
        self.sweep_count
    }

    /// Handle for reboot/stop requests.
    #[must_use]
    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    /// Current clock reading.
    #[must_use]
    pub fn now(&self) -> Millis {
        self.clock.now()
    }

    /// Handle for a task name.
    #[must_use]
    pub fn task_id(&self, name: &str) -> Option<TaskId> {
        self.tasks.find(name)
    }

    /// Task descriptor by handle.
    #[must_use]
    pub fn task(&self, id: TaskId) -> Option<&PeriodicTask> {
        self.tasks.get(id)
    }

    /// Tasks in sweep order.
    pub fn tasks(&self) -> impl Iterator<Item = &PeriodicTask> {
        self.tasks.iter()
    }

    /// True if the watchdog has fired at least once since the scheduler was built.
    #[must_use]
    pub fn watchdog_triggered(&self) -> bool {
        self.watchdog_trips() > 0
    }

    /// Number of hang episodes the watchdog has reported.
    ///
    /// The watchdog re-arms at the end of the sweep that tripped it, so a
    /// later hang is reported again.
    #[must_use]
    pub fn watchdog_trips(&self) -> u32 {
        self.watchdog.as_ref().map_or(0, Watchdog::trip_count)
    }

    /// Change a task's interval.
    ///
    /// This is the only way to retune a task. It needs `&mut self`, so it can
    /// be called between sweeps but never from inside a body.
    ///
    /// # Errors
    ///
    /// Returns [`McuError::UnknownTask`] if `id` does not name a registered
    /// task, or [`McuError::Config`] if `interval` does not fit the 32-bit
    /// millisecond clock.
    pub fn set_interval(&mut self, id: TaskId, interval: Duration) -> McuResult<()> {
        let task = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| McuError::UnknownTask(id.to_string()))?;
        task.set_interval(interval)?;
        info!(
            task = task.name(),
            interval_ms = interval.as_millis(),
            "Interval changed"
        );
        Ok(())
    }

    /// Apply a name-to-interval table.
    ///
    /// # Errors
    ///
    /// Returns [`McuError::UnknownTask`] for a name that is not registered;
    /// entries before it have already been applied.
    pub fn apply_intervals(&mut self, intervals: &BTreeMap<String, Duration>) -> McuResult<()> {
        for (name, interval) in intervals {
            let id = self
                .tasks
                .find(name)
                .ok_or_else(|| McuError::UnknownTask(name.clone()))?;
            self.set_interval(id, *interval)?;
        }
        Ok(())
    }

    /// Run the setup stages once and enter LOOP.
    ///
    /// Transitions BOOT → SETUP → LOOP, or to FAULT if a stage fails.
    /// Starts the watchdog, if configured, once setup has completed.
    ///
    /// # Errors
    ///
    /// Returns [`McuError::NotReady`] if setup already ran,
    /// [`McuError::StageFailed`] if a stage fails (the lifecycle is then in
    /// FAULT), or [`McuError::Config`] if the watchdog thread cannot start.
    pub fn setup(&mut self) -> McuResult<SetupReport> {
        let runner = self.setup.take().ok_or_else(|| McuError::NotReady {
            action: "run setup".into(),
            state: self.state.state().to_string(),
        })?;

        let report = runner.run(&mut self.state)?;
        self.start_watchdog()?;

        info!(tasks = self.tasks.len(), "Entering loop phase");
        Ok(report)
    }

    fn start_watchdog(&mut self) -> McuResult<()> {
        let Some(watchdog) = self.watchdog.as_mut() else {
            return Ok(());
        };

        let names: Vec<String> = self.tasks.iter().map(|t| t.name().to_string()).collect();
        let control = self.control.clone();
        let reboot = self.reboot_on_watchdog;

        watchdog.start(move |event| {
            let task = event
                .checkpoint
                .and_then(|i| names.get(i))
                .map_or("<between tasks>", String::as_str);
            error!(
                task,
                silent_ms = event.silent_for.as_millis(),
                "Task body appears hung; later tasks in this sweep are blocked"
            );
            if reboot {
                control.request_reboot();
            }
        })
    }

    /// Execute one sweep over every task in declared order.
    ///
    /// # Errors
    ///
    /// Returns [`McuError::NotReady`] outside LOOP, and
    /// [`McuError::TaskFailed`] if a body fails. In the latter case the
    /// remaining tasks of this sweep are not evaluated and the lifecycle is
    /// in FAULT.
    pub fn sweep(&mut self) -> McuResult<SweepReport> {
        if self.state.state() != RuntimeState::Loop {
            return Err(McuError::NotReady {
                action: "sweep".into(),
                state: self.state.state().to_string(),
            });
        }

        let sweep_start = Instant::now();
        if let Some(wd) = &self.watchdog {
            wd.kick();
        }

        let mut fired = Vec::new();
        for (index, task) in self.tasks.iter_mut().enumerate() {
            let now = self.clock.now();
            if !task.is_due(now) {
                task.skip();
                continue;
            }

            trace!(task = task.name(), %now, "Gate open");
            if let Some(wd) = &self.watchdog {
                wd.kick_at(index);
            }

            match task.fire(now) {
                Ok(elapsed) => {
                    if elapsed > self.slow_task_warn {
                        warn!(
                            task = task.name(),
                            elapsed_ms = elapsed.as_millis(),
                            limit_ms = self.slow_task_warn.as_millis(),
                            "Slow task body delayed the rest of the sweep"
                        );
                    }
                }
                Err(e) => {
                    error!(task = task.name(), error = %e, "Task body failed - entering FAULT state");
                    self.state.enter_fault();
                    return Err(McuError::TaskFailed {
                        task: task.name().to_string(),
                        source: Box::new(e),
                    });
                }
            }
            fired.push(TaskId(index));
        }

        if let Some(wd) = &self.watchdog {
            wd.kick();
            if wd.has_triggered() {
                warn!(
                    sweep = self.sweep_count + 1,
                    trips = wd.trip_count(),
                    "Loop responsive again, re-arming watchdog"
                );
                wd.reset();
            }
        }

        let duration = sweep_start.elapsed();
        self.sweep_count += 1;
        self.metrics.record(duration, fired.len());

        trace!(
            sweep = self.sweep_count,
            fired = fired.len(),
            elapsed_us = duration.as_micros(),
            "Sweep complete"
        );

        Ok(SweepReport {
            sweep: self.sweep_count,
            fired,
            duration,
        })
    }

    /// Sweep until a stop or reboot request, the sweep limit, or a failure.
    ///
    /// Requests are honoured between sweeps, never in the middle of one.
    /// This blocks the current thread. The watchdog is paused while the loop
    /// sleeps between sweeps.
    ///
    /// # Errors
    ///
    /// Returns the error of a failed sweep, or [`McuError::InvalidStateTransition`]
    /// if a request arrives in a state that cannot honour it.
    pub fn run(&mut self) -> McuResult<LoopExit> {
        info!(
            max_sweeps = self.max_sweeps,
            idle_sleep_us = self.idle_sleep.as_micros(),
            "Entering main loop"
        );

        let mut last_status = Instant::now();
        let exit = loop {
            if self.control.stop_requested() {
                self.state.transition(RuntimeState::Halted)?;
                break LoopExit::Stopped;
            }
            if self.control.take_reboot() {
                self.state.transition(RuntimeState::Boot)?;
                break LoopExit::Reboot;
            }
            if self.max_sweeps > 0 && self.sweep_count >= self.max_sweeps {
                break LoopExit::SweepLimit;
            }

            self.sweep()?;

            if !self.log_interval.is_zero() && last_status.elapsed() >= self.log_interval {
                self.log_status();
                last_status = Instant::now();
            }
            if !self.idle_sleep.is_zero() {
                if let Some(wd) = &self.watchdog {
                    wd.pause();
                }
                std::thread::sleep(self.idle_sleep);
                if let Some(wd) = &self.watchdog {
                    wd.kick();
                }
            }
        };

        info!(
            ?exit,
            final_state = %self.state.state(),
            sweeps = self.sweep_count,
            "Main loop exited"
        );
        Ok(exit)
    }

    /// Log sweep and per-task counters.
    pub fn log_status(&self) {
        let snapshot = self.metrics.snapshot();
        info!(
            sweeps = snapshot.total_sweeps,
            idle_sweeps = snapshot.idle_sweeps,
            bodies_run = snapshot.bodies_run,
            slow_sweeps = self.metrics.slow_count(),
            min_us = self.metrics.min().map_or(0, |d| d.as_micros()),
            mean_us = self.metrics.mean().map_or(0, |d| d.as_micros()),
            p99_us = self.metrics.percentile(99.0).map_or(0, |d| d.as_micros()),
            max_us = self.metrics.max().map_or(0, |d| d.as_micros()),
            transitions = self.state.transition_count(),
            watchdog_trips = self.watchdog_trips(),
            watchdog_timeout_ms = self.watchdog.as_ref().map_or(0, |wd| wd.timeout().as_millis()),
            "Periodic status"
        );
        for task in self.tasks.iter() {
            debug!(
                task = task.name(),
                runs = task.stats().runs,
                skips = task.stats().skips,
                last_run = %task.last_run(),
                "Task status"
            );
        }
    }

    /// Stop the watchdog thread, if any.
    pub fn shutdown(&mut self) {
        if let Some(wd) = self.watchdog.as_mut() {
            wd.stop();
        }
    }
}

/// Builder for registering stages and tasks.
///
/// Registration errors (empty or duplicate names, unknown names in the
/// configured intervals) are collected and reported by [`SchedulerBuilder::build`].
pub struct SchedulerBuilder<C: Clock> {
    clock: C,
    setup: SetupRunner,
    tasks: TaskTable,
    config: McuConfig,
    control: Option<ControlHandle>,
    error: Option<McuError>,
}

impl<C: Clock> SchedulerBuilder<C> {
    /// Create a new builder reading time from `clock`.
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            setup: SetupRunner::new(),
            tasks: TaskTable::new(),
            config: McuConfig::default(),
            control: None,
            error: None,
        }
    }

    pub(crate) fn record(&mut self, result: McuResult<()>) {
        if let Err(e) = result {
            self.error.get_or_insert(e);
        }
    }

    /// Append a setup stage.
    #[must_use]
    pub fn stage<F>(mut self, name: &str, body: F) -> Self
    where
        F: FnOnce() -> McuResult<()> + 'static,
    {
        let result = SetupStage::new(name, body).and_then(|s| self.setup.push(s));
        self.record(result);
        self
    }

    /// Append a periodic task at the end of the sweep order.
    #[must_use]
    pub fn task<F>(mut self, name: &str, interval: Duration, body: F) -> Self
    where
        F: FnMut() -> McuResult<()> + 'static,
    {
        let result = PeriodicTask::new(name, interval, body).and_then(|t| self.tasks.push(t).map(|_| ()));
        self.record(result);
        self
    }

    /// Append a pre-built task descriptor.
    #[must_use]
    pub fn descriptor(mut self, task: PeriodicTask) -> Self {
        let result = self.tasks.push(task).map(|_| ());
        self.record(result);
        self
    }

    /// Set the full runtime configuration.
    #[must_use]
    pub fn config(mut self, config: McuConfig) -> Self {
        self.config = config;
        self
    }

    /// Share an existing control handle (e.g. with a signal handler).
    #[must_use]
    pub fn control(mut self, control: ControlHandle) -> Self {
        self.control = Some(control);
        self
    }

    /// Build the scheduler.
    ///
    /// # Errors
    ///
    /// Returns the first registration error, or [`McuError::UnknownTask`]
    /// if the configuration names a task that was never registered.
    pub fn build(self) -> McuResult<Scheduler<C>> {
        if let Some(e) = self.error {
            return Err(e);
        }

        let config = self.config;
        let watchdog = config
            .watchdog
            .enabled
            .then(|| Watchdog::new(config.watchdog.timeout));

        let mut scheduler = Scheduler {
            clock: self.clock,
            setup: Some(self.setup),
            tasks: self.tasks,
            state: StateMachine::new(),
            control: self.control.unwrap_or_default(),
            sweep_count: 0,
            metrics: SweepMetrics::new(config.metrics.histogram_size, config.metrics.slow_sweep),
            slow_task_warn: config.runner.slow_task_warn,
            idle_sleep: config.runner.idle_sleep,
            max_sweeps: config.runner.max_sweeps,
            log_interval: config.runner.log_interval,
            watchdog,
            reboot_on_watchdog: config.watchdog.reboot_on_timeout,
        };
        scheduler.apply_intervals(&config.intervals)?;

        debug!(
            stages = scheduler.setup.as_ref().map_or(0, SetupRunner::len),
            tasks = scheduler.tasks.len(),
            "Scheduler built"
        );
        Ok(scheduler)
    }
}
