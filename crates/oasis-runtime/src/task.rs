//! Periodic task descriptors and setup stages.

use oasis_common::error::{McuError, McuResult};
use oasis_common::metrics::TaskStats;
use oasis_common::time::{interval_ms, Millis};
use std::fmt;
use std::time::{Duration, Instant};

/// Work performed by a periodic task each time its gate opens.
///
/// Implemented for any `FnMut() -> McuResult<()>` closure. An `Err` return is
/// fatal to the sweep; recovery belongs inside the body.
pub trait TaskBody {
    /// Run the body to completion.
    fn run(&mut self) -> McuResult<()>;
}

impl<F> TaskBody for F
where
    F: FnMut() -> McuResult<()>,
{
    fn run(&mut self) -> McuResult<()> {
        self()
    }
}

/// One-shot setup work. Consumed by its single invocation.
pub trait StageBody {
    /// Run the stage to completion.
    fn run(self: Box<Self>) -> McuResult<()>;
}

impl<F> StageBody for F
where
    F: FnOnce() -> McuResult<()>,
{
    fn run(self: Box<Self>) -> McuResult<()> {
        (*self)()
    }
}

/// Handle to a registered task, stable for the lifetime of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) usize);

impl TaskId {
    /// Position in the sweep order.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A named unit of recurring work gated by elapsed time.
pub struct PeriodicTask {
    name: String,
    /// Minimum milliseconds between runs.
    interval_ms: u32,
    /// Set by the loop runner right before the body runs.
    last_run: Millis,
    body: Box<dyn TaskBody>,
    stats: TaskStats,
}

impl fmt::Debug for PeriodicTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicTask")
            .field("name", &self.name)
            .field("interval_ms", &self.interval_ms)
            .field("last_run", &self.last_run)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl PeriodicTask {
    /// Create a descriptor that has never run.
    ///
    /// # Errors
    ///
    /// Returns [`McuError::Config`] if the name is empty or the interval does
    /// not fit the millisecond counter.
    pub fn new<F>(name: impl Into<String>, interval: Duration, body: F) -> McuResult<Self>
    where
        F: FnMut() -> McuResult<()> + 'static,
    {
        Self::with_body(name, interval, body)
    }

    /// Same as [`PeriodicTask::new`], for bodies that implement [`TaskBody`] directly.
    ///
    /// # Errors
    ///
    /// See [`PeriodicTask::new`].
    pub fn with_body(
        name: impl Into<String>,
        interval: Duration,
        body: impl TaskBody + 'static,
    ) -> McuResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(McuError::Config("task name must not be empty".into()));
        }
        Ok(Self {
            interval_ms: interval_ms(interval)?,
            name,
            last_run: Millis::ZERO,
            body: Box::new(body),
            stats: TaskStats::default(),
        })
    }

    /// Task name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.interval_ms))
    }

    /// Timestamp of the most recent run, or [`Millis::ZERO`] if never run.
    #[must_use]
    pub fn last_run(&self) -> Millis {
        self.last_run
    }

    /// Run and skip counters.
    #[must_use]
    pub fn stats(&self) -> &TaskStats {
        &self.stats
    }

    /// The gate: has at least `interval` elapsed since the last run?
    #[must_use]
    pub fn is_due(&self, now: Millis) -> bool {
        now.elapsed_since(self.last_run) >= self.interval_ms
    }

    pub(crate) fn set_interval(&mut self, interval: Duration) -> McuResult<()> {
        self.interval_ms = interval_ms(interval)?;
        Ok(())
    }

    pub(crate) fn skip(&mut self) {
        self.stats.record_skip();
    }

    /// Stamp `now` as the last run, then run the body.
    ///
    /// The next window is measured from the moment the gate opened, not from
    /// when the body returned. A failed body is still stamped.
    pub(crate) fn fire(&mut self, now: Millis) -> McuResult<Duration> {
        self.last_run = now;
        let start = Instant::now();
        self.body.run()?;
        let duration = start.elapsed();
        self.stats.record_run(duration);
        Ok(duration)
    }
}

/// A one-shot initializer.
pub struct SetupStage {
    name: String,
    body: Box<dyn StageBody>,
}

impl fmt::Debug for SetupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetupStage")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl SetupStage {
    /// Create a stage.
    ///
    /// # Errors
    ///
    /// Returns [`McuError::Config`] if the name is empty.
    pub fn new<F>(name: impl Into<String>, body: F) -> McuResult<Self>
    where
        F: FnOnce() -> McuResult<()> + 'static,
    {
        Self::with_body(name, body)
    }

    /// Same as [`SetupStage::new`], for bodies that implement [`StageBody`] directly.
    ///
    /// # Errors
    ///
    /// See [`SetupStage::new`].
    pub fn with_body(name: impl Into<String>, body: impl StageBody + 'static) -> McuResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(McuError::Config("stage name must not be empty".into()));
        }
        Ok(Self {
            name,
            body: Box::new(body),
        })
    }

    /// Stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn into_parts(self) -> (String, Box<dyn StageBody>) {
        (self.name, self.body)
    }
}

/// Ordered, fixed set of periodic tasks with unique names.
#[derive(Debug, Default)]
pub struct TaskTable {
    tasks: Vec<PeriodicTask>,
}

impl TaskTable {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task at the end of the sweep order.
    ///
    /// # Errors
    ///
    /// Returns [`McuError::DuplicateTask`] if the name is already taken.
    pub fn push(&mut self, task: PeriodicTask) -> McuResult<TaskId> {
        if self.find(task.name()).is_some() {
            return Err(McuError::DuplicateTask(task.name().to_string()));
        }
        self.tasks.push(task);
        Ok(TaskId(self.tasks.len() - 1))
    }

    /// Look up a task by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<TaskId> {
        self.tasks.iter().position(|t| t.name() == name).map(TaskId)
    }

    /// Number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// True if no task is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Task by handle.
    #[must_use]
    pub fn get(&self, id: TaskId) -> Option<&PeriodicTask> {
        self.tasks.get(id.0)
    }

    pub(crate) fn get_mut(&mut self, id: TaskId) -> Option<&mut PeriodicTask> {
        self.tasks.get_mut(id.0)
    }

    /// Tasks in sweep order.
    pub fn iter(&self) -> impl Iterator<Item = &PeriodicTask> {
        self.tasks.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut PeriodicTask> {
        self.tasks.iter_mut()
    }
}
