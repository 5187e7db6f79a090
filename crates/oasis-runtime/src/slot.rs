//! Single-writer data slots for passing values between task bodies.
//!
//! Each slot has exactly one [`SlotWriter`], which is not `Clone`, and any
//! number of [`SlotReader`]s. Give the writer to the one body that owns the
//! value; hand readers to every body downstream. A body that seems to need
//! write access to someone else's slot needs its own slot instead.
//!
//! Everything runs on the sweep thread, so slots are `Rc`/`RefCell` based
//! and deliberately `!Send`.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

struct Shared<T> {
    owner: String,
    value: RefCell<Option<T>>,
    version: Cell<u64>,
}

/// Create a slot owned by the task named `owner`.
pub fn slot<T>(owner: impl Into<String>) -> (SlotWriter<T>, SlotReader<T>) {
    let shared = Rc::new(Shared {
        owner: owner.into(),
        value: RefCell::new(None),
        version: Cell::new(0),
    });
    (
        SlotWriter {
            shared: Rc::clone(&shared),
        },
        SlotReader { shared },
    )
}

/// The only handle that can change a slot.
pub struct SlotWriter<T> {
    shared: Rc<Shared<T>>,
}

impl<T> SlotWriter<T> {
    /// Replace the current value.
    pub fn publish(&self, value: T) {
        *self.shared.value.borrow_mut() = Some(value);
        self.shared.version.set(self.shared.version.get() + 1);
    }

    /// Clear the value, e.g. after a failed read.
    pub fn clear(&self) {
        *self.shared.value.borrow_mut() = None;
        self.shared.version.set(self.shared.version.get() + 1);
    }

    /// Name of the owning task.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.shared.owner
    }

    /// A new reader for this slot.
    #[must_use]
    pub fn reader(&self) -> SlotReader<T> {
        SlotReader {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for SlotWriter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotWriter")
            .field("owner", &self.shared.owner)
            .field("value", &self.shared.value.borrow())
            .finish()
    }
}

/// Read-only view of a slot.
pub struct SlotReader<T> {
    shared: Rc<Shared<T>>,
}

impl<T> Clone for SlotReader<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<T> SlotReader<T> {
    /// Inspect the current value without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        f(self.shared.value.borrow().as_ref())
    }

    /// Number of publishes and clears so far. Lets a reader tell fresh data
    /// from data it has already handled.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.shared.version.get()
    }

    /// Name of the owning task.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.shared.owner
    }
}

impl<T: Clone> SlotReader<T> {
    /// Current value, `None` until the owner first publishes.
    #[must_use]
    pub fn get(&self) -> Option<T> {
        self.shared.value.borrow().clone()
    }

    /// Current value or `default` when nothing was published.
    #[must_use]
    pub fn get_or(&self, default: T) -> T {
        self.get().unwrap_or(default)
    }
}

impl<T: fmt::Debug> fmt::Debug for SlotReader<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotReader")
            .field("owner", &self.shared.owner)
            .field("value", &self.shared.value.borrow())
            .finish()
    }
}
