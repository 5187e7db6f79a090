#![doc = "Cooperative, timer-gated multi-rate task runtime."]

pub mod interrupt;
pub mod scheduler;
pub mod service;
pub mod setup;
pub mod slot;
pub mod task;
pub mod template;
pub mod watchdog;

pub use interrupt::*;
pub use scheduler::*;
pub use service::*;
pub use setup::*;
pub use slot::*;
pub use task::*;
pub use template::*;
pub use watchdog::*;
