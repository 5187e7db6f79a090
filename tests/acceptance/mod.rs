//! Integration tests for OASIS-MCU acceptance testing.

mod common;
mod lifecycle_test;
mod scheduling_test;
mod watchdog_test;
