//! Watchdog acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - A body that stops returning is reported by the watchdog
//! - The watchdog never interrupts the hung body itself
//! - With `reboot_on_timeout`, the loop reboots after the sweep completes
//! - A healthy loop never trips the watchdog, however long it idles
//! - Each separate hang is reported, not only the first

use oasis_common::config::McuConfig;
use oasis_common::state::RuntimeState;
use oasis_common::time::MonotonicClock;
use oasis_runtime::scheduler::{LoopExit, Scheduler, SchedulerBuilder};
use oasis_runtime::service::ControlHandle;
use std::cell::Cell;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

fn watchdog_config(timeout: Duration, reboot: bool) -> McuConfig {
    let mut config = McuConfig::default();
    config.watchdog.enabled = true;
    config.watchdog.timeout = timeout;
    config.watchdog.reboot_on_timeout = reboot;
    config.runner.idle_sleep = Duration::from_millis(1);
    config
}

fn started(builder: SchedulerBuilder<MonotonicClock>) -> Scheduler<MonotonicClock> {
    let mut scheduler = builder.build().unwrap();
    scheduler.setup().unwrap();
    scheduler
}

#[test]
fn test_hung_body_requests_reboot() {
    let control = ControlHandle::new();
    let later_runs = Rc::new(Cell::new(0u32));
    let later = Rc::clone(&later_runs);
    let mut first = true;

    let mut scheduler = started(
        SchedulerBuilder::new(MonotonicClock::new())
            .task("communicate", Duration::ZERO, move || {
                if first {
                    first = false;
                    // Simulated hang, well past the watchdog timeout
                    thread::sleep(Duration::from_millis(300));
                }
                Ok(())
            })
            .task("misc_tasks", Duration::ZERO, move || {
                later.set(later.get() + 1);
                Ok(())
            })
            .config(watchdog_config(Duration::from_millis(50), true))
            .control(control.clone()),
    );

    let start = Instant::now();
    let exit = scheduler.run().unwrap();

    // The hung sweep completed in full before the reboot was honoured
    assert_eq!(exit, LoopExit::Reboot);
    assert!(start.elapsed() >= Duration::from_millis(300));
    assert_eq!(scheduler.sweep_count(), 1);
    assert_eq!(later_runs.get(), 1);
    assert_eq!(scheduler.watchdog_trips(), 1);
    assert_eq!(scheduler.state(), RuntimeState::Boot);
    assert_eq!(control.reboot_count(), 1);

    scheduler.shutdown();
}

#[test]
fn test_watchdog_without_reboot_only_reports() {
    let control = ControlHandle::new();
    let mut first = true;

    let mut scheduler = started(
        SchedulerBuilder::new(MonotonicClock::new())
            .task("collect_data", Duration::ZERO, move || {
                if first {
                    first = false;
                    thread::sleep(Duration::from_millis(200));
                }
                Ok(())
            })
            .config(watchdog_config(Duration::from_millis(40), false))
            .control(control.clone()),
    );

    for _ in 0..5 {
        scheduler.sweep().unwrap();
    }

    assert!(scheduler.watchdog_triggered());
    assert!(!control.reboot_requested());
    assert_eq!(scheduler.state(), RuntimeState::Loop);

    scheduler.shutdown();
}

#[test]
fn test_healthy_loop_never_trips() {
    let control = ControlHandle::new();
    let mut config = watchdog_config(Duration::from_millis(100), true);
    config.runner.max_sweeps = 100;

    let mut scheduler = started(
        SchedulerBuilder::new(MonotonicClock::new())
            .task("collect_data", Duration::ZERO, || Ok(()))
            .task("communicate", Duration::from_millis(20), || Ok(()))
            .config(config)
            .control(control.clone()),
    );

    assert_eq!(scheduler.run().unwrap(), LoopExit::SweepLimit);
    assert!(!scheduler.watchdog_triggered());
    assert_eq!(control.reboot_count(), 0);

    scheduler.shutdown();
}

#[test]
fn test_idle_sleep_longer_than_timeout_is_not_a_hang() {
    let control = ControlHandle::new();
    let mut config = watchdog_config(Duration::from_millis(50), true);
    config.runner.idle_sleep = Duration::from_millis(200);
    config.runner.max_sweeps = 3;

    let mut scheduler = started(
        SchedulerBuilder::new(MonotonicClock::new())
            .task("collect_data", Duration::ZERO, || Ok(()))
            .config(config)
            .control(control.clone()),
    );

    assert_eq!(scheduler.run().unwrap(), LoopExit::SweepLimit);
    assert!(!scheduler.watchdog_triggered());
    assert_eq!(control.reboot_count(), 0);
    assert_eq!(scheduler.state(), RuntimeState::Loop);

    scheduler.shutdown();
}

#[test]
fn test_every_hang_is_reported() {
    let control = ControlHandle::new();
    let mut calls = 0u32;

    let mut scheduler = started(
        SchedulerBuilder::new(MonotonicClock::new())
            .task("communicate", Duration::ZERO, move || {
                calls += 1;
                if calls == 1 || calls == 10 {
                    thread::sleep(Duration::from_millis(200));
                }
                Ok(())
            })
            .config(watchdog_config(Duration::from_millis(40), true))
            .control(control.clone()),
    );

    for _ in 0..12 {
        scheduler.sweep().unwrap();
    }

    assert_eq!(scheduler.watchdog_trips(), 2);
    assert_eq!(control.reboot_count(), 2);

    scheduler.shutdown();
}
