//! Lifecycle acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - Setup stages run exactly once, in order, before any task
//! - A failing stage or body faults the lifecycle and stops progress
//! - Reboot and stop requests take effect between sweeps
//! - Intervals come from configuration; unknown names are rejected

use super::common::RunLog;
use oasis_common::config::McuConfig;
use oasis_common::error::{McuError, McuResult};
use oasis_common::state::RuntimeState;
use oasis_common::time::{ManualClock, Millis, MonotonicClock};
use oasis_runtime::scheduler::{LoopExit, SchedulerBuilder};
use oasis_runtime::service::ControlHandle;
use oasis_runtime::template::{Template, LOOP_SECTIONS, SETUP_SECTIONS};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::thread;
use std::time::Duration;

#[test]
fn test_template_setup_then_loop() {
    let order = Rc::new(RefCell::new(Vec::new()));
    let push = |name: &'static str| {
        let order = Rc::clone(&order);
        move || -> McuResult<()> {
            order.borrow_mut().push(name);
            Ok(())
        }
    };

    let mut scheduler = Template::new()
        .hardware(push("hardware"))
        .networking(push("networking"))
        .set_interrupts(push("set_interrupts"))
        .collect_data(push("collect_data"))
        .process_data(push("process_data"))
        .actuate_io(push("actuate_io"))
        .communicate(push("communicate"))
        .misc_tasks(push("misc_tasks"))
        .into_builder(ManualClock::default())
        .build()
        .unwrap();

    assert!(order.borrow().is_empty(), "nothing runs before setup");

    let report = scheduler.setup().unwrap();
    assert_eq!(*order.borrow(), SETUP_SECTIONS);
    assert_eq!(report.stages.len(), 3);

    order.borrow_mut().clear();
    scheduler.sweep().unwrap();
    scheduler.sweep().unwrap();

    let expected: Vec<&str> = LOOP_SECTIONS.iter().chain(LOOP_SECTIONS.iter()).copied().collect();
    assert_eq!(*order.borrow(), expected);
}

#[test]
fn test_failing_stage_halts_setup() {
    let log = RunLog::new();
    let clock = ManualClock::default();
    let mut scheduler = SchedulerBuilder::new(clock.clone())
        .stage("hardware", || Ok(()))
        .stage("networking", || Err(McuError::body("no carrier")))
        .stage("set_interrupts", || panic!("must not run"))
        .task("collect_data", Duration::ZERO, log.body("collect_data", clock))
        .build()
        .unwrap();

    let err = scheduler.setup().unwrap_err();
    assert!(matches!(err, McuError::StageFailed { ref stage, .. } if stage == "networking"));
    assert_eq!(scheduler.state(), RuntimeState::Fault);

    // No sweep after a failed setup
    assert!(scheduler.sweep().is_err());
    assert!(log.records().is_empty());
}

#[test]
fn test_failing_body_is_fatal() {
    let log = RunLog::new();
    let clock = ManualClock::default();
    let calls = Rc::new(Cell::new(0));
    let body_calls = Rc::clone(&calls);

    let mut scheduler = SchedulerBuilder::new(clock.clone())
        .task("collect_data", Duration::ZERO, log.body("collect_data", clock.clone()))
        .task("process_data", Duration::ZERO, move || {
            body_calls.set(body_calls.get() + 1);
            if body_calls.get() == 3 {
                Err(McuError::body("divide by zero"))
            } else {
                Ok(())
            }
        })
        .task("actuate_io", Duration::ZERO, log.body("actuate_io", clock))
        .build()
        .unwrap();
    scheduler.setup().unwrap();

    let err = scheduler.run().unwrap_err();
    assert!(matches!(err, McuError::TaskFailed { ref task, .. } if task == "process_data"));
    assert_eq!(scheduler.state(), RuntimeState::Fault);
    assert_eq!(scheduler.sweep_count(), 2);
    assert_eq!(log.count("collect_data"), 3);
    assert_eq!(log.count("actuate_io"), 2, "failure aborts the rest of the sweep");
}

#[test]
fn test_reboot_reruns_setup() {
    let control = ControlHandle::new();
    let setups = Rc::new(Cell::new(0));

    let mut exits = Vec::new();
    for _ in 0..3 {
        let setups = Rc::clone(&setups);
        let body_control = control.clone();
        let mut sweeps = 0;

        let mut scheduler = Template::new()
            .hardware(move || {
                setups.set(setups.get() + 1);
                Ok(())
            })
            .misc_tasks(move || {
                sweeps += 1;
                if sweeps == 4 {
                    body_control.request_reboot();
                }
                Ok(())
            })
            .into_builder(ManualClock::default())
            .control(control.clone())
            .build()
            .unwrap();

        scheduler.setup().unwrap();
        exits.push(scheduler.run().unwrap());
        assert_eq!(scheduler.sweep_count(), 4);
        assert_eq!(scheduler.state(), RuntimeState::Boot);
    }

    assert_eq!(exits, vec![LoopExit::Reboot; 3]);
    assert_eq!(setups.get(), 3);
    assert_eq!(control.reboot_count(), 3);
}

#[test]
fn test_stop_from_another_thread() {
    let mut config = McuConfig::default();
    config.runner.idle_sleep = Duration::from_millis(1);

    let control = ControlHandle::new();
    let mut scheduler = SchedulerBuilder::new(MonotonicClock::new())
        .task("collect_data", Duration::from_millis(5), || Ok(()))
        .config(config)
        .control(control.clone())
        .build()
        .unwrap();
    scheduler.setup().unwrap();

    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        control.request_stop();
    });

    assert_eq!(scheduler.run().unwrap(), LoopExit::Stopped);
    assert_eq!(scheduler.state(), RuntimeState::Halted);
    assert!(scheduler.sweep_count() > 0);
    stopper.join().unwrap();
}

#[test]
fn test_intervals_from_toml() {
    let config = McuConfig::from_toml(
        r#"
        [runner]
        max_sweeps = 4

        [intervals]
        collect_data = "0ms"
        communicate = "1s"
        "#,
    )
    .unwrap();

    let clock = ManualClock::default();
    let log = RunLog::new();
    let mut scheduler = Template::new()
        .collect_data(log.body("collect_data", clock.clone()))
        .communicate(log.body("communicate", clock.clone()))
        .into_builder(clock.clone())
        .config(config)
        .build()
        .unwrap();
    scheduler.setup().unwrap();

    assert_eq!(scheduler.run().unwrap(), LoopExit::SweepLimit);
    assert_eq!(log.count("collect_data"), 4);
    assert_eq!(log.count("communicate"), 0);

    clock.set(Millis(1000));
    scheduler.sweep().unwrap();
    assert_eq!(log.count("communicate"), 1);
}

#[test]
fn test_configuration_errors() {
    let duplicate = SchedulerBuilder::new(ManualClock::default())
        .task("communicate", Duration::ZERO, || Ok(()))
        .task("communicate", Duration::from_secs(1), || Ok(()))
        .build();
    assert!(matches!(duplicate, Err(McuError::DuplicateTask(_))));

    let mut config = McuConfig::default();
    config
        .intervals
        .insert("comunicate".into(), Duration::from_secs(1));
    let unknown = Template::new()
        .into_builder(ManualClock::default())
        .config(config)
        .build();
    assert!(matches!(unknown, Err(McuError::UnknownTask(ref n)) if n == "comunicate"));
}
