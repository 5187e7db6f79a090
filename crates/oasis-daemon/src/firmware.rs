//! Demo firmware wired into the template sections.
//!
//! A simulated thermostat: `collect_data` samples a temperature,
//! `process_data` smooths it, `actuate_io` drives a heater output,
//! `communicate` emits a JSON report line and `misc_tasks` services the
//! button interrupt. Every cross-section value travels through a slot owned
//! by exactly one section.

use oasis_common::config::McuConfig;
use oasis_common::error::{McuError, McuResult};
use oasis_runtime::interrupt::InterruptFlags;
use oasis_runtime::service::Reconnect;
use oasis_runtime::slot::{slot, SlotReader};
use oasis_runtime::template::Template;
use serde::Serialize;
use std::cell::Cell;
use std::rc::Rc;
use tracing::{debug, info, warn};

/// Name of the interrupt raised by the simulated button.
pub const BUTTON_INTERRUPT: &str = "button";

/// Heater switches on below this filtered temperature.
const HEATER_ON_BELOW: f32 = 21.0;

/// Smoothing factor of the exponential moving average.
const SMOOTHING: f32 = 0.2;

/// One line written by `communicate`.
#[derive(Debug, Clone, Serialize)]
pub struct ReportLine {
    /// Boot number.
    pub boot: u32,
    /// Samples taken in this boot.
    pub samples: u64,
    /// Latest raw temperature.
    pub raw: Option<f32>,
    /// Smoothed temperature.
    pub filtered: Option<f32>,
    /// Heater output.
    pub heater: bool,
    /// Manual override toggled by the button.
    pub manual_override: bool,
}

/// Readers for what the firmware publishes, for the daemon and tests.
#[derive(Debug, Clone)]
pub struct FirmwareOutputs {
    /// Heater output.
    pub heater: SlotReader<bool>,
    /// Latest report line as JSON.
    pub report: SlotReader<String>,
}

/// Link that comes up on a given connection attempt.
#[derive(Debug, Clone, Copy)]
struct SimulatedLink {
    up_on_attempt: u32,
}

impl SimulatedLink {
    fn connect(self, attempt: u32) -> McuResult<()> {
        if attempt >= self.up_on_attempt {
            Ok(())
        } else {
            Err(McuError::IoError("link down".into()))
        }
    }
}

/// Simulated temperature sensor.
fn sample_temperature(n: u64) -> f32 {
    #[allow(clippy::cast_precision_loss)]
    let phase = (n % 628) as f32 / 100.0;
    21.0 + 3.0 * phase.sin()
}

/// Build the template for one boot.
pub fn build(config: &McuConfig, interrupts: &InterruptFlags, boot: u32) -> (Template, FirmwareOutputs) {
    let (raw_writer, raw) = slot::<f32>("collect_data");
    let (filtered_writer, filtered) = slot::<f32>("process_data");
    let (heater_writer, heater) = slot::<bool>("actuate_io");
    let (report_writer, report) = slot::<String>("communicate");
    let (override_writer, manual_override) = slot::<bool>("misc_tasks");

    let baud_rate = config.serial.baud_rate;
    let networking = config.networking.clone();
    let setup_flags = interrupts.clone();
    let loop_flags = interrupts.clone();
    let samples = Rc::new(Cell::new(0u64));

    let template = Template::new()
        .hardware(move || {
            info!(boot, baud_rate, "Hardware initialized (simulated)");
            Ok(())
        })
        .networking(move || {
            if !networking.wait_for_connection {
                debug!("Not waiting for a connection");
                return Ok(());
            }
            let link = SimulatedLink { up_on_attempt: 2 };
            let attempts = Reconnect::from_config(&networking).run("networking", |n| link.connect(n))?;
            info!(attempts, "Network connected");
            Ok(())
        })
        .set_interrupts(move || {
            let stale = setup_flags.take_raised();
            if !stale.is_empty() {
                debug!(?stale, "Cleared interrupts raised before setup");
            }
            info!(flag = BUTTON_INTERRUPT, "Interrupts armed");
            Ok(())
        })
        .collect_data({
            let samples = Rc::clone(&samples);
            move || {
                let n = samples.get();
                raw_writer.publish(sample_temperature(n));
                samples.set(n + 1);
                Ok(())
            }
        })
        .process_data({
            let raw = raw.clone();
            let current = filtered_writer.reader();
            let mut seen = 0;
            move || {
                if raw.version() == seen {
                    return Ok(());
                }
                seen = raw.version();
                if let Some(sample) = raw.get() {
                    let next = current.get().map_or(sample, |prev| prev + SMOOTHING * (sample - prev));
                    filtered_writer.publish(next);
                }
                Ok(())
            }
        })
        .actuate_io({
            let filtered = filtered.clone();
            let manual_override = manual_override.clone();
            move || {
                let on = manual_override.get_or(false)
                    || filtered.get().is_some_and(|t| t < HEATER_ON_BELOW);
                if heater_writer.reader().get() != Some(on) {
                    debug!(heater = on, "Heater output changed");
                    heater_writer.publish(on);
                }
                Ok(())
            }
        })
        .communicate({
            let heater = heater.clone();
            let manual_override = manual_override.clone();
            move || {
                let line = ReportLine {
                    boot,
                    samples: samples.get(),
                    raw: raw.get(),
                    filtered: filtered.get(),
                    heater: heater.get_or(false),
                    manual_override: manual_override.get_or(false),
                };
                let json = serde_json::to_string(&line).map_err(McuError::body)?;
                println!("{json}");
                report_writer.publish(json);
                Ok(())
            }
        })
        .misc_tasks(move || {
            for name in loop_flags.take_raised() {
                if name == BUTTON_INTERRUPT {
                    let on = !manual_override.get_or(false);
                    info!(manual_override = on, "Button pressed");
                    override_writer.publish(on);
                } else {
                    warn!(flag = name, "Unhandled interrupt");
                }
            }
            Ok(())
        });

    (template, FirmwareOutputs { heater, report })
}
