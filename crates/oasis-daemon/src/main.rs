//! OASIS-MCU daemon entry point.
//!
//! Runs the firmware template on a workstation: loads configuration, wires
//! Unix signals to stop/reboot/interrupt requests, then boots the firmware
//! and sweeps it until stopped. A reboot rebuilds the firmware from scratch
//! and reruns setup, reloading the configuration first.

mod diagnostics;
mod firmware;
mod signals;

use anyhow::{Context, Result};
use clap::Parser;
use oasis_common::config::{parse_interval_override, McuConfig};
use oasis_common::state::RuntimeState;
use oasis_common::time::MonotonicClock;
use oasis_runtime::interrupt::InterruptFlags;
use oasis_runtime::scheduler::LoopExit;
use oasis_runtime::service::ControlHandle;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::diagnostics::{DiagnosticsCollector, DiagnosticsState};
use crate::firmware::BUTTON_INTERRUPT;
use crate::signals::SignalHandler;

/// OASIS-MCU daemon command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "oasis-daemon",
    about = "Run the OASIS-MCU firmware template as a host process",
    version,
    long_about = None
)]
struct Args {
    /// Path to a runtime configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Maximum sweeps per boot (0 = infinite). Overrides the config file.
    #[arg(long, value_name = "N")]
    max_sweeps: Option<u64>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,

    /// Per-task interval override, e.g. `communicate=1s`. Repeatable.
    #[arg(long = "interval", value_name = "NAME=DURATION")]
    intervals: Vec<String>,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    print_config: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level);

    let config = effective_config(&args)?;

    if args.print_config {
        print!("{}", config.to_toml().context("Failed to render config")?);
        return Ok(());
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Starting OASIS-MCU daemon");

    let control = ControlHandle::new();
    let mut interrupts = InterruptFlags::new();
    let button = interrupts.register(BUTTON_INTERRUPT);

    // Set up signal handling
    let signal_handler =
        SignalHandler::new(control.clone(), button).context("Failed to set up signal handlers")?;

    // Set up diagnostics
    let diagnostics = DiagnosticsCollector::new(Arc::new(DiagnosticsState::new()));

    let result = run_daemon(&args, config, &control, &interrupts, &diagnostics);

    info!(
        boots = diagnostics.state().boots(),
        sweeps = diagnostics.state().total_sweeps(),
        signals = signal_handler.signal_count(),
        uptime = %humantime::format_duration(Duration::from_secs(diagnostics.state().uptime().as_secs())),
        "Daemon shutdown complete"
    );
    result
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!("oasis_daemon={level},oasis_runtime={level},oasis_common={level}");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration and apply command-line overrides.
fn effective_config(args: &Args) -> Result<McuConfig> {
    let mut config = load_config(args)?;
    apply_overrides(&mut config, args)?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Apply `--max-sweeps` and `--interval` on top of the loaded file.
fn apply_overrides(config: &mut McuConfig, args: &Args) -> Result<()> {
    if let Some(max_sweeps) = args.max_sweeps {
        config.runner.max_sweeps = max_sweeps;
    }
    for raw in &args.intervals {
        let (name, interval) =
            parse_interval_override(raw).with_context(|| format!("Bad --interval {raw:?}"))?;
        config.intervals.insert(name, interval);
    }
    Ok(())
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `OASIS_CONFIG_PATH` environment variable
/// 3. `/etc/oasis/config.toml` (system path)
/// 4. `config/default.toml` (local development)
/// 5. Built-in defaults
fn load_config(args: &Args) -> Result<McuConfig> {
    // 1. Command-line argument (highest priority)
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return McuConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {config_path:?}"));
    }

    // 2. Environment variable
    if let Ok(env_path) = std::env::var("OASIS_CONFIG_PATH") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from OASIS_CONFIG_PATH");
            return McuConfig::from_file(&config_path).with_context(|| {
                format!("Failed to load config from OASIS_CONFIG_PATH={env_path:?}")
            });
        }
        warn!(
            path = %env_path,
            "OASIS_CONFIG_PATH set but file does not exist, checking other locations"
        );
    }

    // 3. System path
    let system_path = PathBuf::from("/etc/oasis/config.toml");
    if system_path.exists() {
        info!(?system_path, "Loading config from system path");
        return McuConfig::from_file(&system_path)
            .with_context(|| format!("Failed to load config from {system_path:?}"));
    }

    // 4. Local development path
    let local_path = PathBuf::from("config/default.toml");
    if local_path.exists() {
        info!(?local_path, "Loading config from local path");
        return McuConfig::from_file(&local_path)
            .with_context(|| format!("Failed to load config from {local_path:?}"));
    }

    // 5. Built-in defaults
    info!("No config file found, using built-in defaults");
    Ok(McuConfig::default())
}

/// Boot, set up and sweep the firmware until it stops, rebooting on request.
fn run_daemon(
    args: &Args,
    mut config: McuConfig,
    control: &ControlHandle,
    interrupts: &InterruptFlags,
    diagnostics: &DiagnosticsCollector,
) -> Result<()> {
    loop {
        let boot = diagnostics.state().record_boot();
        if boot > 1 {
            match effective_config(args) {
                Ok(reloaded) => config = reloaded,
                Err(e) => warn!(error = %e, "Config reload failed, keeping previous config"),
            }
        }
        info!(
            boot,
            max_sweeps = config.runner.max_sweeps,
            watchdog = config.watchdog.enabled,
            "Booting firmware"
        );

        let (template, outputs) = firmware::build(&config, interrupts, boot);
        let mut scheduler = template
            .into_builder(MonotonicClock::new())
            .config(config.clone())
            .control(control.clone())
            .build()
            .context("Failed to build scheduler")?;

        let outcome = scheduler
            .setup()
            .context("Setup failed")
            .and_then(|report| {
                info!(
                    stages = report.stages.len(),
                    elapsed_us = report.total().as_micros(),
                    "Setup finished"
                );
                scheduler.run().context("Loop failed")
            });

        scheduler.shutdown();
        info!(
            heater = outputs.heater.get_or(false),
            reports = outputs.report.version(),
            "Final outputs"
        );
        let sweeps = scheduler.metrics().snapshot();
        diagnostics
            .state()
            .record_run(&sweeps, scheduler.watchdog_triggered());
        emit_status(diagnostics, scheduler.state(), &sweeps);

        match outcome {
            Ok(LoopExit::Reboot) => {
                info!(boot, "Rebooting");
            }
            Ok(exit) => {
                info!(?exit, "Firmware stopped");
                return Ok(());
            }
            Err(e) => {
                error!(error = %format!("{e:#}"), "Firmware faulted");
                return Err(e);
            }
        }
    }
}

/// Write the diagnostics snapshot as a JSON line on stdout.
fn emit_status(
    diagnostics: &DiagnosticsCollector,
    state: RuntimeState,
    sweeps: &oasis_common::metrics::SweepSnapshot,
) {
    match diagnostics.snapshot(state, sweeps).to_json_line() {
        Ok(line) => println!("{line}"),
        Err(e) => warn!(error = %e, "Failed to render status line"),
    }
}
