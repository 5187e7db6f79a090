//! Configuration structures for the task runtime.
//!
//! Supports TOML deserialization with sensible defaults. Every loop section
//! defaults to a 0 ms interval, i.e. it runs on every sweep until configured
//! otherwise.

use crate::time::interval_ms;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct McuConfig {
    /// Loop runner behaviour.
    pub runner: RunnerConfig,

    /// Per-task intervals keyed by task name.
    #[serde(with = "humantime_serde_map")]
    pub intervals: BTreeMap<String, Duration>,

    /// Software watchdog.
    pub watchdog: WatchdogConfig,

    /// Networking setup stage policy.
    pub networking: NetworkingConfig,

    /// Serial console settings.
    pub serial: SerialConfig,

    /// Metrics collection.
    pub metrics: MetricsConfig,
}

/// Loop runner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Maximum sweeps to run (0 = forever).
    pub max_sweeps: u64,

    /// Sleep between sweeps so a host process does not spin a core.
    /// Gating is unaffected; 0 disables.
    #[serde(with = "humantime_serde")]
    pub idle_sleep: Duration,

    /// Task bodies running longer than this are logged as slow.
    #[serde(with = "humantime_serde")]
    pub slow_task_warn: Duration,

    /// Period of the status log line (0 disables).
    #[serde(with = "humantime_serde")]
    pub log_interval: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_sweeps: 0,
            idle_sleep: Duration::ZERO,
            slow_task_warn: Duration::from_millis(50),
            log_interval: Duration::from_secs(10),
        }
    }
}

/// Software watchdog configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Enable the watchdog monitor.
    pub enabled: bool,

    /// Time without a kick before the watchdog fires.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Request a reboot when the watchdog fires.
    pub reboot_on_timeout: bool,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout: Duration::from_secs(1),
            reboot_on_timeout: false,
        }
    }
}

/// Networking stage policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkingConfig {
    /// Block setup until a connection is established.
    /// When false, setup proceeds without a connection.
    pub wait_for_connection: bool,

    /// Connection attempts before giving up.
    pub max_attempts: u32,

    /// Delay before the first retry.
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,

    /// Upper bound for the doubling retry delay.
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl Default for NetworkingConfig {
    fn default() -> Self {
        Self {
            wait_for_connection: false,
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// Serial console settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Console baud rate.
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self { baud_rate: 9600 }
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Size of the sweep duration ring buffer.
    pub histogram_size: usize,

    /// Sweeps longer than this are counted as slow.
    #[serde(with = "humantime_serde")]
    pub slow_sweep: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            histogram_size: 1024,
            slow_sweep: Duration::from_millis(100),
        }
    }
}

impl McuConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config = Self::from_toml(&content)?;
        debug!(
            path = %path.display(),
            intervals = config.intervals.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check values that parse but cannot be honoured.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first offending value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, interval) in &self.intervals {
            if name.is_empty() {
                return Err(ConfigError::Invalid("empty task name in [intervals]".into()));
            }
            interval_ms(*interval)
                .map_err(|e| ConfigError::Invalid(format!("intervals.{name}: {e}")))?;
        }
        if self.watchdog.enabled && self.watchdog.timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "watchdog.timeout must be non-zero when the watchdog is enabled".into(),
            ));
        }
        if self.networking.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "networking.max_attempts must be at least 1".into(),
            ));
        }
        if self.networking.initial_backoff > self.networking.max_backoff {
            return Err(ConfigError::Invalid(
                "networking.initial_backoff exceeds networking.max_backoff".into(),
            ));
        }
        if self.metrics.histogram_size == 0 {
            return Err(ConfigError::Invalid(
                "metrics.histogram_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value parsed but is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Parse a `NAME=DURATION` override such as `collect_data=250ms`.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] if the pair is malformed.
pub fn parse_interval_override(raw: &str) -> Result<(String, Duration), ConfigError> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| ConfigError::Invalid(format!("expected NAME=DURATION, got '{raw}'")))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(ConfigError::Invalid(format!("missing task name in '{raw}'")));
    }
    let interval = humantime::parse_duration(value.trim())
        .map_err(|e| ConfigError::Invalid(format!("bad duration for {name}: {e}")))?;
    Ok((name.to_string(), interval))
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

/// Same as `humantime_serde`, for a name-to-duration table.
mod humantime_serde_map {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::collections::BTreeMap;
    use std::time::Duration;

    pub fn serialize<S>(map: &BTreeMap<String, Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_map(
            map.iter()
                .map(|(name, d)| (name, humantime::format_duration(*d).to_string())),
        )
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<String, Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(name, s)| {
                humantime::parse_duration(&s)
                    .map(|d| (name.clone(), d))
                    .map_err(|e| serde::de::Error::custom(format!("{name}: {e}")))
            })
            .collect()
    }
}
