//! Engine configuration surface.
//!
//! Loaded from a YAML file by the daemon; library consumers can also build
//! these structs directly. Everything except the port list has a default.

use crate::correction::TempParams;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_BAUD: u32 = 38_400;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Inclusive safe voltage bounds for a module.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoltageRange {
    pub min: f64,
    pub max: f64,
}

impl VoltageRange {
    pub fn contains(&self, volts: f64) -> bool {
        volts >= self.min && volts <= self.max
    }

    pub fn clamp(&self, volts: f64) -> f64 {
        volts.clamp(self.min, self.max)
    }
}

impl Default for VoltageRange {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 90.0,
        }
    }
}

/// Engine-wide tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Seconds between background status polls.
    pub poll_interval_s: f64,
    /// Reply wait bound for one exchange, milliseconds.
    pub exchange_timeout_ms: u64,
    /// Total attempts for a timed-out exchange.
    pub retry_budget: u32,
    /// Pause between retry attempts, milliseconds.
    pub retry_backoff_ms: u64,
    /// Consecutive poll failures before a port is marked degraded.
    pub degraded_threshold: u32,
    /// First reconnect delay after a failed open, milliseconds.
    pub reconnect_initial_ms: u64,
    /// Reconnect delay cap, milliseconds.
    pub reconnect_max_ms: u64,
    /// Telemetry records retained per port for history queries.
    pub history_capacity: usize,
    /// Settle time after a device reset before follow-up commands, ms.
    pub reset_settle_ms: u64,
    /// Safe voltage range applied where a port has no override.
    pub safe_range: VoltageRange,
    /// Voltage the output is ramped down to before switching HV off.
    pub hv_off_floor: f64,
    pub hv_off_ramp_steps: u32,
    pub hv_off_ramp_delay_s: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            poll_interval_s: 5.0,
            exchange_timeout_ms: 1_000,
            retry_budget: 3,
            retry_backoff_ms: 100,
            degraded_threshold: 3,
            reconnect_initial_ms: 500,
            reconnect_max_ms: 30_000,
            history_capacity: 4_096,
            reset_settle_ms: 200,
            safe_range: VoltageRange::default(),
            hv_off_floor: 20.5,
            hv_off_ramp_steps: 10,
            hv_off_ramp_delay_s: 0.5,
        }
    }
}

impl EngineSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_s)
    }

    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_millis(self.exchange_timeout_ms)
    }
}

/// One configured module port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortConfig {
    pub id: u8,
    /// Serial device path (e.g. `/dev/ttyAMA0`).
    pub device: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub temp_params: Option<TempParams>,
    /// Per-port override of the engine-wide safe range.
    #[serde(default)]
    pub safe_range: Option<VoltageRange>,
}

fn default_baud() -> u32 {
    DEFAULT_BAUD
}

impl PortConfig {
    pub fn display_label(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| format!("Port {}", self.id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub settings: EngineSettings,
    pub ports: Vec<PortConfig>,
}

impl EngineConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_yaml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ports.is_empty() {
            return Err(ConfigError::Invalid("no ports configured".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for port in &self.ports {
            if !seen.insert(port.id) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate port id {}",
                    port.id
                )));
            }
            let range = port.safe_range.unwrap_or(self.settings.safe_range);
            if range.min >= range.max {
                return Err(ConfigError::Invalid(format!(
                    "port {}: safe range min {} is not below max {}",
                    port.id, range.min, range.max
                )));
            }
        }
        if self.settings.retry_budget == 0 {
            return Err(ConfigError::Invalid("retry_budget must be at least 1".into()));
        }
        if self.settings.degraded_threshold == 0 {
            return Err(ConfigError::Invalid(
                "degraded_threshold must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
