use crate::correction::TempParams;
use crate::protocol::StatusFlags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Live view of one module, updated only by its dispatcher and poller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleState {
    pub port_id: u8,
    pub label: String,
    pub voltage: Option<f64>,
    pub current: Option<f64>,
    pub temperature: Option<f64>,
    pub is_hv_on: Option<bool>,
    pub is_overcurrent: Option<bool>,
    pub is_current_limit: Option<bool>,
    pub is_temp_sensor_connected: Option<bool>,
    pub is_temp_in_range: Option<bool>,
    pub is_temp_correction_enabled: Option<bool>,
    pub temp_params: TempParams,
    pub last_updated: Option<DateTime<Utc>>,
    pub degraded: bool,
}

impl ModuleState {
    pub fn new(port_id: u8, label: String, temp_params: TempParams) -> Self {
        Self {
            port_id,
            label,
            voltage: None,
            current: None,
            temperature: None,
            is_hv_on: None,
            is_overcurrent: None,
            is_current_limit: None,
            is_temp_sensor_connected: None,
            is_temp_in_range: None,
            is_temp_correction_enabled: None,
            temp_params,
            last_updated: None,
            degraded: false,
        }
    }

    pub fn apply_flags(&mut self, flags: StatusFlags) {
        self.is_hv_on = Some(flags.is_hv_on);
        self.is_overcurrent = Some(flags.is_overcurrent);
        self.is_current_limit = Some(flags.is_current_limit);
        self.is_temp_sensor_connected = Some(flags.is_temp_sensor_connected);
        self.is_temp_in_range = Some(flags.is_temp_in_range);
        self.is_temp_correction_enabled = Some(flags.is_temp_correction_enabled);
    }
}

/// Failure classification carried on outcomes and action records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Range,
    Timeout,
    Protocol,
    DeviceFault,
    Unavailable,
    Unsupported,
    Cancelled,
}

/// Terminal result of one submitted command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub port_id: u8,
    /// Display form of what ran, e.g. `SET_VOLTAGE: 72.5V`.
    pub command: String,
    pub tx: String,
    pub rx: String,
    pub success: bool,
    pub error_kind: Option<ErrorKind>,
    pub message: String,
    /// For ramps: how many steps completed before the terminal transition.
    pub completed_steps: Option<u32>,
}

/// One append-only entry for the action-log sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub port_id: u8,
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub tx: String,
    pub rx: String,
    pub success: bool,
    pub error_kind: Option<ErrorKind>,
}

/// One decoded status poll, as emitted to the telemetry sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub port_id: u8,
    pub timestamp: DateTime<Utc>,
    pub voltage: f64,
    pub current: f64,
    pub temperature: f64,
    pub flags: StatusFlags,
}

/// What a submission caller gets back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub success: bool,
    pub message: String,
}
