use crate::correction::TempParams;
use serde::{Deserialize, Serialize};

/// The command family accepted at the submission boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandType {
    SetVoltage,
    RampVoltage,
    SetCurrent,
    EnableOcp,
    ToggleHv,
    ToggleTempCorrection,
    SetTempParams,
    Reset,
    Raw,
    ReadStatus,
}

impl CommandType {
    /// Commands that cannot be executed without a numeric value.
    pub fn requires_value(&self) -> bool {
        matches!(
            self,
            CommandType::SetVoltage
                | CommandType::RampVoltage
                | CommandType::SetCurrent
                | CommandType::EnableOcp
        )
    }
}

impl std::fmt::Display for CommandType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CommandType::SetVoltage => "SET_VOLTAGE",
            CommandType::RampVoltage => "RAMP_VOLTAGE",
            CommandType::SetCurrent => "SET_CURRENT",
            CommandType::EnableOcp => "ENABLE_OCP",
            CommandType::ToggleHv => "TOGGLE_HV",
            CommandType::ToggleTempCorrection => "TOGGLE_TEMP_CORRECTION",
            CommandType::SetTempParams => "SET_TEMP_PARAMS",
            CommandType::Reset => "RESET",
            CommandType::Raw => "RAW",
            CommandType::ReadStatus => "READ_STATUS",
        };
        f.write_str(name)
    }
}

/// One command submission for a single port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    pub port_id: u8,
    pub command_type: CommandType,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub ramp_steps: Option<u32>,
    #[serde(default)]
    pub ramp_delay_s: Option<f64>,
    #[serde(default)]
    pub raw: Option<String>,
    #[serde(default)]
    pub temp_params: Option<TempParams>,
}

impl CommandRequest {
    pub fn new(port_id: u8, command_type: CommandType) -> Self {
        Self {
            port_id,
            command_type,
            value: None,
            ramp_steps: None,
            ramp_delay_s: None,
            raw: None,
            temp_params: None,
        }
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_ramp(mut self, steps: u32, delay_s: f64) -> Self {
        self.ramp_steps = Some(steps);
        self.ramp_delay_s = Some(delay_s);
        self
    }

    pub fn raw(port_id: u8, raw: impl Into<String>) -> Self {
        let mut request = Self::new(port_id, CommandType::Raw);
        request.raw = Some(raw.into());
        request
    }

    pub fn set_temp_params(port_id: u8, params: TempParams) -> Self {
        let mut request = Self::new(port_id, CommandType::SetTempParams);
        request.temp_params = Some(params);
        request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_requirement_matches_command_family() {
        assert!(CommandType::SetVoltage.requires_value());
        assert!(CommandType::RampVoltage.requires_value());
        assert!(CommandType::SetCurrent.requires_value());
        assert!(CommandType::EnableOcp.requires_value());
        assert!(!CommandType::ToggleHv.requires_value());
        assert!(!CommandType::Reset.requires_value());
        assert!(!CommandType::ReadStatus.requires_value());
    }

    #[test]
    fn request_round_trips_through_serde() {
        let request = CommandRequest::new(2, CommandType::RampVoltage)
            .with_value(70.0)
            .with_ramp(10, 0.5);
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"RAMP_VOLTAGE\""));
        let back: CommandRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.command_type, CommandType::RampVoltage);
        assert_eq!(back.ramp_steps, Some(10));
    }
}
