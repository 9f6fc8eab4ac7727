//! Per-port command execution.
//!
//! One dispatcher owns the execution of user commands against one module:
//! validation and range checks before any I/O, a single framed exchange at
//! a time through the shared channel mutex, timeout retries with backoff,
//! ramp expansion with cancellation between steps, and exactly one
//! action-log record per terminal transition.

use crate::channel::{ChannelError, PortChannel};
use crate::config::{EngineSettings, PortConfig, VoltageRange};
use crate::correction::{self, TempParams};
use crate::manager::models::{ActionRecord, CommandOutcome, ErrorKind, ModuleState};
use crate::protocol::codec::{self, MonitorReading};
use crate::protocol::{status, CommandRequest, CommandType, ProtocolError, StatusFlags};
use crate::sink::ActionLogSink;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};

const DEFAULT_RAMP_STEPS: u32 = 10;
const DEFAULT_RAMP_DELAY_S: f64 = 0.5;

/// Resolved execution settings for one port.
#[derive(Debug, Clone)]
pub struct PortSettings {
    pub safe_range: VoltageRange,
    pub retry_budget: u32,
    pub retry_backoff: Duration,
    pub reset_settle: Duration,
    pub hv_off_floor: f64,
    pub hv_off_ramp_steps: u32,
    pub hv_off_ramp_delay: Duration,
}

impl PortSettings {
    pub fn from_config(engine: &EngineSettings, port: &PortConfig) -> Self {
        Self {
            safe_range: port.safe_range.unwrap_or(engine.safe_range),
            retry_budget: engine.retry_budget.max(1),
            retry_backoff: Duration::from_millis(engine.retry_backoff_ms),
            reset_settle: Duration::from_millis(engine.reset_settle_ms),
            hv_off_floor: engine.hv_off_floor,
            hv_off_ramp_steps: engine.hv_off_ramp_steps,
            hv_off_ramp_delay: Duration::from_secs_f64(engine.hv_off_ramp_delay_s),
        }
    }
}

/// A wire-level failure, already classified for the outcome record.
#[derive(Debug, Clone)]
pub struct ExchangeFailure {
    pub kind: ErrorKind,
    pub rx: String,
    pub message: String,
}

struct ExchangeOk {
    reply: codec::Reply,
    rx: String,
}

/// What a validated request will actually do.
enum Plan {
    SetVoltage(f64),
    Ramp {
        target: f64,
        steps: u32,
        delay: Duration,
    },
    ToggleHv,
    ToggleCorrection,
    SetTempParams(TempParams),
    Reset,
    Raw(String),
    ReadStatus,
    Unsupported,
}

enum RampEnd {
    Done,
    Cancelled,
    Failed(ExchangeFailure),
}

struct RampResult {
    completed: u32,
    end: RampEnd,
}

pub struct Dispatcher {
    port_id: u8,
    channel: Arc<Mutex<PortChannel>>,
    state: Arc<RwLock<ModuleState>>,
    settings: PortSettings,
    action_log: Arc<dyn ActionLogSink>,
    // Bumped on every user submission; a ramp aborts once a newer command
    // has claimed the port.
    generation: AtomicU64,
    shutdown: watch::Receiver<bool>,
}

impl Dispatcher {
    pub fn new(
        port_id: u8,
        channel: Arc<Mutex<PortChannel>>,
        state: Arc<RwLock<ModuleState>>,
        settings: PortSettings,
        action_log: Arc<dyn ActionLogSink>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            port_id,
            channel,
            state,
            settings,
            action_log,
            generation: AtomicU64::new(0),
            shutdown,
        }
    }

    pub fn safe_range(&self) -> VoltageRange {
        self.settings.safe_range
    }

    /// Runs one submitted command to its terminal transition.
    pub async fn execute(&self, request: &CommandRequest) -> CommandOutcome {
        let my_gen = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let label = command_label(request);

        let plan = match self.validate(request) {
            Ok(plan) => plan,
            Err((kind, reason)) => {
                let outcome = self.rejected(&label, kind, reason);
                self.log_outcome(&outcome).await;
                return outcome;
            }
        };

        let outcome = match plan {
            Plan::SetVoltage(value) => self.run_set_voltage(&label, value).await,
            Plan::Ramp {
                target,
                steps,
                delay,
            } => self.run_ramp(&label, my_gen, target, steps, delay).await,
            Plan::ToggleHv => self.run_toggle_hv(&label, my_gen).await,
            Plan::ToggleCorrection => self.run_toggle_correction(&label).await,
            Plan::SetTempParams(params) => self.run_set_temp_params(&label, params).await,
            Plan::Reset => self.run_reset(&label).await,
            Plan::Raw(body) => self.run_raw(&label, &body).await,
            Plan::ReadStatus => self.run_read_status(&label).await,
            Plan::Unsupported => self.rejected(
                &label,
                ErrorKind::Unsupported,
                "Command not supported by this module family.".into(),
            ),
        };

        // A fully successful ramp is already on the log, one record per
        // step; everything else gets its terminal record here.
        let logged_by_steps =
            request.command_type == CommandType::RampVoltage && outcome.success;
        if !logged_by_steps {
            self.log_outcome(&outcome).await;
        }
        outcome
    }

    /// One `HPO` exchange; updates the module state on success. Shared by
    /// the poller and by commands that need a fresh output voltage.
    pub async fn read_monitor(
        &self,
    ) -> Result<(MonitorReading, StatusFlags), ExchangeFailure> {
        let ok = self.exchange(codec::READ_MONITOR, true).await?;
        let reading = codec::parse_monitor(&ok.reply).map_err(|e| ExchangeFailure {
            kind: ErrorKind::Protocol,
            rx: ok.rx.clone(),
            message: e.to_string(),
        })?;
        let flags = status::decode(reading.status);
        let mut state = self.state.write().await;
        state.voltage = Some(reading.voltage);
        state.current = Some(reading.current);
        state.temperature = Some(reading.temperature);
        state.apply_flags(flags);
        state.last_updated = Some(Utc::now());
        state.degraded = false;
        Ok((reading, flags))
    }

    fn validate(&self, request: &CommandRequest) -> Result<Plan, (ErrorKind, String)> {
        if request.command_type.requires_value() {
            match request.value {
                None => {
                    return Err((
                        ErrorKind::Validation,
                        "A 'value' is required for this command.".into(),
                    ))
                }
                Some(value) if !value.is_finite() => {
                    return Err((
                        ErrorKind::Validation,
                        format!("Value {} is not a finite number.", value),
                    ))
                }
                _ => {}
            }
        }

        match request.command_type {
            CommandType::SetVoltage | CommandType::RampVoltage => {
                let value = request.value.unwrap_or_default();
                let range = self.settings.safe_range;
                if !range.contains(value) {
                    return Err((
                        ErrorKind::Range,
                        format!(
                            "Voltage {:.3} V outside safe range {:.3}..{:.3} V.",
                            value, range.min, range.max
                        ),
                    ));
                }
                if request.command_type == CommandType::SetVoltage {
                    return Ok(Plan::SetVoltage(value));
                }
                let steps = request.ramp_steps.unwrap_or(DEFAULT_RAMP_STEPS);
                if steps == 0 {
                    return Err((
                        ErrorKind::Validation,
                        "ramp_steps must be positive.".into(),
                    ));
                }
                let delay_s = request.ramp_delay_s.unwrap_or(DEFAULT_RAMP_DELAY_S);
                if !(delay_s.is_finite() && delay_s > 0.0) {
                    return Err((
                        ErrorKind::Validation,
                        "ramp_delay_s must be positive.".into(),
                    ));
                }
                Ok(Plan::Ramp {
                    target: value,
                    steps,
                    delay: Duration::from_secs_f64(delay_s),
                })
            }
            CommandType::SetCurrent | CommandType::EnableOcp => Ok(Plan::Unsupported),
            CommandType::ToggleHv => Ok(Plan::ToggleHv),
            CommandType::ToggleTempCorrection => Ok(Plan::ToggleCorrection),
            CommandType::SetTempParams => {
                let params = request.temp_params.ok_or((
                    ErrorKind::Validation,
                    "Temperature parameters are required for this command.".to_string(),
                ))?;
                let range = self.settings.safe_range;
                if !range.contains(params.v0) {
                    return Err((
                        ErrorKind::Range,
                        format!(
                            "Reference voltage {:.3} V outside safe range {:.3}..{:.3} V.",
                            params.v0, range.min, range.max
                        ),
                    ));
                }
                Ok(Plan::SetTempParams(params))
            }
            CommandType::Reset => Ok(Plan::Reset),
            CommandType::Raw => match request.raw.as_deref().map(str::trim) {
                None | Some("") => Err((
                    ErrorKind::Validation,
                    "Raw command cannot be empty.".into(),
                )),
                Some(body) => Ok(Plan::Raw(body.to_string())),
            },
            CommandType::ReadStatus => Ok(Plan::ReadStatus),
        }
    }

    async fn run_set_voltage(&self, label: &str, value: f64) -> CommandOutcome {
        // An explicit setpoint must win over the on-module correction loop,
        // so correction is switched off first and that switch is recorded.
        if self.state.read().await.is_temp_correction_enabled == Some(true) {
            let body = codec::encode_correction(false);
            match self.exchange(body, true).await {
                Ok(ok) => {
                    self.state.write().await.is_temp_correction_enabled = Some(false);
                    self.append_record(
                        "TOGGLE_TEMP_CORRECTION (off before explicit setpoint)",
                        body,
                        &ok.rx,
                        true,
                        None,
                    )
                    .await;
                }
                Err(failure) => {
                    return self.failed(label, body, failure);
                }
            }
        }

        let body = codec::encode_set_voltage(value);
        match self.exchange(&body, true).await {
            Ok(ok) => self.succeeded(
                label,
                &body,
                &ok.rx,
                format!("Voltage set to {:.3} V.", value),
            ),
            Err(failure) => self.failed(label, &body, failure),
        }
    }

    async fn run_ramp(
        &self,
        label: &str,
        my_gen: u64,
        target: f64,
        steps: u32,
        delay: Duration,
    ) -> CommandOutcome {
        let start = match self.read_monitor().await {
            Ok((reading, _)) => reading.voltage,
            Err(failure) => {
                log::warn!(
                    "[port {}] Could not read voltage before ramp ({}); using last known",
                    self.port_id,
                    failure.message
                );
                let state = self.state.read().await;
                state.voltage.unwrap_or(self.settings.safe_range.min)
            }
        };

        let profile = ramp_profile(start, target, steps, &self.settings.safe_range);
        let total = profile.len() as u32;
        let result = self.run_stepped_writes(label, my_gen, &profile, delay).await;

        let mut outcome = match result.end {
            RampEnd::Done => self.succeeded(
                label,
                &codec::encode_set_voltage(target),
                "",
                format!(
                    "Ramped to {:.3} V in {} steps from {:.3} V.",
                    target, total, start
                ),
            ),
            RampEnd::Cancelled => self.rejected(
                label,
                ErrorKind::Cancelled,
                format!("Ramp cancelled after {}/{} steps.", result.completed, total),
            ),
            RampEnd::Failed(failure) => {
                let mut outcome =
                    self.failed(label, &codec::encode_set_voltage(target), failure);
                outcome.message = format!(
                    "Ramp aborted after {}/{} steps: {}",
                    result.completed, total, outcome.message
                );
                outcome
            }
        };
        outcome.completed_steps = Some(result.completed);
        outcome
    }

    async fn run_toggle_hv(&self, label: &str, my_gen: u64) -> CommandOutcome {
        let hv_on = self.state.read().await.is_hv_on;
        if hv_on != Some(true) {
            return match self.exchange(codec::HV_ON, true).await {
                Ok(ok) => {
                    self.state.write().await.is_hv_on = Some(true);
                    self.succeeded(label, codec::HV_ON, &ok.rx, "HV output on.".into())
                }
                Err(failure) => self.failed(label, codec::HV_ON, failure),
            };
        }

        // Bring the output down gently before cutting it.
        let start = match self.read_monitor().await {
            Ok((reading, _)) => reading.voltage,
            Err(_) => {
                let state = self.state.read().await;
                state.voltage.unwrap_or(self.settings.hv_off_floor)
            }
        };
        if start > self.settings.hv_off_floor + f64::EPSILON {
            let profile = ramp_profile(
                start,
                self.settings.hv_off_floor,
                self.settings.hv_off_ramp_steps,
                &self.settings.safe_range,
            );
            let result = self
                .run_stepped_writes(label, my_gen, &profile, self.settings.hv_off_ramp_delay)
                .await;
            match result.end {
                RampEnd::Done => {}
                RampEnd::Cancelled => {
                    let mut outcome = self.rejected(
                        label,
                        ErrorKind::Cancelled,
                        format!(
                            "HV off cancelled during ramp-down ({} steps done); output left on.",
                            result.completed
                        ),
                    );
                    outcome.completed_steps = Some(result.completed);
                    return outcome;
                }
                RampEnd::Failed(failure) => {
                    return self.failed(label, codec::HV_OFF, failure);
                }
            }
        }

        match self.exchange(codec::HV_OFF, true).await {
            Ok(ok) => {
                self.state.write().await.is_hv_on = Some(false);
                self.succeeded(label, codec::HV_OFF, &ok.rx, "HV output off.".into())
            }
            Err(failure) => self.failed(label, codec::HV_OFF, failure),
        }
    }

    async fn run_toggle_correction(&self, label: &str) -> CommandOutcome {
        let enable = self.state.read().await.is_temp_correction_enabled != Some(true);
        let body = codec::encode_correction(enable);
        match self.exchange(body, true).await {
            Ok(ok) => {
                self.state.write().await.is_temp_correction_enabled = Some(enable);
                let message = if enable {
                    "Temperature correction on."
                } else {
                    "Temperature correction off."
                };
                self.succeeded(label, body, &ok.rx, message.into())
            }
            Err(failure) => self.failed(label, body, failure),
        }
    }

    async fn run_set_temp_params(&self, label: &str, params: TempParams) -> CommandOutcome {
        let body = format!("HST{}", correction::encode_hst_payload(&params));
        match self.exchange(&body, true).await {
            Ok(ok) => {
                self.state.write().await.temp_params = params;
                self.succeeded(
                    label,
                    &body,
                    &ok.rx,
                    format!(
                        "Temperature reference updated (v0 {:.3} V at {:.2} C).",
                        params.v0, params.t0
                    ),
                )
            }
            Err(failure) => self.failed(label, &body, failure),
        }
    }

    async fn run_reset(&self, label: &str) -> CommandOutcome {
        let first = match self.exchange(codec::RESET, true).await {
            Ok(ok) => ok,
            Err(failure) => return self.failed(label, codec::RESET, failure),
        };
        tokio::time::sleep(self.settings.reset_settle).await;
        let second = match self.exchange(codec::HV_OFF, true).await {
            Ok(ok) => ok,
            Err(failure) => return self.failed(label, codec::HV_OFF, failure),
        };
        let third = match self.exchange(codec::encode_correction(false), true).await {
            Ok(ok) => ok,
            Err(failure) => {
                return self.failed(label, codec::encode_correction(false), failure)
            }
        };

        {
            let mut state = self.state.write().await;
            state.is_hv_on = Some(false);
            state.is_temp_correction_enabled = Some(false);
        }
        let rx = format!("{} | {} | {}", first.rx, second.rx, third.rx);
        let mut outcome = self.succeeded(
            label,
            "HRE+HOF+HCM0",
            &rx,
            "Module reset; HV and temperature correction off.".into(),
        );
        outcome.rx = rx;
        outcome
    }

    async fn run_raw(&self, label: &str, body: &str) -> CommandOutcome {
        match self.exchange(body, false).await {
            Ok(ok) => self.succeeded(label, body, &ok.rx, format!("Reply: {}", ok.rx)),
            Err(failure) => self.failed(label, body, failure),
        }
    }

    async fn run_read_status(&self, label: &str) -> CommandOutcome {
        match self.read_monitor().await {
            Ok((reading, flags)) => self.succeeded(
                label,
                codec::READ_MONITOR,
                "",
                format!(
                    "{:.3} V, {:.3} mA, {:.2} C, HV {}.",
                    reading.voltage,
                    reading.current,
                    reading.temperature,
                    if flags.is_hv_on { "on" } else { "off" }
                ),
            ),
            Err(failure) => self.failed(label, codec::READ_MONITOR, failure),
        }
    }

    /// Writes the profile one voltage at a time, sleeping between steps
    /// and giving way to cancellation at every suspension point.
    async fn run_stepped_writes(
        &self,
        label: &str,
        my_gen: u64,
        profile: &[f64],
        delay: Duration,
    ) -> RampResult {
        let total = profile.len();
        let mut completed = 0u32;
        for (index, &step) in profile.iter().enumerate() {
            if self.is_superseded(my_gen) {
                return RampResult {
                    completed,
                    end: RampEnd::Cancelled,
                };
            }
            let body = codec::encode_set_voltage(step);
            let step_label = format!("{} step {}/{}", label, index + 1, total);
            match self.exchange(&body, true).await {
                Ok(ok) => {
                    self.append_record(&step_label, &body, &ok.rx, true, None).await;
                    completed += 1;
                }
                Err(failure) => {
                    self.append_record(
                        &step_label,
                        &body,
                        &failure.rx,
                        false,
                        Some(failure.kind),
                    )
                    .await;
                    return RampResult {
                        completed,
                        end: RampEnd::Failed(failure),
                    };
                }
            }
            if index + 1 < total && self.cancelled_during(delay, my_gen).await {
                return RampResult {
                    completed,
                    end: RampEnd::Cancelled,
                };
            }
        }
        RampResult {
            completed,
            end: RampEnd::Done,
        }
    }

    /// One framed wire command with timeout retries. The channel lock is
    /// held for the whole (bounded) retry sequence so another task cannot
    /// slip a frame between attempts.
    async fn exchange(
        &self,
        body: &str,
        check_echo: bool,
    ) -> Result<ExchangeOk, ExchangeFailure> {
        let mut channel = self.channel.lock().await;
        let mut attempt = 1u32;
        loop {
            match channel.exchange(body).await {
                Ok(raw) => {
                    let rx = codec::printable(&raw);
                    return match codec::parse_reply(&raw) {
                        Ok(reply) => {
                            if check_echo && body.len() >= 3 && !reply.matches(&body[..3]) {
                                let e = ProtocolError::UnexpectedEcho {
                                    sent: body[..3].to_string(),
                                    got: reply.echo.clone(),
                                };
                                return Err(ExchangeFailure {
                                    kind: ErrorKind::Protocol,
                                    rx,
                                    message: e.to_string(),
                                });
                            }
                            Ok(ExchangeOk { reply, rx })
                        }
                        Err(ProtocolError::Fault(fault)) => Err(ExchangeFailure {
                            kind: ErrorKind::DeviceFault,
                            rx,
                            message: format!("Module reported {}.", fault),
                        }),
                        Err(e) => Err(ExchangeFailure {
                            kind: ErrorKind::Protocol,
                            rx,
                            message: e.to_string(),
                        }),
                    };
                }
                Err(ChannelError::Timeout) if attempt < self.settings.retry_budget => {
                    log::debug!(
                        "[port {}] '{}' timed out (attempt {}/{}), retrying",
                        self.port_id,
                        body,
                        attempt,
                        self.settings.retry_budget
                    );
                    attempt += 1;
                    tokio::time::sleep(self.settings.retry_backoff).await;
                }
                Err(ChannelError::Timeout) => {
                    return Err(ExchangeFailure {
                        kind: ErrorKind::Timeout,
                        rx: String::new(),
                        message: format!(
                            "No reply after {} attempts.",
                            self.settings.retry_budget
                        ),
                    });
                }
                Err(e) => {
                    return Err(ExchangeFailure {
                        kind: ErrorKind::Unavailable,
                        rx: String::new(),
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    fn is_superseded(&self, my_gen: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != my_gen || *self.shutdown.borrow()
    }

    /// Sleeps `delay`, waking early on shutdown. True means cancelled.
    async fn cancelled_during(&self, delay: Duration, my_gen: u64) -> bool {
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = wait_for_shutdown(&mut shutdown) => return true,
        }
        self.is_superseded(my_gen)
    }

    fn succeeded(
        &self,
        label: &str,
        tx: &str,
        rx: &str,
        message: String,
    ) -> CommandOutcome {
        CommandOutcome {
            port_id: self.port_id,
            command: label.to_string(),
            tx: tx.to_string(),
            rx: rx.to_string(),
            success: true,
            error_kind: None,
            message,
            completed_steps: None,
        }
    }

    fn failed(&self, label: &str, tx: &str, failure: ExchangeFailure) -> CommandOutcome {
        CommandOutcome {
            port_id: self.port_id,
            command: label.to_string(),
            tx: tx.to_string(),
            rx: failure.rx,
            success: false,
            error_kind: Some(failure.kind),
            message: failure.message,
            completed_steps: None,
        }
    }

    fn rejected(&self, label: &str, kind: ErrorKind, reason: String) -> CommandOutcome {
        CommandOutcome {
            port_id: self.port_id,
            command: label.to_string(),
            tx: String::new(),
            rx: String::new(),
            success: false,
            error_kind: Some(kind),
            message: reason,
            completed_steps: None,
        }
    }

    async fn log_outcome(&self, outcome: &CommandOutcome) {
        self.append_record(
            &outcome.command,
            &outcome.tx,
            &outcome.rx,
            outcome.success,
            outcome.error_kind,
        )
        .await;
    }

    async fn append_record(
        &self,
        action: &str,
        tx: &str,
        rx: &str,
        success: bool,
        error_kind: Option<ErrorKind>,
    ) {
        self.action_log
            .append(ActionRecord {
                port_id: self.port_id,
                timestamp: Utc::now(),
                action: action.to_string(),
                tx: tx.to_string(),
                rx: rx.to_string(),
                success,
                error_kind,
            })
            .await;
    }
}

async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    // Err means the manager is gone; treat that as shutdown too.
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Stepped voltage profile from `start` to `target`: ease-out rising
/// (large steps first, settling near the target), ease-in falling (gentle
/// start). Always ends exactly on `target` and never leaves the safe
/// range.
pub fn ramp_profile(start: f64, target: f64, steps: u32, range: &VoltageRange) -> Vec<f64> {
    if (target - start).abs() < 1e-9 {
        return vec![range.clamp(target)];
    }
    let n = steps.max(1) as usize;
    let span = target - start;
    let mut profile = Vec::with_capacity(n);
    for i in 1..=n {
        let progress = i as f64 / n as f64;
        let eased = if span > 0.0 {
            1.0 - (1.0 - progress) * (1.0 - progress)
        } else {
            progress * progress
        };
        profile.push(range.clamp(start + span * eased));
    }
    if let Some(last) = profile.last_mut() {
        *last = range.clamp(target);
    }
    profile
}

fn command_label(request: &CommandRequest) -> String {
    match request.command_type {
        CommandType::SetVoltage => {
            format!("SET_VOLTAGE: {:.3}V", request.value.unwrap_or_default())
        }
        CommandType::RampVoltage => {
            format!("RAMP_VOLTAGE to {:.3}V", request.value.unwrap_or_default())
        }
        CommandType::SetCurrent => {
            format!("SET_CURRENT: {:.3}mA", request.value.unwrap_or_default())
        }
        CommandType::EnableOcp => {
            format!("ENABLE_OCP: {:.3}mA", request.value.unwrap_or_default())
        }
        CommandType::Raw => format!(
            "RAW: {}",
            request.raw.as_deref().unwrap_or_default().trim()
        ),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range() -> VoltageRange {
        VoltageRange {
            min: 0.0,
            max: 90.0,
        }
    }

    #[test]
    fn rising_profile_has_exact_step_count_and_target() {
        let profile = ramp_profile(0.0, 80.0, 10, &range());
        assert_eq!(profile.len(), 10);
        assert_eq!(*profile.last().unwrap(), 80.0);
        assert!(profile.windows(2).all(|w| w[1] > w[0]));
        // Ease-out: the first step covers more ground than the last.
        assert!(profile[0] - 0.0 > 80.0 - profile[8]);
    }

    #[test]
    fn falling_profile_eases_in() {
        let profile = ramp_profile(80.0, 20.0, 10, &range());
        assert_eq!(profile.len(), 10);
        assert_eq!(*profile.last().unwrap(), 20.0);
        assert!(profile.windows(2).all(|w| w[1] < w[0]));
        // Ease-in: the first step is the gentlest.
        assert!(80.0 - profile[0] < profile[8] - 20.0);
    }

    #[test]
    fn flat_profile_is_a_single_write() {
        assert_eq!(ramp_profile(50.0, 50.0, 10, &range()), vec![50.0]);
    }

    #[test]
    fn profile_never_leaves_safe_range() {
        let narrow = VoltageRange {
            min: 10.0,
            max: 60.0,
        };
        for &value in ramp_profile(70.0, 20.0, 8, &narrow).iter() {
            assert!(narrow.contains(value));
        }
    }
}
