//! Port registry and the engine's public surface: command submission,
//! state snapshots, telemetry history, shutdown.

pub mod models;

pub use models::{ModuleState, SubmitResponse, TelemetryRecord};

use crate::channel::{PortChannel, SerialTransport, Transport};
use crate::config::{ConfigError, EngineConfig, EngineSettings, PortConfig};
use crate::dispatch::{Dispatcher, PortSettings};
use crate::poll::{self, PollerHandle};
use crate::protocol::CommandRequest;
use crate::sink::{ActionLogSink, HistoryBuffer, TelemetrySink};
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Unknown port id {0}")]
    UnknownPort(u8),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

struct Port {
    label: String,
    dispatcher: Arc<Dispatcher>,
    state: Arc<RwLock<ModuleState>>,
    history: Arc<HistoryBuffer>,
    channel: Arc<Mutex<PortChannel>>,
    telemetry: Arc<Vec<Arc<dyn TelemetrySink>>>,
    poller: std::sync::Mutex<Option<PollerHandle>>,
}

/// Owns every configured port. Ports are fully independent: each has its
/// own channel mutex, dispatcher and poller, and nothing is shared across
/// ports except the sinks.
pub struct PortManager {
    ports: BTreeMap<u8, Port>,
    settings: EngineSettings,
    shutdown_tx: watch::Sender<bool>,
}

impl PortManager {
    /// Builds the manager over real serial ports.
    pub fn new(
        config: &EngineConfig,
        action_log: Arc<dyn ActionLogSink>,
        telemetry: Vec<Arc<dyn TelemetrySink>>,
    ) -> Result<Self, EngineError> {
        Self::with_transport_factory(
            config,
            |port| Box::new(SerialTransport::new(&port.device, port.baud)) as Box<dyn Transport>,
            action_log,
            telemetry,
        )
    }

    /// Builds the manager with caller-supplied transports (tests use the
    /// scripted mock here).
    pub fn with_transport_factory(
        config: &EngineConfig,
        mut factory: impl FnMut(&PortConfig) -> Box<dyn Transport>,
        action_log: Arc<dyn ActionLogSink>,
        telemetry: Vec<Arc<dyn TelemetrySink>>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut ports = BTreeMap::new();

        for port_config in &config.ports {
            let label = port_config.display_label();
            let channel = Arc::new(Mutex::new(PortChannel::new(
                factory(port_config),
                config.settings.exchange_timeout(),
                Duration::from_millis(config.settings.reconnect_initial_ms),
                Duration::from_millis(config.settings.reconnect_max_ms),
            )));
            let state = Arc::new(RwLock::new(ModuleState::new(
                port_config.id,
                label.clone(),
                port_config.temp_params.unwrap_or_default(),
            )));
            let history = Arc::new(HistoryBuffer::new(config.settings.history_capacity));

            let mut sinks: Vec<Arc<dyn TelemetrySink>> = vec![history.clone()];
            sinks.extend(telemetry.iter().cloned());

            let dispatcher = Arc::new(Dispatcher::new(
                port_config.id,
                channel.clone(),
                state.clone(),
                PortSettings::from_config(&config.settings, port_config),
                action_log.clone(),
                shutdown_rx.clone(),
            ));

            log::info!(
                "Configured port {} ({}) on {}",
                port_config.id,
                label,
                port_config.device
            );
            ports.insert(
                port_config.id,
                Port {
                    label,
                    dispatcher,
                    state,
                    history,
                    channel,
                    telemetry: Arc::new(sinks),
                    poller: std::sync::Mutex::new(None),
                },
            );
        }

        Ok(Self {
            ports,
            settings: config.settings.clone(),
            shutdown_tx,
        })
    }

    /// Starts background polling for every port. Idempotent.
    pub fn start(&self) {
        for port in self.ports.values() {
            let mut slot = port.poller.lock().unwrap_or_else(|e| e.into_inner());
            if slot.is_some() {
                continue;
            }
            *slot = Some(poll::spawn(
                port.dispatcher.clone(),
                port.state.clone(),
                port.telemetry.clone(),
                self.settings.poll_interval(),
                self.settings.degraded_threshold,
            ));
        }
    }

    /// Executes one command against its port; the reply always carries an
    /// explicit success flag and a human-readable message.
    pub async fn submit(&self, request: CommandRequest) -> SubmitResponse {
        let port = match self.port(request.port_id) {
            Ok(port) => port,
            Err(e) => {
                return SubmitResponse {
                    success: false,
                    message: format!("{}. Valid ports are: {:?}.", e, self.port_ids()),
                }
            }
        };
        let outcome = port.dispatcher.execute(&request).await;
        SubmitResponse {
            success: outcome.success,
            message: outcome.message,
        }
    }

    pub async fn submit_raw(&self, port_id: u8, raw: &str) -> SubmitResponse {
        self.submit(CommandRequest::raw(port_id, raw)).await
    }

    /// Snapshot of a port's live state.
    pub async fn get_state(&self, port_id: u8) -> Option<ModuleState> {
        Some(self.ports.get(&port_id)?.state.read().await.clone())
    }

    pub fn all_labels(&self) -> BTreeMap<u8, String> {
        self.ports
            .iter()
            .map(|(id, port)| (*id, port.label.clone()))
            .collect()
    }

    /// Effective target voltage for a port: compensated from the last
    /// measured temperature when correction is enabled, raw `v0`
    /// otherwise. Reads under the state lock, so a concurrent
    /// `SET_TEMP_PARAMS` can never interleave with the computation.
    pub async fn effective_target(&self, port_id: u8) -> Result<f64, EngineError> {
        let port = self.port(port_id)?;
        let state = port.state.read().await;
        let range = port.dispatcher.safe_range();
        Ok(match (state.is_temp_correction_enabled, state.temperature) {
            (Some(true), Some(temperature)) => {
                crate::correction::compensated_voltage(&state.temp_params, temperature, &range)
            }
            _ => state.temp_params.v0,
        })
    }

    /// Telemetry records from the last `window`, oldest first.
    pub fn history(
        &self,
        port_id: u8,
        window: Duration,
    ) -> Result<Vec<TelemetryRecord>, EngineError> {
        Ok(self.port(port_id)?.history.since(window))
    }

    pub fn port_ids(&self) -> Vec<u8> {
        self.ports.keys().copied().collect()
    }

    /// Cancels in-flight ramps, stops all pollers and releases every
    /// channel. Returns once every port task has wound down.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let pollers: Vec<PollerHandle> = self
            .ports
            .values()
            .filter_map(|port| {
                port.poller
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .take()
            })
            .collect();
        join_all(pollers.into_iter().map(|handle| handle.stop())).await;
        for port in self.ports.values() {
            port.channel.lock().await.close();
        }
        log::info!("Engine shut down; all port channels released");
    }

    fn port(&self, port_id: u8) -> Result<&Port, EngineError> {
        self.ports
            .get(&port_id)
            .ok_or(EngineError::UnknownPort(port_id))
    }
}
