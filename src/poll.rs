//! Background status polling, one task per port.
//!
//! Each tick performs one monitor exchange through the same channel mutex
//! the dispatcher uses, so polls and user commands never interleave on the
//! wire. Ticks that land while an exchange is still running are skipped,
//! never queued.

use crate::dispatch::Dispatcher;
use crate::manager::models::{ModuleState, TelemetryRecord};
use crate::sink::TelemetrySink;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub struct PollerHandle {
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl PollerHandle {
    /// Signals the loop and waits for it to wind down, bounded.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(()).await;
        let _ = tokio::time::timeout(Duration::from_secs(2), self.handle).await;
    }
}

pub fn spawn(
    dispatcher: Arc<Dispatcher>,
    state: Arc<RwLock<ModuleState>>,
    sinks: Arc<Vec<Arc<dyn TelemetrySink>>>,
    interval: Duration,
    degraded_threshold: u32,
) -> PollerHandle {
    let (stop_tx, stop_rx) = mpsc::channel(1);
    let handle = tokio::spawn(poll_loop(
        dispatcher,
        state,
        sinks,
        interval,
        degraded_threshold.max(1),
        stop_rx,
    ));
    PollerHandle { stop_tx, handle }
}

async fn poll_loop(
    dispatcher: Arc<Dispatcher>,
    state: Arc<RwLock<ModuleState>>,
    sinks: Arc<Vec<Arc<dyn TelemetrySink>>>,
    interval: Duration,
    degraded_threshold: u32,
    mut stop_rx: mpsc::Receiver<()>,
) {
    let port_id = state.read().await.port_id;
    log::info!("Polling started for port {} every {:?}", port_id, interval);

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut consecutive_failures = 0u32;

    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = ticker.tick() => {
                match dispatcher.read_monitor().await {
                    Ok((reading, flags)) => {
                        if consecutive_failures >= degraded_threshold {
                            log::info!("Port {} recovered after {} failed polls", port_id, consecutive_failures);
                        }
                        consecutive_failures = 0;
                        let record = TelemetryRecord {
                            port_id,
                            timestamp: Utc::now(),
                            voltage: reading.voltage,
                            current: reading.current,
                            temperature: reading.temperature,
                            flags,
                        };
                        for sink in sinks.iter() {
                            sink.record(record.clone()).await;
                        }
                    }
                    Err(failure) => {
                        consecutive_failures += 1;
                        if consecutive_failures >= degraded_threshold {
                            // Re-assert on every failure past the threshold:
                            // a user command's successful read may have
                            // cleared the flag in between.
                            state.write().await.degraded = true;
                            if consecutive_failures == degraded_threshold {
                                log::warn!(
                                    "Port {} degraded after {} consecutive poll failures ({})",
                                    port_id,
                                    consecutive_failures,
                                    failure.message
                                );
                            }
                        } else {
                            log::debug!(
                                "Poll failed for port {} ({}/{}): {}",
                                port_id,
                                consecutive_failures,
                                degraded_threshold,
                                failure.message
                            );
                        }
                    }
                }
            }
        }
    }
    log::info!("Polling stopped for port {}", port_id);
}
