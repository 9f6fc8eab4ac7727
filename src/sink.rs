//! Append-only sinks fed by the dispatchers and pollers.
//!
//! Records arrive concurrently from every port; each implementation must
//! keep individual appends atomic. The engine ships a log-backed action
//! sink, a broadcast fan-out for telemetry consumers, in-memory variants
//! for tests, and the bounded history buffer behind the history query.

use crate::manager::models::{ActionRecord, TelemetryRecord};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;

#[async_trait]
pub trait ActionLogSink: Send + Sync {
    async fn append(&self, record: ActionRecord);
}

#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn record(&self, record: TelemetryRecord);
}

/// Action sink that writes through the `log` facade.
pub struct LogActionSink;

#[async_trait]
impl ActionLogSink for LogActionSink {
    async fn append(&self, record: ActionRecord) {
        if record.success {
            log::info!(
                "[port {}] {} tx={} rx={}",
                record.port_id,
                record.action,
                record.tx,
                record.rx
            );
        } else {
            log::warn!(
                "[port {}] {} FAILED ({:?}) tx={} rx={}",
                record.port_id,
                record.action,
                record.error_kind,
                record.tx,
                record.rx
            );
        }
    }
}

/// In-memory action log for tests and short-lived tools.
#[derive(Default)]
pub struct MemoryActionLog {
    records: Mutex<Vec<ActionRecord>>,
}

impl MemoryActionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<ActionRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ActionLogSink for MemoryActionLog {
    async fn append(&self, record: ActionRecord) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
    }
}

/// Telemetry fan-out over a tokio broadcast channel. Slow or absent
/// receivers lose records rather than stalling the pollers.
pub struct BroadcastTelemetry {
    tx: broadcast::Sender<TelemetryRecord>,
}

impl BroadcastTelemetry {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryRecord> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl TelemetrySink for BroadcastTelemetry {
    async fn record(&self, record: TelemetryRecord) {
        let _ = self.tx.send(record);
    }
}

/// In-memory telemetry sink for tests.
#[derive(Default)]
pub struct MemoryTelemetry {
    records: Mutex<Vec<TelemetryRecord>>,
}

impl MemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<TelemetryRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl TelemetrySink for MemoryTelemetry {
    async fn record(&self, record: TelemetryRecord) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
    }
}

/// Bounded per-port record buffer behind the history query. Records are
/// appended in poll order, so a lookback query is always oldest-to-newest.
pub struct HistoryBuffer {
    capacity: usize,
    records: Mutex<VecDeque<TelemetryRecord>>,
}

impl HistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    /// Records from the last `window`, oldest first.
    pub fn since(&self, window: Duration) -> Vec<TelemetryRecord> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|record| record.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TelemetrySink for HistoryBuffer {
    async fn record(&self, record: TelemetryRecord) {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::status;

    fn record(port_id: u8) -> TelemetryRecord {
        TelemetryRecord {
            port_id,
            timestamp: Utc::now(),
            voltage: 72.0,
            current: 0.5,
            temperature: 24.0,
            flags: status::decode(0x0049),
        }
    }

    #[tokio::test]
    async fn history_is_bounded_and_ordered() {
        let history = HistoryBuffer::new(3);
        for _ in 0..5 {
            history.record(record(0)).await;
        }
        assert_eq!(history.len(), 3);
        let records = history.since(Duration::from_secs(60));
        assert_eq!(records.len(), 3);
        assert!(records.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn broadcast_drops_when_nobody_listens() {
        let telemetry = BroadcastTelemetry::new(8);
        // Must not error or block without receivers.
        telemetry.record(record(1)).await;
        let mut rx = telemetry.subscribe();
        telemetry.record(record(1)).await;
        assert_eq!(rx.recv().await.unwrap().port_id, 1);
    }
}
