// =============================================================================
// Shared engine state
// =============================================================================
//
// Single `Arc<EngineState>` handed to every task: the scan orchestrator,
// the dispatcher, the maintenance sweep, and the load monitor. Pipeline
// stages live here once and are shared; none of them is ever rebuilt at
// runtime. Mutable snapshot data (recent records, errors, alerts) sits in
// bounded ring buffers behind parking_lot locks, with a monotonically
// increasing state version so subscribers can detect staleness cheaply.
// =============================================================================

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::classify::{DuplicateFilter, EventClassifier};
use crate::dispatch::PipelineEvent;
use crate::external::{BroadcastHub, CacheStore, DeviceRegistry, TimeSeriesSink};
use crate::occupancy::OccupancyEngine;
use crate::presence::PresenceRegistry;
use crate::runtime_config::RuntimeConfig;
use crate::signal::SignalAnalyzer;
use crate::types::{CrowdAlert, ProcessedRecord};

/// Ring-buffer capacity for recently accepted records.
const RECORD_BUFFER_CAP: usize = 100;
/// Ring-buffer capacity for recent operational errors.
const ERROR_BUFFER_CAP: usize = 50;
/// Ring-buffer capacity for recent crowd alerts.
const ALERT_BUFFER_CAP: usize = 20;

/// One operational error surfaced to the status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEntry {
    pub timestamp: DateTime<Utc>,
    /// Component that raised it ("scanner", "pipeline", "maintenance").
    pub context: String,
    pub message: String,
}

pub struct EngineState {
    /// Bumped on every externally visible state change.
    state_version: AtomicU64,

    pub runtime_config: RwLock<RuntimeConfig>,

    // ── pipeline stages (immutable wiring, internal mutability) ──
    pub analyzer: SignalAnalyzer,
    pub dedupe: DuplicateFilter,
    pub classifier: EventClassifier,
    pub presence: Arc<PresenceRegistry>,
    pub occupancy: OccupancyEngine,

    // ── external collaborators ──
    pub devices: Arc<dyn DeviceRegistry>,
    pub sink: Arc<dyn TimeSeriesSink>,
    pub broadcast: Arc<BroadcastHub>,

    /// Producer side of the pipeline event channel; the dispatcher owns
    /// the receiver.
    pub event_tx: mpsc::UnboundedSender<PipelineEvent>,

    // ── bounded snapshot buffers ──
    recent_records: RwLock<VecDeque<ProcessedRecord>>,
    recent_errors: RwLock<VecDeque<ErrorEntry>>,
    recent_alerts: RwLock<VecDeque<CrowdAlert>>,

    pub start_time: DateTime<Utc>,
}

impl EngineState {
    /// Build the engine state and the receiver end of the pipeline event
    /// channel (to be handed to `dispatch::run_dispatcher`).
    pub fn new(
        config: RuntimeConfig,
        devices: Arc<dyn DeviceRegistry>,
        sink: Arc<dyn TimeSeriesSink>,
        store: Arc<dyn CacheStore>,
        broadcast: Arc<BroadcastHub>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let presence = Arc::new(PresenceRegistry::new());
        let occupancy = OccupancyEngine::new(
            &config.locations,
            presence.clone(),
            sink.clone(),
            store,
            broadcast.clone(),
        );
        let classifier = EventClassifier::new(config.classifier.clone());
        let dedupe = DuplicateFilter::new(config.classifier.duplicate_window_secs);

        let state = Arc::new(Self {
            state_version: AtomicU64::new(0),
            runtime_config: RwLock::new(config),
            analyzer: SignalAnalyzer::new(),
            dedupe,
            classifier,
            presence,
            occupancy,
            devices,
            sink,
            broadcast,
            event_tx,
            recent_records: RwLock::new(VecDeque::with_capacity(RECORD_BUFFER_CAP)),
            recent_errors: RwLock::new(VecDeque::with_capacity(ERROR_BUFFER_CAP)),
            recent_alerts: RwLock::new(VecDeque::with_capacity(ALERT_BUFFER_CAP)),
            start_time: Utc::now(),
        });

        (state, event_rx)
    }

    // -------------------------------------------------------------------------
    // State version
    // -------------------------------------------------------------------------

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // -------------------------------------------------------------------------
    // Ring buffers
    // -------------------------------------------------------------------------

    pub fn push_record(&self, record: ProcessedRecord) {
        let mut buf = self.recent_records.write();
        if buf.len() >= RECORD_BUFFER_CAP {
            buf.pop_front();
        }
        buf.push_back(record);
        drop(buf);
        self.increment_version();
    }

    pub fn push_error(&self, context: &str, message: impl Into<String>) {
        let mut buf = self.recent_errors.write();
        if buf.len() >= ERROR_BUFFER_CAP {
            buf.pop_front();
        }
        buf.push_back(ErrorEntry {
            timestamp: Utc::now(),
            context: context.to_string(),
            message: message.into(),
        });
        drop(buf);
        self.increment_version();
    }

    pub fn push_alert(&self, alert: CrowdAlert) {
        let mut buf = self.recent_alerts.write();
        if buf.len() >= ALERT_BUFFER_CAP {
            buf.pop_front();
        }
        buf.push_back(alert);
        drop(buf);
        self.increment_version();
    }

    /// Most recent records, newest first.
    pub fn recent_records(&self, count: usize) -> Vec<ProcessedRecord> {
        self.recent_records
            .read()
            .iter()
            .rev()
            .take(count)
            .cloned()
            .collect()
    }

    /// Most recent errors, newest first.
    pub fn recent_errors(&self, count: usize) -> Vec<ErrorEntry> {
        self.recent_errors
            .read()
            .iter()
            .rev()
            .take(count)
            .cloned()
            .collect()
    }

    /// Most recent crowd alerts, newest first.
    pub fn recent_alerts(&self, count: usize) -> Vec<CrowdAlert> {
        self.recent_alerts
            .read()
            .iter()
            .rev()
            .take(count)
            .cloned()
            .collect()
    }

    // -------------------------------------------------------------------------
    // Status snapshot
    // -------------------------------------------------------------------------

    /// Synchronous status snapshot for logs and debug consumers. Occupancy
    /// counts come straight from the presence registry, never from the
    /// occupancy cache, so this cannot block on external stores.
    pub fn build_snapshot(&self) -> Value {
        let config = self.runtime_config.read();
        let locations: Vec<Value> = config
            .locations
            .iter()
            .map(|l| {
                json!({
                    "name": l.name,
                    "occupancy": self.presence.occupancy(&l.name),
                    "max_capacity": l.capacity.max_capacity,
                })
            })
            .collect();

        json!({
            "state_version": self.current_state_version(),
            "server_time": Utc::now().to_rfc3339(),
            "uptime_secs": (Utc::now() - self.start_time).num_seconds(),
            "scan_mode": config.scan_mode.to_string(),
            "tracked_devices": self.analyzer.tracked_devices(),
            "broadcast_subscribers": self.broadcast.subscriber_count(),
            "locations": locations,
            "recent_records": self.recent_records(10),
            "recent_alerts": self.recent_alerts(5),
            "recent_errors": self.recent_errors(5),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::{InMemoryCache, InMemoryDeviceRegistry, InMemoryTimeSeries};
    use crate::types::EventType;

    fn state() -> Arc<EngineState> {
        let (state, _rx) = EngineState::new(
            RuntimeConfig::default(),
            Arc::new(InMemoryDeviceRegistry::new()),
            Arc::new(InMemoryTimeSeries::new()),
            Arc::new(InMemoryCache::new()),
            Arc::new(BroadcastHub::new(16)),
        );
        state
    }

    fn record(n: usize) -> ProcessedRecord {
        ProcessedRecord {
            device_id: format!("dev-{n}"),
            mac_address: "AA:BB:CC:DD:EE:FF".into(),
            user_id: "user".into(),
            location: "library".into(),
            timestamp: Utc::now(),
            rssi: -60,
            event_type: EventType::Presence,
            confidence: 0.8,
            battery_level: None,
        }
    }

    #[test]
    fn version_increments_on_every_push() {
        let state = state();
        assert_eq!(state.current_state_version(), 0);
        state.push_record(record(0));
        state.push_error("pipeline", "boom");
        assert_eq!(state.current_state_version(), 2);
    }

    #[test]
    fn record_buffer_is_bounded_and_newest_first() {
        let state = state();
        for n in 0..150 {
            state.push_record(record(n));
        }
        let recent = state.recent_records(200);
        assert_eq!(recent.len(), RECORD_BUFFER_CAP);
        assert_eq!(recent[0].device_id, "dev-149");
        // Oldest surviving entry is 150 - cap.
        assert_eq!(recent.last().unwrap().device_id, "dev-50");
    }

    #[test]
    fn snapshot_reports_configured_locations() {
        let state = state();
        let snap = state.build_snapshot();
        assert_eq!(snap["scan_mode"], "Simulated");
        assert_eq!(snap["locations"].as_array().unwrap().len(), 3);
        assert_eq!(snap["locations"][0]["name"], "library");
        assert_eq!(snap["locations"][0]["occupancy"], 0);
        assert_eq!(snap["broadcast_subscribers"], 0);
    }
}
