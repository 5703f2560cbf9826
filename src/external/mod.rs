// =============================================================================
// External collaborator seams — device registry, time-series, cache, fan-out
// =============================================================================
//
// The core never talks to storage engines or transports directly; it goes
// through these traits. The in-memory implementations below back the
// simulated deployment and the test suite; production deployments bind the
// same traits to real services.
//
// Failure semantics (per the error taxonomy):
//   - Device registry misses silently drop the observation upstream.
//   - Time-series failures degrade to zero 24h counts, never fatal.
//   - Broadcast is fire-and-forget and must never block the pipeline.
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::error::EngineError;
use crate::types::{Device, ProcessedRecord};

// =============================================================================
// Traits
// =============================================================================

/// Read-only device lookup, consulted once per observation.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// `Ok(None)` means unknown MAC; the caller drops the observation.
    async fn device_by_mac(&self, mac: &str) -> Result<Option<Device>, EngineError>;
}

/// Append-only historical store for processed records and occupancy
/// snapshots, queried for 24-hour entry/exit tallies.
#[async_trait]
pub trait TimeSeriesSink: Send + Sync {
    async fn write_record(&self, record: &ProcessedRecord) -> Result<(), EngineError>;

    /// Persist a derived snapshot (occupancy, campus overview) for trend
    /// queries. Payload shape is owned by the caller.
    async fn write_snapshot(&self, key: &str, payload: Value) -> Result<(), EngineError>;

    async fn query_records(
        &self,
        location: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ProcessedRecord>, EngineError>;
}

/// Fast key-value cache with per-key TTL.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, EngineError>;
    async fn set(&self, key: &str, value: Value, ttl_seconds: u64) -> Result<(), EngineError>;
    async fn delete(&self, key: &str) -> Result<(), EngineError>;
}

/// Fire-and-forget fan-out to downstream consumers. Implementations must
/// return immediately; delivery is best-effort.
pub trait Broadcaster: Send + Sync {
    fn publish(&self, topic: &str, payload: Value);
}

// =============================================================================
// In-memory device registry
// =============================================================================

/// Device registry backed by a map keyed by MAC address.
pub struct InMemoryDeviceRegistry {
    devices: RwLock<HashMap<String, Device>>,
}

impl InMemoryDeviceRegistry {
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, device: Device) {
        self.devices
            .write()
            .insert(device.mac_address.clone(), device);
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }
}

impl Default for InMemoryDeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceRegistry for InMemoryDeviceRegistry {
    async fn device_by_mac(&self, mac: &str) -> Result<Option<Device>, EngineError> {
        Ok(self.devices.read().get(mac).cloned())
    }
}

// =============================================================================
// In-memory time-series sink
// =============================================================================

/// Time-series store holding processed records in arrival order plus the
/// latest snapshot per key.
pub struct InMemoryTimeSeries {
    records: RwLock<Vec<ProcessedRecord>>,
    snapshots: RwLock<HashMap<String, Value>>,
}

impl InMemoryTimeSeries {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            snapshots: RwLock::new(HashMap::new()),
        }
    }

    pub fn record_count(&self) -> usize {
        self.records.read().len()
    }
}

impl Default for InMemoryTimeSeries {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TimeSeriesSink for InMemoryTimeSeries {
    async fn write_record(&self, record: &ProcessedRecord) -> Result<(), EngineError> {
        self.records.write().push(record.clone());
        Ok(())
    }

    async fn write_snapshot(&self, key: &str, payload: Value) -> Result<(), EngineError> {
        self.snapshots.write().insert(key.to_string(), payload);
        Ok(())
    }

    async fn query_records(
        &self,
        location: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ProcessedRecord>, EngineError> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|r| r.location == location && r.timestamp >= from && r.timestamp <= to)
            .cloned()
            .collect())
    }
}

// =============================================================================
// In-memory cache store
// =============================================================================

struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// TTL-aware key-value cache. Expired entries are dropped lazily on read.
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, EngineError> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if entry.expires_at > now => return Ok(Some(entry.value.clone())),
                Some(_) => {} // expired — fall through to removal
                None => return Ok(None),
            }
        }
        self.entries.write().remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Value, ttl_seconds: u64) -> Result<(), EngineError> {
        self.entries.write().insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + Duration::from_secs(ttl_seconds),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), EngineError> {
        self.entries.write().remove(key);
        Ok(())
    }
}

// =============================================================================
// Broadcast hub
// =============================================================================

/// One published message on the fan-out bus.
#[derive(Debug, Clone)]
pub struct BroadcastMessage {
    pub topic: String,
    pub payload: Value,
}

/// In-process broadcaster on a `tokio::sync::broadcast` channel. Sending
/// with no subscribers is not an error; lagging subscribers lose old
/// messages rather than blocking the pipeline.
pub struct BroadcastHub {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastMessage> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Broadcaster for BroadcastHub {
    fn publish(&self, topic: &str, payload: Value) {
        let message = BroadcastMessage {
            topic: topic.to_string(),
            payload,
        };
        match self.sender.send(message) {
            Ok(delivered) => trace!(topic, delivered, "broadcast published"),
            // No subscribers connected; best-effort delivery, drop silently.
            Err(_) => debug!(topic, "broadcast dropped (no subscribers)"),
        }
    }
}
