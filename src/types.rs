// =============================================================================
// Shared types used across the Presence Nexus engine
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One reported signal reading from a device at a location and time.
///
/// Observations are ephemeral: they are produced by the scan seam, flow
/// through the pipeline once, and are never persisted by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    /// MAC address as reported by the radio (uppercase hex, colon-separated).
    pub device_mac: String,
    /// Received signal strength in dBm. Negative for real readings;
    /// 0 is the "invalid reading" sentinel.
    pub rssi: i32,
    pub location: String,
    pub timestamp: DateTime<Utc>,
}

/// What kind of hardware produced the signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    /// Dedicated proximity beacon — transmits on a fixed cadence, earns a
    /// confidence bonus over general-purpose radios.
    Beacon,
    Phone,
    Wearable,
    Other,
}

impl Default for DeviceType {
    fn default() -> Self {
        Self::Other
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Beacon => write!(f, "Beacon"),
            Self::Phone => write!(f, "Phone"),
            Self::Wearable => write!(f, "Wearable"),
            Self::Other => write!(f, "Other"),
        }
    }
}

/// Registered device record, owned by the external device registry.
///
/// The core treats this as an immutable lookup result per observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    pub user_id: String,
    pub mac_address: String,
    #[serde(default)]
    pub device_type: DeviceType,
    pub is_active: bool,
    /// Last reported battery level (0-100), if the device reports one.
    #[serde(default)]
    pub battery_level: Option<u8>,
}

/// Classification produced for a single observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Entry,
    Exit,
    /// Reaffirmation that a member is still inside. No membership change.
    Presence,
    /// Observation that changes nothing; emitted for liveness tracking.
    Heartbeat,
}

impl EventType {
    /// Only Entry and Exit mutate presence membership and pass through the
    /// duplicate filter.
    pub fn is_transition(&self) -> bool {
        matches!(self, Self::Entry | Self::Exit)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Entry => write!(f, "Entry"),
            Self::Exit => write!(f, "Exit"),
            Self::Presence => write!(f, "Presence"),
            Self::Heartbeat => write!(f, "Heartbeat"),
        }
    }
}

/// A fully classified, accepted observation. Appended to the bounded
/// per-device history and written to the time-series sink.
///
/// Invariant: only ever constructed with confidence >= 0.6 and after the
/// duplicate filter has accepted the event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub device_id: String,
    pub mac_address: String,
    pub user_id: String,
    pub location: String,
    pub timestamp: DateTime<Utc>,
    pub rssi: i32,
    pub event_type: EventType,
    /// Heuristic reliability score in [0, 1].
    pub confidence: f64,
    #[serde(default)]
    pub battery_level: Option<u8>,
}

/// Occupancy alert tier for a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlertLevel {
    Normal,
    Warning,
    Critical,
}

impl Default for AlertLevel {
    fn default() -> Self {
        Self::Normal
    }
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "NORMAL"),
            Self::Warning => write!(f, "WARNING"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Transient crowd-density alert, surfaced on demand and published when an
/// occupancy recompute yields a non-NORMAL tier. Never queued or persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrowdAlert {
    /// UUID v4.
    pub id: String,
    pub location: String,
    pub alert_level: AlertLevel,
    pub message: String,
    pub occupancy_count: usize,
    pub max_capacity: u32,
    pub timestamp: DateTime<Utc>,
    pub is_active: bool,
}

/// One sample from the hardware load probe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HardwareLoad {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub adapter_up: bool,
}

impl HardwareLoad {
    /// A sample is critical when either resource is saturated or the radio
    /// adapter has dropped out; critical samples trigger scan throttling.
    pub fn is_critical(&self) -> bool {
        self.cpu_percent >= 90.0 || self.memory_percent >= 90.0 || !self.adapter_up
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_transitions() {
        assert!(EventType::Entry.is_transition());
        assert!(EventType::Exit.is_transition());
        assert!(!EventType::Presence.is_transition());
        assert!(!EventType::Heartbeat.is_transition());
    }

    #[test]
    fn alert_level_ordering() {
        assert!(AlertLevel::Normal < AlertLevel::Warning);
        assert!(AlertLevel::Warning < AlertLevel::Critical);
    }

    #[test]
    fn hardware_load_critical_boundaries() {
        let ok = HardwareLoad { cpu_percent: 50.0, memory_percent: 50.0, adapter_up: true };
        assert!(!ok.is_critical());

        let cpu = HardwareLoad { cpu_percent: 90.0, ..ok };
        assert!(cpu.is_critical());

        let mem = HardwareLoad { memory_percent: 95.0, ..ok };
        assert!(mem.is_critical());

        let adapter = HardwareLoad { adapter_up: false, ..ok };
        assert!(adapter.is_critical());
    }

    #[test]
    fn device_deserialises_without_optional_fields() {
        let json = r#"{
            "device_id": "dev-1",
            "user_id": "user-1",
            "mac_address": "AA:BB:CC:DD:EE:FF",
            "is_active": true
        }"#;
        let dev: Device = serde_json::from_str(json).unwrap();
        assert_eq!(dev.device_type, DeviceType::Other);
        assert!(dev.battery_level.is_none());
    }
}
