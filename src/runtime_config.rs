// =============================================================================
// Runtime Configuration — Hot-reloadable engine settings with atomic save
// =============================================================================
//
// Central configuration hub for the Presence Nexus engine.  Every tunable
// parameter lives here so that monitored locations, scan cadence, and alert
// thresholds can be reconfigured without a rebuild.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.  All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_scan_duration_ms() -> u64 {
    5_000
}

fn default_scan_interval_ms() -> u64 {
    10_000
}

fn default_rssi_threshold_dbm() -> i32 {
    -90
}

fn default_max_devices_per_scan() -> u32 {
    50
}

fn default_max_capacity() -> u32 {
    100
}

fn default_warning_threshold_pct() -> f64 {
    80.0
}

fn default_critical_threshold_pct() -> f64 {
    95.0
}

fn default_entry_rssi_threshold() -> i32 {
    -70
}

fn default_exit_rssi_threshold() -> i32 {
    -85
}

fn default_min_confidence() -> f64 {
    0.6
}

fn default_duplicate_window_secs() -> u64 {
    30
}

fn default_scan_error_budget() -> u32 {
    10
}

fn default_locations() -> Vec<LocationConfig> {
    vec![
        LocationConfig::named("library"),
        LocationConfig::named("cafeteria"),
        LocationConfig::named("gym"),
    ]
}

// =============================================================================
// Per-location settings
// =============================================================================

/// Scan cadence and volume for one location. Mutable at runtime by admin
/// action or by adaptive throttling under load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// How long each discovery pass is allowed to listen.
    #[serde(default = "default_scan_duration_ms")]
    pub scan_duration_ms: u64,

    /// Delay between the start of consecutive scan cycles.
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,

    /// Readings weaker than this are discarded at the seam.
    #[serde(default = "default_rssi_threshold_dbm")]
    pub rssi_threshold_dbm: i32,

    /// Cap on observations accepted per cycle; lowered under load pressure.
    #[serde(default = "default_max_devices_per_scan")]
    pub max_devices_per_scan: u32,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            scan_duration_ms: default_scan_duration_ms(),
            scan_interval_ms: default_scan_interval_ms(),
            rssi_threshold_dbm: default_rssi_threshold_dbm(),
            max_devices_per_scan: default_max_devices_per_scan(),
        }
    }
}

/// Static capacity thresholds for one location. Immutable at runtime; a
/// change requires a config edit and restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationCapacity {
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u32,

    /// Occupancy rate (percent) at which the WARNING tier starts.
    #[serde(default = "default_warning_threshold_pct")]
    pub warning_threshold_pct: f64,

    /// Occupancy rate (percent) at which the CRITICAL tier starts.
    #[serde(default = "default_critical_threshold_pct")]
    pub critical_threshold_pct: f64,
}

impl Default for LocationCapacity {
    fn default() -> Self {
        Self {
            max_capacity: default_max_capacity(),
            warning_threshold_pct: default_warning_threshold_pct(),
            critical_threshold_pct: default_critical_threshold_pct(),
        }
    }
}

/// One monitored location: a name plus its scan and capacity settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
    pub name: String,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub capacity: LocationCapacity,
}

impl LocationConfig {
    /// A location with default scan and capacity settings.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scan: ScanConfig::default(),
            capacity: LocationCapacity::default(),
        }
    }
}

// =============================================================================
// Classifier thresholds
// =============================================================================

/// RSSI gates and the confidence floor for the event classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierParams {
    /// A reading must be stronger than this (and approaching) to classify
    /// as Entry.
    #[serde(default = "default_entry_rssi_threshold")]
    pub entry_rssi_threshold: i32,

    /// A member's reading weaker than this (and departing) classifies as
    /// Exit.
    #[serde(default = "default_exit_rssi_threshold")]
    pub exit_rssi_threshold: i32,

    /// Events scoring below this are dropped before any state mutation.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Duplicate-suppression window for repeated Entry/Exit events.
    #[serde(default = "default_duplicate_window_secs")]
    pub duplicate_window_secs: u64,
}

impl Default for ClassifierParams {
    fn default() -> Self {
        Self {
            entry_rssi_threshold: default_entry_rssi_threshold(),
            exit_rssi_threshold: default_exit_rssi_threshold(),
            min_confidence: default_min_confidence(),
            duplicate_window_secs: default_duplicate_window_secs(),
        }
    }
}

// =============================================================================
// Scan provider selection
// =============================================================================

/// Which scan seam implementation to bind at startup. A simulated provider
/// is the default; real hardware plugs in behind the same trait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanMode {
    Simulated,
    Hardware,
}

impl Default for ScanMode {
    fn default() -> Self {
        Self::Simulated
    }
}

impl std::fmt::Display for ScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simulated => write!(f, "Simulated"),
            Self::Hardware => write!(f, "Hardware"),
        }
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration for the Presence Nexus engine.
///
/// Every field has a serde default so that older JSON files missing new
/// fields will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Which scan seam implementation to use.
    #[serde(default)]
    pub scan_mode: ScanMode,

    /// Locations the engine monitors, each with its own scan cadence and
    /// capacity thresholds.
    #[serde(default = "default_locations")]
    pub locations: Vec<LocationConfig>,

    /// Event classifier thresholds.
    #[serde(default)]
    pub classifier: ClassifierParams,

    /// Consecutive scan errors tolerated per location before scanning for
    /// that location is disabled.
    #[serde(default = "default_scan_error_budget")]
    pub scan_error_budget: u32,

    /// Whether the 24h maintenance sweep also force-expires presence
    /// membership for devices whose record history was fully pruned.
    /// Off by default: a device without an explicit Exit stays a member.
    #[serde(default)]
    pub expire_presence_on_prune: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            scan_mode: ScanMode::Simulated,
            locations: default_locations(),
            classifier: ClassifierParams::default(),
            scan_error_budget: default_scan_error_budget(),
            expire_presence_on_prune: false,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            locations = config.locations.len(),
            scan_mode = %config.scan_mode,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    ///
    /// This prevents corruption if the process crashes mid-write.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}
