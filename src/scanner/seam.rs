// =============================================================================
// Scan seam — the sole abstraction over physical radio discovery
// =============================================================================
//
// The orchestrator never touches hardware; it calls `ScanProvider::scan`.
// The simulated provider below drives development and tests with a seeded
// device fleet whose signal strengths follow a bounded random walk, so
// approach/depart trends emerge naturally over consecutive scans. A real
// radio driver binds behind the same trait, selected by `scan_mode` in the
// runtime config — never hard-wired.
// =============================================================================

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use crate::error::EngineError;
use crate::runtime_config::ScanConfig;
use crate::types::Observation;

/// Produce zero or more observations for a location. The only seam between
/// the engine and the physical world.
#[async_trait]
pub trait ScanProvider: Send + Sync {
    async fn scan(
        &self,
        location: &str,
        config: &ScanConfig,
    ) -> Result<Vec<Observation>, EngineError>;
}

// =============================================================================
// Simulated provider
// =============================================================================

/// Strongest RSSI the walk can reach.
const RSSI_CEILING: i32 = -40;
/// Weakest RSSI before a simulated device wanders out of range entirely.
const RSSI_FLOOR: i32 = -100;
/// Chance per scan that a device flips between drifting closer and
/// drifting away.
const DRIFT_FLIP_PROB: f64 = 0.15;
/// Chance per scan that a device is picked up by the radio at all.
const DETECTION_PROB: f64 = 0.85;

struct DriftState {
    rssi: i32,
    /// +1 drifting closer (stronger signal), -1 drifting away.
    direction: i32,
}

/// Deterministic-when-seeded simulated radio: a fleet of known MACs whose
/// per-location signal follows a directional random walk.
pub struct SimulatedScanner {
    macs: Vec<String>,
    drifts: Mutex<HashMap<(String, String), DriftState>>,
    rng: Mutex<StdRng>,
}

impl SimulatedScanner {
    pub fn new(macs: Vec<String>) -> Self {
        Self::with_seed(macs, rand::random())
    }

    /// Seeded constructor for reproducible test runs.
    pub fn with_seed(macs: Vec<String>, seed: u64) -> Self {
        Self {
            macs,
            drifts: Mutex::new(HashMap::new()),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

#[async_trait]
impl ScanProvider for SimulatedScanner {
    async fn scan(
        &self,
        location: &str,
        config: &ScanConfig,
    ) -> Result<Vec<Observation>, EngineError> {
        let now = Utc::now();
        let mut rng = self.rng.lock();
        let mut drifts = self.drifts.lock();
        let mut observations = Vec::new();

        for mac in &self.macs {
            if observations.len() >= config.max_devices_per_scan as usize {
                break;
            }
            if rng.gen::<f64>() > DETECTION_PROB {
                continue;
            }

            let drift = drifts
                .entry((location.to_string(), mac.clone()))
                .or_insert_with(|| DriftState {
                    rssi: -60 - rng.gen_range(0..30),
                    direction: if rng.gen_bool(0.5) { 1 } else { -1 },
                });

            if rng.gen::<f64>() < DRIFT_FLIP_PROB {
                drift.direction = -drift.direction;
            }
            // Directional step with per-scan noise.
            let step = drift.direction * rng.gen_range(1..4) + rng.gen_range(-1..2);
            drift.rssi = (drift.rssi + step).clamp(RSSI_FLOOR, RSSI_CEILING);

            if drift.rssi < config.rssi_threshold_dbm {
                continue;
            }

            observations.push(Observation {
                device_mac: mac.clone(),
                rssi: drift.rssi,
                location: location.to_string(),
                timestamp: now,
            });
        }

        trace!(
            location,
            observed = observations.len(),
            fleet = self.macs.len(),
            "simulated scan complete"
        );
        Ok(observations)
    }
}
