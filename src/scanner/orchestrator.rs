// =============================================================================
// Scan orchestrator — per-location scan loops with budgets and throttling
// =============================================================================
//
// One independent async loop per configured location. Each cycle acquires a
// batch from the scan provider under the scan retry policy, then funnels
// every observation through the processor under the tighter per-item
// policy. Locations fail independently: a provider outage at one location
// never stalls another.
//
// Consecutive scan failures draw down the location's error budget; going
// over it disables that location's loop until an operator re-enables it.
// Adaptive throttling under host load stretches the interval (cap 30s) and
// shrinks the batch cap (floor 10).
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::app_state::EngineState;
use crate::dispatch::PipelineEvent;
use crate::error::EngineError;
use crate::processor::process_observation;
use crate::retry::{self, RetryPolicy};
use crate::runtime_config::ScanConfig;
use crate::scanner::ScanProvider;
use crate::types::Observation;

/// Hard ceiling the scan interval is throttled towards.
const THROTTLE_INTERVAL_CAP_MS: u64 = 30_000;
/// Throttling multiplies the interval by this each step.
const THROTTLE_INTERVAL_FACTOR: f64 = 1.5;
/// Throttling shrinks the batch cap by this factor each step.
const THROTTLE_DEVICE_FACTOR: f64 = 0.7;
/// Batch cap never throttles below this.
const THROTTLE_DEVICE_FLOOR: u32 = 10;

/// Running counters for one location's scan loop.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanStats {
    pub scan_count: u64,
    pub cumulative_duration_ms: u64,
    /// Consecutive failures; reset to zero by any successful cycle.
    pub error_count: u32,
    pub last_scan_at: Option<DateTime<Utc>>,
}

struct LocationScanState {
    name: String,
    active: AtomicBool,
    scan: RwLock<ScanConfig>,
    stats: RwLock<ScanStats>,
}

pub struct ScanOrchestrator {
    state: Arc<EngineState>,
    provider: Arc<dyn ScanProvider>,
    scan_policy: RetryPolicy,
    item_policy: RetryPolicy,
    locations: RwLock<HashMap<String, Arc<LocationScanState>>>,
}

impl ScanOrchestrator {
    /// Register every configured location, initially inactive.
    pub fn new(state: Arc<EngineState>, provider: Arc<dyn ScanProvider>) -> Arc<Self> {
        let locations = state
            .runtime_config
            .read()
            .locations
            .iter()
            .map(|l| {
                (
                    l.name.clone(),
                    Arc::new(LocationScanState {
                        name: l.name.clone(),
                        active: AtomicBool::new(false),
                        scan: RwLock::new(l.scan.clone()),
                        stats: RwLock::new(ScanStats::default()),
                    }),
                )
            })
            .collect();

        Arc::new(Self {
            state,
            provider,
            scan_policy: RetryPolicy::for_scans(),
            item_policy: RetryPolicy::for_pipeline_items(),
            locations: RwLock::new(locations),
        })
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Spawn a scan loop for every registered location.
    pub fn start_all(self: &Arc<Self>) {
        let names: Vec<String> = self.locations.read().keys().cloned().collect();
        for name in names {
            self.start_location(&name);
        }
    }

    /// Spawn (or restart) the scan loop for one location. No-op if it is
    /// already running or unknown.
    pub fn start_location(self: &Arc<Self>, name: &str) {
        let Some(loc) = self.locations.read().get(name).cloned() else {
            warn!(location = name, "start requested for unknown location");
            return;
        };
        if loc.active.swap(true, Ordering::SeqCst) {
            debug!(location = name, "scan loop already running");
            return;
        }

        info!(location = name, "scan loop starting");
        let this = self.clone();
        tokio::spawn(async move {
            while loc.active.load(Ordering::SeqCst) {
                this.run_cycle(&loc).await;
                let interval = loc.scan.read().scan_interval_ms;
                tokio::time::sleep(Duration::from_millis(interval)).await;
            }
            info!(location = %loc.name, "scan loop stopped");
        });
    }

    pub fn stop_location(&self, name: &str) {
        if let Some(loc) = self.locations.read().get(name) {
            loc.active.store(false, Ordering::SeqCst);
            info!(location = name, "scan loop stop requested");
        }
    }

    pub fn stop_all(&self) {
        for loc in self.locations.read().values() {
            loc.active.store(false, Ordering::SeqCst);
        }
        info!("all scan loops stop requested");
    }

    pub fn is_scanning(&self, name: &str) -> bool {
        self.locations
            .read()
            .get(name)
            .map(|l| l.active.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub fn stats(&self, name: &str) -> Option<ScanStats> {
        self.locations.read().get(name).map(|l| l.stats.read().clone())
    }

    /// Effective scan config for one location (reflects any throttling).
    pub fn scan_config(&self, name: &str) -> Option<ScanConfig> {
        self.locations.read().get(name).map(|l| l.scan.read().clone())
    }

    // -------------------------------------------------------------------------
    // One cycle
    // -------------------------------------------------------------------------

    async fn run_cycle(&self, loc: &Arc<LocationScanState>) {
        let started = std::time::Instant::now();
        let config = loc.scan.read().clone();

        let outcome = retry::execute(&self.scan_policy, || {
            self.provider.scan(&loc.name, &config)
        })
        .await;

        match outcome.into_result() {
            Ok(mut batch) => {
                // The provider should already honour the cap; enforce it
                // here so a misbehaving provider cannot flood the pipeline.
                batch.truncate(config.max_devices_per_scan as usize);
                loc.stats.write().error_count = 0;
                self.process_batch(loc, batch).await;
            }
            Err(err) => {
                self.record_scan_failure(loc, &err);
            }
        }

        let mut stats = loc.stats.write();
        stats.scan_count += 1;
        stats.cumulative_duration_ms += started.elapsed().as_millis() as u64;
        stats.last_scan_at = Some(Utc::now());
    }

    async fn process_batch(&self, loc: &Arc<LocationScanState>, batch: Vec<Observation>) {
        let mut accepted = 0usize;
        for obs in &batch {
            let outcome =
                retry::execute(&self.item_policy, || process_observation(&self.state, obs)).await;
            match outcome.into_result() {
                Ok(Some(_)) => accepted += 1,
                Ok(None) => {}
                Err(err) if matches!(err, EngineError::Validation(_) | EngineError::Domain(_)) => {
                    // Bad input, not an infrastructure problem. Does not
                    // draw down the budget.
                    debug!(
                        location = %loc.name,
                        mac = %obs.device_mac,
                        error = %err,
                        "observation rejected"
                    );
                }
                Err(err) => {
                    warn!(
                        location = %loc.name,
                        mac = %obs.device_mac,
                        class = err.class(),
                        error = %err,
                        "observation processing failed after retries"
                    );
                    self.state
                        .push_error("pipeline", format!("{}: {err}", loc.name));
                }
            }
        }
        debug!(
            location = %loc.name,
            batch = batch.len(),
            accepted,
            "scan cycle complete"
        );
    }

    fn record_scan_failure(&self, loc: &Arc<LocationScanState>, err: &EngineError) {
        let error_count = {
            let mut stats = loc.stats.write();
            stats.error_count += 1;
            stats.error_count
        };
        let budget = self.state.runtime_config.read().scan_error_budget;

        warn!(
            location = %loc.name,
            error_count,
            budget,
            class = err.class(),
            error = %err,
            "scan cycle failed"
        );

        if error_count > budget {
            loc.active.store(false, Ordering::SeqCst);
            error!(
                location = %loc.name,
                error_count,
                "error budget exhausted, scanning disabled"
            );
            let _ = self.state.event_tx.send(PipelineEvent::ScannerDisabled {
                location: loc.name.clone(),
                error_count,
            });
        }
    }

    // -------------------------------------------------------------------------
    // Adaptive throttling
    // -------------------------------------------------------------------------

    /// Stretch every location's interval and shrink its batch cap one step.
    /// Called by the load monitor when host load crosses into critical.
    pub fn throttle_all(&self) {
        for loc in self.locations.read().values() {
            let (interval, max_devices) = {
                let mut scan = loc.scan.write();
                scan.scan_interval_ms = throttled_interval(scan.scan_interval_ms);
                scan.max_devices_per_scan = throttled_device_cap(scan.max_devices_per_scan);
                (scan.scan_interval_ms, scan.max_devices_per_scan)
            };
            let _ = self.state.event_tx.send(PipelineEvent::ScannerThrottled {
                location: loc.name.clone(),
                scan_interval_ms: interval,
                max_devices,
            });
        }
    }
}

fn throttled_interval(interval_ms: u64) -> u64 {
    (((interval_ms as f64) * THROTTLE_INTERVAL_FACTOR) as u64).min(THROTTLE_INTERVAL_CAP_MS)
}

fn throttled_device_cap(max_devices: u32) -> u32 {
    (((max_devices as f64) * THROTTLE_DEVICE_FACTOR).floor() as u32).max(THROTTLE_DEVICE_FLOOR)
}
