// =============================================================================
// Presence Nexus — Main Entry Point
// =============================================================================
//
// Boots the occupancy engine: loads the runtime config, wires the pipeline
// stages behind a single shared state, then spawns the scan loops and the
// background tasks (dispatcher, maintenance, load monitor, alert sweep).
// The engine starts with the simulated scan seam unless configured for
// hardware; there is no hardware driver bound in this build.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod app_state;
mod classify;
mod dispatch;
mod error;
mod external;
mod load;
mod maintenance;
mod occupancy;
mod presence;
mod processor;
mod retry;
mod runtime_config;
mod scanner;
mod signal;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::EngineState;
use crate::dispatch::PipelineEvent;
use crate::external::{BroadcastHub, InMemoryCache, InMemoryDeviceRegistry, InMemoryTimeSeries};
use crate::load::SimulatedLoadProbe;
use crate::runtime_config::{LocationConfig, RuntimeConfig, ScanMode};
use crate::scanner::{ScanOrchestrator, SimulatedScanner};
use crate::types::{Device, DeviceType};

/// Config file path, colocated with the binary's working directory.
const CONFIG_PATH: &str = "presence_config.json";

/// How often the alert sweep recomputes every location.
const ALERT_SWEEP_SECS: u64 = 60;
/// How often the load monitor samples the host.
const LOAD_SAMPLE_SECS: u64 = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Presence Nexus — Starting Up                     ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });

    // Override monitored locations from env if available.
    if let Ok(names) = std::env::var("PRESENCE_LOCATIONS") {
        let names: Vec<&str> = names
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();
        if !names.is_empty() {
            config.locations = names.into_iter().map(LocationConfig::named).collect();
        }
    }

    let location_names: Vec<String> =
        config.locations.iter().map(|l| l.name.clone()).collect();
    info!(locations = ?location_names, scan_mode = %config.scan_mode, "Configured locations");

    if config.scan_mode == ScanMode::Hardware {
        anyhow::bail!("hardware scan mode is configured but no radio driver is bound in this build");
    }

    // ── 2. External collaborators ────────────────────────────────────────
    // In-process implementations; production deployments substitute the
    // real registry, store, and sink behind the same traits.
    let registry = Arc::new(InMemoryDeviceRegistry::new());
    let sink = Arc::new(InMemoryTimeSeries::new());
    let cache = Arc::new(InMemoryCache::new());
    let hub = Arc::new(BroadcastHub::new(256));

    let fleet = seed_device_fleet(&registry);
    info!(devices = fleet.len(), "Device fleet registered");

    // ── 3. Build shared state ────────────────────────────────────────────
    let (state, event_rx) = EngineState::new(config, registry, sink, cache, hub.clone());

    // ── 4. Dispatcher ────────────────────────────────────────────────────
    tokio::spawn(dispatch::run_dispatcher(state.clone(), event_rx));

    // Debug tap on the broadcast hub so a bare run shows traffic.
    let mut tap = hub.subscribe();
    tokio::spawn(async move {
        while let Ok(msg) = tap.recv().await {
            debug!(topic = %msg.topic, "broadcast");
        }
    });

    // ── 5. Scan orchestrator ─────────────────────────────────────────────
    let provider = Arc::new(SimulatedScanner::new(fleet));
    let orchestrator = ScanOrchestrator::new(state.clone(), provider);
    orchestrator.start_all();

    // ── 6. Background tasks ──────────────────────────────────────────────
    tokio::spawn(maintenance::run_maintenance(state.clone()));

    tokio::spawn(load::run_load_monitor(
        orchestrator.clone(),
        Arc::new(SimulatedLoadProbe::new()),
        Duration::from_secs(LOAD_SAMPLE_SECS),
    ));

    // Alert sweep: recompute every location and surface crowd alerts.
    let sweep_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(ALERT_SWEEP_SECS));
        interval.tick().await;
        loop {
            interval.tick().await;
            match sweep_state.occupancy.crowd_alerts().await {
                Ok(alerts) => {
                    for alert in alerts {
                        let _ = sweep_state.event_tx.send(PipelineEvent::Alert(alert));
                    }
                }
                Err(e) => warn!(error = %e, "alert sweep failed"),
            }
            match sweep_state.occupancy.campus_overview().await {
                Ok(overview) => info!(
                    occupancy = overview.total_occupancy,
                    capacity = overview.total_capacity,
                    rate = format!("{:.1}", overview.occupancy_rate),
                    on_alert = overview.locations_on_alert,
                    "campus overview"
                ),
                Err(e) => warn!(error = %e, "campus overview failed"),
            }
        }
    });

    // Periodic status snapshot for the logs.
    let status_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        interval.tick().await;
        loop {
            interval.tick().await;
            let snapshot = status_state.build_snapshot();
            info!(
                state_version = %snapshot["state_version"],
                tracked_devices = %snapshot["tracked_devices"],
                "status snapshot"
            );
        }
    });

    info!("Presence Nexus running — Ctrl+C to stop");

    // ── 7. Shutdown ──────────────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    orchestrator.stop_all();
    let snapshot = state.build_snapshot();
    info!(state_version = %snapshot["state_version"], "final state snapshot taken");
    state.runtime_config.read().save(CONFIG_PATH)?;

    Ok(())
}

/// Register a simulated device fleet and return its MAC pool (shared with
/// the simulated scanner so lookups actually resolve).
fn seed_device_fleet(registry: &InMemoryDeviceRegistry) -> Vec<String> {
    let mut macs = Vec::new();
    for i in 0..12u8 {
        let mac = format!("AA:BB:CC:DD:EE:{i:02X}");
        let device_type = match i % 4 {
            0 => DeviceType::Beacon,
            1 => DeviceType::Phone,
            2 => DeviceType::Wearable,
            _ => DeviceType::Other,
        };
        registry.register(Device {
            device_id: format!("dev-{i:02}"),
            user_id: format!("user-{i:02}"),
            mac_address: mac.clone(),
            device_type,
            is_active: true,
            battery_level: if device_type == DeviceType::Beacon {
                Some(60 + i * 3)
            } else {
                None
            },
        });
        macs.push(mac);
    }
    macs
}
