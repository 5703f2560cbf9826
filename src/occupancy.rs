// =============================================================================
// Crowd Occupancy & Alert Engine — capacity tiers, caching, campus rollup
// =============================================================================
//
// Computes per-location occupancy against configured capacity thresholds and
// derives alert tiers:
//
//   rate >= critical_threshold_pct  ->  CRITICAL
//   rate >= warning_threshold_pct   ->  WARNING
//   otherwise                       ->  NORMAL
//
// A composite snapshot per location is cached for up to 2 minutes; accepted
// entry/exit events invalidate the location's entry so occupancy tracks
// membership immediately. 24-hour entry/exit counts come from the
// time-series sink and degrade gracefully to zero on sink failure.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::external::{Broadcaster, CacheStore, TimeSeriesSink};
use crate::presence::PresenceRegistry;
use crate::runtime_config::{LocationCapacity, LocationConfig};
use crate::types::{AlertLevel, CrowdAlert, EventType};

/// How long a cached composite snapshot is valid for reads.
const CACHE_VALIDITY_SECS: i64 = 120;
/// TTL handed to the external cache store for sub-aggregates.
const STORE_TTL_SECS: u64 = 45;
/// Window for entry/exit tallies.
const TALLY_WINDOW_HOURS: i64 = 24;

/// Derived occupancy snapshot for one location.
#[derive(Debug, Clone, Serialize)]
pub struct LocationOccupancy {
    pub location: String,
    pub current_occupancy: usize,
    pub max_capacity: u32,
    /// Percent of capacity currently used.
    pub occupancy_rate: f64,
    pub alert_level: AlertLevel,
    pub last_24h_entry_count: usize,
    pub last_24h_exit_count: usize,
    pub computed_at: DateTime<Utc>,
}

/// Campus-wide rollup across every configured location.
#[derive(Debug, Clone, Serialize)]
pub struct CampusOverview {
    pub total_occupancy: usize,
    pub total_capacity: u32,
    pub occupancy_rate: f64,
    pub location_count: usize,
    /// Locations whose alert tier is not NORMAL.
    pub locations_on_alert: usize,
    pub computed_at: DateTime<Utc>,
}

/// Occupancy engine: owns the per-location cache and the capacity table.
/// Capacity thresholds are fixed at startup; changing them requires a
/// config edit and restart.
pub struct OccupancyEngine {
    /// Configured location names, in config order.
    locations: Vec<String>,
    capacities: HashMap<String, LocationCapacity>,
    registry: Arc<PresenceRegistry>,
    sink: Arc<dyn TimeSeriesSink>,
    store: Arc<dyn CacheStore>,
    broadcaster: Arc<dyn Broadcaster>,
    cache: RwLock<HashMap<String, LocationOccupancy>>,
    overview_cache: RwLock<Option<CampusOverview>>,
}

impl OccupancyEngine {
    pub fn new(
        locations: &[LocationConfig],
        registry: Arc<PresenceRegistry>,
        sink: Arc<dyn TimeSeriesSink>,
        store: Arc<dyn CacheStore>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        let capacities = locations
            .iter()
            .map(|l| (l.name.clone(), l.capacity.clone()))
            .collect();
        Self {
            locations: locations.iter().map(|l| l.name.clone()).collect(),
            capacities,
            registry,
            sink,
            store,
            broadcaster,
            cache: RwLock::new(HashMap::new()),
            overview_cache: RwLock::new(None),
        }
    }

    // -------------------------------------------------------------------------
    // Per-location occupancy
    // -------------------------------------------------------------------------

    /// Current occupancy for `location`, served from cache when the cached
    /// snapshot is younger than 2 minutes.
    pub async fn occupancy(&self, location: &str) -> Result<LocationOccupancy, EngineError> {
        if let Some(cached) = self.fresh_cached(location) {
            debug!(location, "occupancy served from cache");
            return Ok(cached);
        }
        self.recompute(location).await
    }

    /// Drop the cached snapshot for a location. Called after every accepted
    /// entry/exit so the next read reflects the membership change.
    pub async fn invalidate(&self, location: &str) {
        self.cache.write().remove(location);
        *self.overview_cache.write() = None;
        if let Err(e) = self.store.delete(&store_key(location)).await {
            warn!(location, error = %e, "cache store invalidation failed");
        }
    }

    fn fresh_cached(&self, location: &str) -> Option<LocationOccupancy> {
        let cache = self.cache.read();
        cache.get(location).and_then(|snap| {
            if Utc::now() - snap.computed_at < Duration::seconds(CACHE_VALIDITY_SECS) {
                Some(snap.clone())
            } else {
                None
            }
        })
    }

    /// Recompute occupancy from the presence registry and the time-series
    /// sink, bypassing the cache, then refresh cache/store and publish.
    async fn recompute(&self, location: &str) -> Result<LocationOccupancy, EngineError> {
        let capacity = self
            .capacities
            .get(location)
            .ok_or_else(|| EngineError::Validation(format!("unknown location '{location}'")))?;

        let current_occupancy = self.registry.occupancy(location);
        let occupancy_rate = if capacity.max_capacity > 0 {
            current_occupancy as f64 / capacity.max_capacity as f64 * 100.0
        } else {
            0.0
        };
        let alert_level = tier_for(occupancy_rate, capacity);

        let (entries, exits) = self.tally_24h(location).await;

        let snapshot = LocationOccupancy {
            location: location.to_string(),
            current_occupancy,
            max_capacity: capacity.max_capacity,
            occupancy_rate,
            alert_level,
            last_24h_entry_count: entries,
            last_24h_exit_count: exits,
            computed_at: Utc::now(),
        };

        self.cache
            .write()
            .insert(location.to_string(), snapshot.clone());

        // Best-effort persistence; occupancy reads never fail on store/sink
        // trouble.
        let payload = serde_json::to_value(&snapshot)
            .map_err(|e| EngineError::Internal(format!("snapshot serialisation: {e}")))?;
        if let Err(e) = self
            .store
            .set(&store_key(location), payload.clone(), STORE_TTL_SECS)
            .await
        {
            warn!(location, error = %e, "cache store write failed");
        }
        if let Err(e) = self.sink.write_snapshot(&store_key(location), payload.clone()).await {
            warn!(location, error = %e, "time-series snapshot write failed");
        }

        self.broadcaster.publish("occupancy", payload);

        debug!(
            location,
            occupancy = current_occupancy,
            rate = format!("{occupancy_rate:.1}"),
            level = %alert_level,
            "occupancy recomputed"
        );

        Ok(snapshot)
    }

    /// 24-hour entry/exit tallies; sink failure degrades to (0, 0).
    async fn tally_24h(&self, location: &str) -> (usize, usize) {
        let to = Utc::now();
        let from = to - Duration::hours(TALLY_WINDOW_HOURS);
        match self.sink.query_records(location, from, to).await {
            Ok(records) => {
                let entries = records
                    .iter()
                    .filter(|r| r.event_type == EventType::Entry)
                    .count();
                let exits = records
                    .iter()
                    .filter(|r| r.event_type == EventType::Exit)
                    .count();
                (entries, exits)
            }
            Err(e) => {
                warn!(location, error = %e, "24h tally query failed — degrading to zero counts");
                (0, 0)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Campus rollup
    // -------------------------------------------------------------------------

    /// Aggregate occupancy across all configured locations, cached for its
    /// own 2-minute window.
    pub async fn campus_overview(&self) -> Result<CampusOverview, EngineError> {
        if let Some(cached) = self.overview_cache.read().clone() {
            if Utc::now() - cached.computed_at < Duration::seconds(CACHE_VALIDITY_SECS) {
                return Ok(cached);
            }
        }

        let mut total_occupancy = 0;
        let mut total_capacity: u32 = 0;
        let mut locations_on_alert = 0;

        for location in &self.locations {
            let snap = self.occupancy(location).await?;
            total_occupancy += snap.current_occupancy;
            total_capacity += snap.max_capacity;
            if snap.alert_level != AlertLevel::Normal {
                locations_on_alert += 1;
            }
        }

        let overview = CampusOverview {
            total_occupancy,
            total_capacity,
            occupancy_rate: if total_capacity > 0 {
                total_occupancy as f64 / total_capacity as f64 * 100.0
            } else {
                0.0
            },
            location_count: self.locations.len(),
            locations_on_alert,
            computed_at: Utc::now(),
        };

        *self.overview_cache.write() = Some(overview.clone());
        Ok(overview)
    }

    // -------------------------------------------------------------------------
    // Alerts
    // -------------------------------------------------------------------------

    /// Recompute every configured location and return the non-NORMAL ones
    /// as crowd alerts. Alerts are transient: generated on demand, published
    /// once, never queued.
    pub async fn crowd_alerts(&self) -> Result<Vec<CrowdAlert>, EngineError> {
        let mut alerts = Vec::new();

        for location in &self.locations {
            let snap = self.recompute(location).await?;
            if snap.alert_level == AlertLevel::Normal {
                continue;
            }

            let alert = CrowdAlert {
                id: Uuid::new_v4().to_string(),
                location: location.clone(),
                alert_level: snap.alert_level,
                message: alert_message(&snap),
                occupancy_count: snap.current_occupancy,
                max_capacity: snap.max_capacity,
                timestamp: Utc::now(),
                is_active: true,
            };

            if let Ok(payload) = serde_json::to_value(&alert) {
                self.broadcaster.publish("alerts", payload);
            }
            alerts.push(alert);
        }

        Ok(alerts)
    }

    /// Configured location names, in config order.
    pub fn locations(&self) -> &[String] {
        &self.locations
    }
}

// =============================================================================
// Pure helpers
// =============================================================================

fn tier_for(rate: f64, capacity: &LocationCapacity) -> AlertLevel {
    if rate >= capacity.critical_threshold_pct {
        AlertLevel::Critical
    } else if rate >= capacity.warning_threshold_pct {
        AlertLevel::Warning
    } else {
        AlertLevel::Normal
    }
}

fn alert_message(snap: &LocationOccupancy) -> String {
    format!(
        "{} occupancy at {} is {:.1}% ({} of {} capacity)",
        snap.alert_level, snap.location, snap.occupancy_rate, snap.current_occupancy,
        snap.max_capacity
    )
}

fn store_key(location: &str) -> String {
    format!("occupancy:{location}")
}
