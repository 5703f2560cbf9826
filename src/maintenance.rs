// =============================================================================
// Maintenance sweep — bounded-memory housekeeping
// =============================================================================
//
// A single background task that runs once a minute:
//
//   1. prune per-device record history older than 24 hours
//   2. forget analyzer RSSI history for devices left with no records
//   3. optionally force-expire presence membership for those devices
//      (off by default; a device without an explicit Exit stays a member)
//   4. evict stale duplicate-filter entries
//
// Everything here is idempotent; a missed or doubled sweep is harmless.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use crate::app_state::EngineState;

/// Sweep cadence.
const SWEEP_INTERVAL_SECS: u64 = 60;
/// Record history retained per device.
const HISTORY_RETENTION_HOURS: i64 = 24;

/// One sweep pass. Split out of the loop so tests can drive it directly.
pub async fn run_sweep_once(state: &Arc<EngineState>) {
    let now = Utc::now();
    let cutoff = now - chrono::Duration::hours(HISTORY_RETENTION_HOURS);

    let expire_on_prune = state.runtime_config.read().expire_presence_on_prune;

    let emptied = state.presence.prune_history(cutoff);
    for device_id in &emptied {
        state.analyzer.forget(device_id);
    }

    if expire_on_prune && !emptied.is_empty() {
        for device_id in &emptied {
            for location in state.presence.evict_device(device_id) {
                info!(
                    device_id = %device_id,
                    location = %location,
                    "presence expired for device with no recent records"
                );
                state.occupancy.invalidate(&location).await;
            }
        }
    }

    let dropped = state.dedupe.evict_expired(now);

    if !emptied.is_empty() || dropped > 0 {
        debug!(
            pruned_devices = emptied.len(),
            dedupe_dropped = dropped,
            "maintenance sweep complete"
        );
    }
}

/// Run the sweep every minute until the task is aborted.
pub async fn run_maintenance(state: Arc<EngineState>) {
    info!(interval_secs = SWEEP_INTERVAL_SECS, "maintenance task started");
    loop {
        tokio::time::sleep(Duration::from_secs(SWEEP_INTERVAL_SECS)).await;
        run_sweep_once(&state).await;
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::{
        BroadcastHub, InMemoryCache, InMemoryDeviceRegistry, InMemoryTimeSeries,
    };
    use crate::runtime_config::RuntimeConfig;
    use crate::types::{EventType, ProcessedRecord};
    use chrono::{DateTime, Duration as ChronoDuration, Utc};

    fn state_with(expire_on_prune: bool) -> Arc<EngineState> {
        let config = RuntimeConfig {
            expire_presence_on_prune: expire_on_prune,
            ..RuntimeConfig::default()
        };
        let (state, _rx) = EngineState::new(
            config,
            Arc::new(InMemoryDeviceRegistry::new()),
            Arc::new(InMemoryTimeSeries::new()),
            Arc::new(InMemoryCache::new()),
            Arc::new(BroadcastHub::new(16)),
        );
        state
    }

    fn entry_at(device_id: &str, timestamp: DateTime<Utc>) -> ProcessedRecord {
        ProcessedRecord {
            device_id: device_id.into(),
            mac_address: "AA:BB:CC:DD:EE:FF".into(),
            user_id: "user".into(),
            location: "library".into(),
            timestamp,
            rssi: -60,
            event_type: EventType::Entry,
            confidence: 0.9,
            battery_level: None,
        }
    }

    #[tokio::test]
    async fn stale_history_is_pruned_and_analyzer_forgets() {
        let state = state_with(false);
        let old = Utc::now() - ChronoDuration::hours(30);
        state.presence.apply(&entry_at("dev-old", old));
        state.analyzer.analyze("dev-old", -60);

        run_sweep_once(&state).await;

        assert!(state.presence.device_history("dev-old", 10).is_empty());
        assert!(state.analyzer.history("dev-old").is_empty());
    }

    #[tokio::test]
    async fn membership_survives_pruning_by_default() {
        let state = state_with(false);
        let old = Utc::now() - ChronoDuration::hours(30);
        state.presence.apply(&entry_at("dev-old", old));
        assert!(state.presence.is_member("library", "dev-old"));

        run_sweep_once(&state).await;

        // No Exit was ever observed, so the device is still counted.
        assert!(state.presence.is_member("library", "dev-old"));
    }

    #[tokio::test]
    async fn membership_expires_when_configured() {
        let state = state_with(true);
        let old = Utc::now() - ChronoDuration::hours(30);
        state.presence.apply(&entry_at("dev-old", old));

        run_sweep_once(&state).await;

        assert!(!state.presence.is_member("library", "dev-old"));
        assert_eq!(state.presence.occupancy("library"), 0);
    }

    #[tokio::test]
    async fn fresh_history_is_untouched() {
        let state = state_with(true);
        state.presence.apply(&entry_at("dev-new", Utc::now()));
        state.analyzer.analyze("dev-new", -60);

        run_sweep_once(&state).await;

        assert!(state.presence.is_member("library", "dev-new"));
        assert_eq!(state.presence.device_history("dev-new", 10).len(), 1);
        assert_eq!(state.analyzer.history("dev-new"), vec![-60]);
    }

    #[tokio::test]
    async fn stale_dedupe_entries_are_evicted() {
        let state = state_with(false);
        let old = Utc::now() - ChronoDuration::seconds(120);
        state
            .dedupe
            .record("dev-1", "library", EventType::Entry, old);
        assert_eq!(state.dedupe.len(), 1);

        run_sweep_once(&state).await;

        assert!(state.dedupe.is_empty());
    }
}
