// =============================================================================
// Observation processor — the per-observation pipeline
// =============================================================================
//
// One observation flows through, in order:
//
//   validate -> device lookup -> signal analysis -> classification
//   -> confidence floor -> duplicate filter -> presence mutation
//   -> persistence -> occupancy invalidation -> event emission
//
// Everything fallible-and-retryable (the device lookup) happens BEFORE any
// state mutation, so the orchestrator can wrap the whole call in a retry
// without risking a double-applied entry or exit. Failures after the
// mutation point (sink writes, occupancy refresh) are absorbed with a
// warning; the record stands.
// =============================================================================

use std::sync::Arc;

use tracing::{debug, warn};

use crate::app_state::EngineState;
use crate::dispatch::PipelineEvent;
use crate::error::EngineError;
use crate::types::{Observation, ProcessedRecord};

/// Run one observation through the full pipeline.
///
/// `Ok(Some(record))` — accepted, state mutated, record emitted.
/// `Ok(None)` — dropped on purpose (unknown/inactive device, below the
/// confidence floor, or a suppressed duplicate).
/// `Err(_)` — the pipeline could not decide; safe to retry.
pub async fn process_observation(
    state: &Arc<EngineState>,
    obs: &Observation,
) -> Result<Option<ProcessedRecord>, EngineError> {
    // rssi 0 is the invalid-reading sentinel; it must never reach the
    // analyzer history or beyond.
    if obs.rssi == 0 {
        return Err(EngineError::Validation(format!(
            "invalid rssi 0 for mac {}",
            obs.device_mac
        )));
    }

    // Device lookup is the only upstream call on this path and it happens
    // before any mutation.
    let device = match state.devices.device_by_mac(&obs.device_mac).await? {
        Some(device) => device,
        None => {
            debug!(mac = %obs.device_mac, "unregistered mac, observation dropped");
            return Ok(None);
        }
    };
    if !device.is_active {
        debug!(device_id = %device.device_id, "inactive device, observation dropped");
        return Ok(None);
    }

    let analysis = state.analyzer.analyze(&device.device_id, obs.rssi);
    let is_member = state.presence.is_member(&obs.location, &device.device_id);
    let classification = state.classifier.classify(&analysis, &device, is_member);

    if !state.classifier.accepts(&classification) {
        debug!(
            device_id = %device.device_id,
            event = %classification.event_type,
            confidence = format!("{:.2}", classification.confidence),
            "below confidence floor, observation dropped"
        );
        return Ok(None);
    }

    if classification.event_type.is_transition()
        && state.dedupe.is_duplicate(
            &device.device_id,
            &obs.location,
            classification.event_type,
            obs.timestamp,
        )
    {
        debug!(
            device_id = %device.device_id,
            location = %obs.location,
            event = %classification.event_type,
            "duplicate suppressed"
        );
        return Ok(None);
    }

    let record = ProcessedRecord {
        device_id: device.device_id.clone(),
        mac_address: device.mac_address.clone(),
        user_id: device.user_id.clone(),
        location: obs.location.clone(),
        timestamp: obs.timestamp,
        rssi: obs.rssi,
        event_type: classification.event_type,
        confidence: classification.confidence,
        battery_level: device.battery_level,
    };

    // ── mutation point: from here on, failures are absorbed ──

    if record.event_type.is_transition() {
        state.dedupe.record(
            &record.device_id,
            &record.location,
            record.event_type,
            record.timestamp,
        );
    }
    let membership_changed = state.presence.apply(&record);

    if let Err(e) = state.sink.write_record(&record).await {
        warn!(
            device_id = %record.device_id,
            error = %e,
            "time-series write failed, record kept in memory only"
        );
    }

    if membership_changed {
        state.occupancy.invalidate(&record.location).await;
        // Refresh eagerly so the next read is a cache hit; failure here
        // only delays the recompute to that next read.
        if let Err(e) = state.occupancy.occupancy(&record.location).await {
            warn!(location = %record.location, error = %e, "occupancy refresh failed");
        }
    }

    // Dispatcher gone means shutdown is in progress; nothing to do.
    let _ = state.event_tx.send(PipelineEvent::Record(record.clone()));

    Ok(Some(record))
}
