// =============================================================================
// Location Presence Registry — who is currently inside each location
// =============================================================================
//
// Source of truth for occupancy counts. Membership is mutated exclusively by
// accepted Entry (add) and Exit (remove) events; Presence and Heartbeat
// classifications never touch it. The registry also owns the bounded
// per-device ProcessedRecord history (cap 100, FIFO) and its 24-hour prune.
//
// Thread-safety: all mutable state is behind `parking_lot::RwLock`.
// =============================================================================

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::types::{EventType, ProcessedRecord};

/// Records retained per device before FIFO eviction.
const HISTORY_CAP: usize = 100;

/// Thread-safe registry of per-location presence sets and per-device record
/// history.
pub struct PresenceRegistry {
    members: RwLock<HashMap<String, HashSet<String>>>,
    history: RwLock<HashMap<String, VecDeque<ProcessedRecord>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            members: RwLock::new(HashMap::new()),
            history: RwLock::new(HashMap::new()),
        }
    }

    // -------------------------------------------------------------------------
    // Membership
    // -------------------------------------------------------------------------

    /// Snapshot of the devices currently present at `location`.
    pub fn members(&self, location: &str) -> HashSet<String> {
        self.members
            .read()
            .get(location)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_member(&self, location: &str, device_id: &str) -> bool {
        self.members
            .read()
            .get(location)
            .map(|set| set.contains(device_id))
            .unwrap_or(false)
    }

    /// Current occupancy count for `location`.
    pub fn occupancy(&self, location: &str) -> usize {
        self.members
            .read()
            .get(location)
            .map(|set| set.len())
            .unwrap_or(0)
    }

    /// Apply an accepted record: Entry adds membership, Exit removes it,
    /// anything else leaves membership untouched. The record is always
    /// appended to the device's bounded history.
    ///
    /// Returns `true` when membership actually changed.
    pub fn apply(&self, record: &ProcessedRecord) -> bool {
        let changed = match record.event_type {
            EventType::Entry => {
                let mut members = self.members.write();
                let added = members
                    .entry(record.location.clone())
                    .or_default()
                    .insert(record.device_id.clone());
                if added {
                    info!(
                        device_id = %record.device_id,
                        location = %record.location,
                        "device entered location"
                    );
                }
                added
            }
            EventType::Exit => {
                let mut members = self.members.write();
                let removed = members
                    .get_mut(&record.location)
                    .map(|set| set.remove(&record.device_id))
                    .unwrap_or(false);
                if removed {
                    info!(
                        device_id = %record.device_id,
                        location = %record.location,
                        "device exited location"
                    );
                }
                removed
            }
            EventType::Presence | EventType::Heartbeat => false,
        };

        self.append_history(record);
        changed
    }

    /// Forcibly drop a device's membership (admin action or presence expiry
    /// when `expire_presence_on_prune` is enabled). Returns the locations it
    /// was removed from.
    pub fn evict_device(&self, device_id: &str) -> Vec<String> {
        let mut members = self.members.write();
        let mut removed_from = Vec::new();
        for (location, set) in members.iter_mut() {
            if set.remove(device_id) {
                removed_from.push(location.clone());
            }
        }
        if !removed_from.is_empty() {
            info!(device_id, locations = ?removed_from, "device evicted from presence sets");
        }
        removed_from
    }

    // -------------------------------------------------------------------------
    // Record history
    // -------------------------------------------------------------------------

    fn append_history(&self, record: &ProcessedRecord) {
        let mut history = self.history.write();
        let entries = history.entry(record.device_id.clone()).or_default();
        entries.push_back(record.clone());
        while entries.len() > HISTORY_CAP {
            entries.pop_front();
        }
    }

    /// The most recent `count` records for a device, newest first.
    pub fn device_history(&self, device_id: &str, count: usize) -> Vec<ProcessedRecord> {
        self.history
            .read()
            .get(device_id)
            .map(|h| h.iter().rev().take(count).cloned().collect())
            .unwrap_or_default()
    }

    /// Drop history entries older than `cutoff`. Returns the ids of devices
    /// whose history became empty (candidates for analyzer eviction and,
    /// behind its config flag, presence expiry).
    pub fn prune_history(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        let mut history = self.history.write();
        let mut emptied = Vec::new();

        history.retain(|device_id, entries| {
            let before = entries.len();
            entries.retain(|r| r.timestamp >= cutoff);
            let dropped = before - entries.len();
            if dropped > 0 {
                debug!(device_id = %device_id, dropped, "stale history records pruned");
            }
            if entries.is_empty() {
                emptied.push(device_id.clone());
                false
            } else {
                true
            }
        });

        emptied
    }

    /// Locations with at least one tracked member set (present or past).
    pub fn known_locations(&self) -> Vec<String> {
        self.members.read().keys().cloned().collect()
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PresenceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let locations = self.members.read().len();
        let devices = self.history.read().len();
        f.debug_struct("PresenceRegistry")
            .field("locations", &locations)
            .field("devices_with_history", &devices)
            .finish()
    }
}
