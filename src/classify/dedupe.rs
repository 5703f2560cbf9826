// =============================================================================
// Duplicate Suppressor — time-windowed filter for repeat Entry/Exit events
// =============================================================================
//
// A burst of observations at a doorway will happily classify the same Entry
// five times in a row. This filter keeps one entry per (device, location)
// pair recording the last accepted transition; a same-type repeat inside the
// window is suppressed. Presence and Heartbeat events never consult it.
//
// Entries are refreshed on every accepted Entry/Exit and evicted by the
// maintenance sweep once older than twice the window.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use tracing::debug;

use crate::types::EventType;

#[derive(Debug, Clone, Copy)]
struct FilterEntry {
    last_event_time: DateTime<Utc>,
    event_type: EventType,
}

/// Shared duplicate filter keyed by (device_id, location).
pub struct DuplicateFilter {
    window: Duration,
    entries: RwLock<HashMap<(String, String), FilterEntry>>,
}

impl DuplicateFilter {
    pub fn new(window_secs: u64) -> Self {
        Self {
            window: Duration::seconds(window_secs as i64),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Whether an event of `event_type` for this pair would be a duplicate
    /// at time `now`. Only meaningful for Entry/Exit.
    pub fn is_duplicate(
        &self,
        device_id: &str,
        location: &str,
        event_type: EventType,
        now: DateTime<Utc>,
    ) -> bool {
        let entries = self.entries.read();
        match entries.get(&(device_id.to_string(), location.to_string())) {
            Some(entry) => {
                entry.event_type == event_type && now - entry.last_event_time <= self.window
            }
            None => false,
        }
    }

    /// Record an accepted Entry/Exit, refreshing the pair's timestamp.
    pub fn record(
        &self,
        device_id: &str,
        location: &str,
        event_type: EventType,
        now: DateTime<Utc>,
    ) {
        debug_assert!(event_type.is_transition());
        self.entries.write().insert(
            (device_id.to_string(), location.to_string()),
            FilterEntry {
                last_event_time: now,
                event_type,
            },
        );
    }

    /// Evict entries older than twice the suppression window. Returns how
    /// many were dropped.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let cutoff = self.window * 2;
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| now - e.last_event_time <= cutoff);
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, remaining = entries.len(), "duplicate filter entries evicted");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn first_event_is_never_a_duplicate() {
        let filter = DuplicateFilter::new(30);
        assert!(!filter.is_duplicate("dev", "library", EventType::Entry, t0()));
    }

    #[test]
    fn same_type_within_window_is_duplicate() {
        let filter = DuplicateFilter::new(30);
        filter.record("dev", "library", EventType::Entry, t0());

        let again = t0() + Duration::seconds(15);
        assert!(filter.is_duplicate("dev", "library", EventType::Entry, again));
    }

    #[test]
    fn same_type_after_window_is_not_duplicate() {
        let filter = DuplicateFilter::new(30);
        filter.record("dev", "library", EventType::Entry, t0());

        let later = t0() + Duration::seconds(31);
        assert!(!filter.is_duplicate("dev", "library", EventType::Entry, later));
    }

    #[test]
    fn opposite_type_is_not_duplicate() {
        // Entry followed quickly by Exit is a legitimate walk-through.
        let filter = DuplicateFilter::new(30);
        filter.record("dev", "library", EventType::Entry, t0());

        let soon = t0() + Duration::seconds(5);
        assert!(!filter.is_duplicate("dev", "library", EventType::Exit, soon));
    }

    #[test]
    fn pairs_are_independent() {
        let filter = DuplicateFilter::new(30);
        filter.record("dev", "library", EventType::Entry, t0());

        let soon = t0() + Duration::seconds(5);
        assert!(!filter.is_duplicate("dev", "gym", EventType::Entry, soon));
        assert!(!filter.is_duplicate("other", "library", EventType::Entry, soon));
    }

    #[test]
    fn record_refreshes_the_window() {
        let filter = DuplicateFilter::new(30);
        filter.record("dev", "library", EventType::Entry, t0());
        // Accepted again at +40s (outside the window), refreshing the entry.
        let second = t0() + Duration::seconds(40);
        filter.record("dev", "library", EventType::Entry, second);

        // +60s is 20s after the refresh: still suppressed.
        let third = second + Duration::seconds(20);
        assert!(filter.is_duplicate("dev", "library", EventType::Entry, third));
    }

    #[test]
    fn eviction_drops_only_stale_entries() {
        let filter = DuplicateFilter::new(30);
        filter.record("old", "library", EventType::Entry, t0());
        filter.record("fresh", "library", EventType::Exit, t0() + Duration::seconds(50));

        // Cutoff is 2x window = 60s. At +61s "old" is stale, "fresh" is not.
        let evicted = filter.evict_expired(t0() + Duration::seconds(61));
        assert_eq!(evicted, 1);
        assert_eq!(filter.len(), 1);
        assert!(filter.is_duplicate(
            "fresh",
            "library",
            EventType::Exit,
            t0() + Duration::seconds(70)
        ));
    }
}
