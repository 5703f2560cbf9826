// =============================================================================
// Event Classifier — observation + signal analysis -> typed presence event
// =============================================================================
//
// State machine per (device, location), with membership read from the
// presence registry:
//
//   absent  -> present  Entry      rssi > entry_threshold, trend approaching
//   present -> absent   Exit       rssi < exit_threshold, trend departing
//   present -> present  Presence   member with rssi above the exit gate
//   otherwise           Heartbeat  nothing changes
//
// Every classification carries an additive confidence score, clamped to
// [0, 1]. Events below the configured floor are dropped by the pipeline
// before any state mutation.
// =============================================================================

use serde::Serialize;

use crate::runtime_config::ClassifierParams;
use crate::signal::{SignalAnalysis, Trend};
use crate::types::{Device, DeviceType, EventType};

/// Base score every classification starts from.
const CONFIDENCE_BASE: f64 = 0.5;
/// Weight of the stability contribution.
const STABILITY_WEIGHT: f64 = 0.2;
/// Bonus for dedicated beacon hardware.
const BEACON_BONUS: f64 = 0.1;
/// Bonus for a healthy reported battery (> 20%).
const BATTERY_BONUS: f64 = 0.1;

/// Outcome of classifying one observation.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Classification {
    pub event_type: EventType,
    /// Heuristic reliability in [0, 1].
    pub confidence: f64,
}

/// Pure classifier: all mutable state (membership, duplicate filter) lives
/// elsewhere and is passed in or consulted by the pipeline.
pub struct EventClassifier {
    params: ClassifierParams,
}

impl EventClassifier {
    pub fn new(params: ClassifierParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ClassifierParams {
        &self.params
    }

    /// Classify one analysed observation given current membership.
    pub fn classify(
        &self,
        analysis: &SignalAnalysis,
        device: &Device,
        is_member: bool,
    ) -> Classification {
        let event_type = self.event_type(analysis, is_member);
        let confidence = self.confidence(analysis, device);
        Classification {
            event_type,
            confidence,
        }
    }

    /// Whether a classification clears the confidence floor. Events below
    /// the floor must not mutate history, presence, or duplicate filters.
    pub fn accepts(&self, classification: &Classification) -> bool {
        classification.confidence >= self.params.min_confidence
    }

    fn event_type(&self, analysis: &SignalAnalysis, is_member: bool) -> EventType {
        let rssi = analysis.rssi;

        if !is_member
            && rssi > self.params.entry_rssi_threshold
            && analysis.trend == Trend::Approaching
        {
            return EventType::Entry;
        }

        if is_member {
            if rssi < self.params.exit_rssi_threshold && analysis.trend == Trend::Departing {
                return EventType::Exit;
            }
            if rssi > self.params.exit_rssi_threshold {
                return EventType::Presence;
            }
        }

        EventType::Heartbeat
    }

    /// Deterministic additive scoring, clamped to [0, 1]:
    /// base 0.5, signal-strength tier, stability weight, hardware bonus,
    /// battery bonus.
    fn confidence(&self, analysis: &SignalAnalysis, device: &Device) -> f64 {
        let mut score = CONFIDENCE_BASE;

        score += match analysis.rssi {
            r if r > -60 => 0.3,
            r if r > -70 => 0.2,
            r if r > -80 => 0.1,
            _ => 0.0,
        };

        score += analysis.stability * STABILITY_WEIGHT;

        if device.device_type == DeviceType::Beacon {
            score += BEACON_BONUS;
        }

        if matches!(device.battery_level, Some(level) if level > 20) {
            score += BATTERY_BONUS;
        }

        score.clamp(0.0, 1.0)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> EventClassifier {
        EventClassifier::new(ClassifierParams::default())
    }

    fn analysis(rssi: i32, stability: f64, trend: Trend) -> SignalAnalysis {
        SignalAnalysis {
            rssi,
            estimated_distance_m: 1.0,
            stability,
            trend,
        }
    }

    fn device(device_type: DeviceType, battery: Option<u8>) -> Device {
        Device {
            device_id: "dev-1".into(),
            user_id: "user-1".into(),
            mac_address: "AA:BB:CC:DD:EE:FF".into(),
            device_type,
            is_active: true,
            battery_level: battery,
        }
    }

    // ---- state machine ---------------------------------------------------

    #[test]
    fn strong_approaching_non_member_is_entry() {
        let c = classifier().classify(
            &analysis(-60, 1.0, Trend::Approaching),
            &device(DeviceType::Phone, None),
            false,
        );
        assert_eq!(c.event_type, EventType::Entry);
    }

    #[test]
    fn entry_requires_approaching_trend() {
        let c = classifier().classify(
            &analysis(-60, 1.0, Trend::Stable),
            &device(DeviceType::Phone, None),
            false,
        );
        assert_eq!(c.event_type, EventType::Heartbeat);
    }

    #[test]
    fn entry_requires_rssi_above_threshold() {
        // Default entry gate is -70; -75 is too weak even when approaching.
        let c = classifier().classify(
            &analysis(-75, 1.0, Trend::Approaching),
            &device(DeviceType::Phone, None),
            false,
        );
        assert_eq!(c.event_type, EventType::Heartbeat);
    }

    #[test]
    fn member_never_reclassifies_as_entry() {
        let c = classifier().classify(
            &analysis(-60, 1.0, Trend::Approaching),
            &device(DeviceType::Phone, None),
            true,
        );
        // Strong member reading reaffirms presence instead.
        assert_eq!(c.event_type, EventType::Presence);
    }

    #[test]
    fn weak_departing_member_is_exit() {
        let c = classifier().classify(
            &analysis(-90, 1.0, Trend::Departing),
            &device(DeviceType::Phone, None),
            true,
        );
        assert_eq!(c.event_type, EventType::Exit);
    }

    #[test]
    fn weak_departing_non_member_is_heartbeat() {
        let c = classifier().classify(
            &analysis(-90, 1.0, Trend::Departing),
            &device(DeviceType::Phone, None),
            false,
        );
        assert_eq!(c.event_type, EventType::Heartbeat);
    }

    #[test]
    fn member_above_exit_gate_is_presence() {
        let c = classifier().classify(
            &analysis(-80, 1.0, Trend::Stable),
            &device(DeviceType::Phone, None),
            true,
        );
        assert_eq!(c.event_type, EventType::Presence);
    }

    #[test]
    fn member_below_exit_gate_but_not_departing_is_heartbeat() {
        let c = classifier().classify(
            &analysis(-90, 1.0, Trend::Stable),
            &device(DeviceType::Phone, None),
            true,
        );
        assert_eq!(c.event_type, EventType::Heartbeat);
    }

    // ---- confidence ------------------------------------------------------

    #[test]
    fn confidence_tiers_by_signal_strength() {
        let c = classifier();
        let dev = device(DeviceType::Phone, None);
        // 0.5 base + tier, zero stability contribution.
        let strong = c.classify(&analysis(-55, 0.0, Trend::Stable), &dev, false);
        assert!((strong.confidence - 0.8).abs() < 1e-9);

        let medium = c.classify(&analysis(-65, 0.0, Trend::Stable), &dev, false);
        assert!((medium.confidence - 0.7).abs() < 1e-9);

        let weak = c.classify(&analysis(-75, 0.0, Trend::Stable), &dev, false);
        assert!((weak.confidence - 0.6).abs() < 1e-9);

        let faint = c.classify(&analysis(-85, 0.0, Trend::Stable), &dev, false);
        assert!((faint.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn stability_contributes_up_to_point_two() {
        let c = classifier();
        let dev = device(DeviceType::Phone, None);
        let steady = c.classify(&analysis(-85, 1.0, Trend::Stable), &dev, false);
        assert!((steady.confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn beacon_and_battery_bonuses_apply() {
        let c = classifier();
        let dev = device(DeviceType::Beacon, Some(80));
        // 0.5 + 0.3 + 0.2 + 0.1 + 0.1 = 1.2 — clamped to 1.0.
        let best = c.classify(&analysis(-55, 1.0, Trend::Stable), &dev, false);
        assert!((best.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn low_battery_earns_no_bonus() {
        let c = classifier();
        let low = device(DeviceType::Phone, Some(15));
        let none = device(DeviceType::Phone, None);
        let a = analysis(-85, 0.0, Trend::Stable);
        let with_low = c.classify(&a, &low, false);
        let with_none = c.classify(&a, &none, false);
        assert!((with_low.confidence - with_none.confidence).abs() < 1e-12);
    }

    #[test]
    fn confidence_floor_gate() {
        let c = classifier();
        let below = Classification { event_type: EventType::Entry, confidence: 0.59 };
        let at = Classification { event_type: EventType::Entry, confidence: 0.6 };
        assert!(!c.accepts(&below));
        assert!(c.accepts(&at));
    }
}
