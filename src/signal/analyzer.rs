// =============================================================================
// Signal Analyzer — distance, stability, and trend from rolling RSSI history
// =============================================================================
//
// Maintains a short per-device history of signal-strength readings and
// derives three things on every observation:
//
//   Distance  — log-distance path-loss model:
//                 d = 10^((tx_power - rssi) / (10 * path_loss_exponent))
//               with tx_power = -59 dBm at 1 m and exponent = 2.
//   Stability — max(0, 1 - stddev(history) / 20): high variance in recent
//               readings linearly reduces the score, saturating to 0 once
//               the standard deviation reaches 20 dBm.
//   Trend     — mean of the older half vs. the newer half of the last 5
//               readings; a swing beyond ±3 dBm is a direction.
//
// rssi == 0 is the invalid-reading sentinel: it yields distance -1.0 and is
// never appended to history.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::Serialize;

/// Reference transmit power at 1 metre, in dBm.
const TX_POWER_DBM: f64 = -59.0;
/// Path-loss exponent for an indoor free-ish environment.
const PATH_LOSS_EXPONENT: f64 = 2.0;
/// Readings kept per device; oldest evicted beyond this.
const HISTORY_CAP: usize = 10;
/// Readings considered for trend detection.
const TREND_WINDOW: usize = 5;
/// dBm swing between halves required to call a direction.
const TREND_DELTA_DBM: f64 = 3.0;
/// Standard deviation (dBm) at which stability bottoms out at 0.
const STABILITY_SPAN_DBM: f64 = 20.0;

/// Direction of signal movement over the recent window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Trend {
    Approaching,
    Stable,
    Departing,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approaching => write!(f, "approaching"),
            Self::Stable => write!(f, "stable"),
            Self::Departing => write!(f, "departing"),
        }
    }
}

/// Derived view of one reading in the context of its device's history.
/// Recomputed on every observation, never stored.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SignalAnalysis {
    pub rssi: i32,
    /// Metres; -1.0 for the invalid-reading sentinel.
    pub estimated_distance_m: f64,
    /// In [0, 1]; 1 means perfectly steady readings.
    pub stability: f64,
    pub trend: Trend,
}

/// Owns every device's bounded RSSI history. A single instance lives on the
/// engine state and is shared across location tasks; the interior map is
/// guarded so two locations observing the same device cannot interleave a
/// read-modify-write.
pub struct SignalAnalyzer {
    histories: RwLock<HashMap<String, VecDeque<i32>>>,
}

impl SignalAnalyzer {
    pub fn new() -> Self {
        Self {
            histories: RwLock::new(HashMap::new()),
        }
    }

    /// Record `rssi` for `device_id` and derive the current analysis.
    ///
    /// The sentinel reading (rssi == 0) does not enter history; it merely
    /// produces an analysis with distance -1.0 over the existing readings.
    pub fn analyze(&self, device_id: &str, rssi: i32) -> SignalAnalysis {
        let mut histories = self.histories.write();
        let history = histories.entry(device_id.to_string()).or_default();

        if rssi != 0 {
            history.push_back(rssi);
            while history.len() > HISTORY_CAP {
                history.pop_front();
            }
        }

        SignalAnalysis {
            rssi,
            estimated_distance_m: distance_from_rssi(rssi),
            stability: stability_score(history),
            trend: detect_trend(history),
        }
    }

    /// Drop all history for a device (maintenance eviction).
    pub fn forget(&self, device_id: &str) {
        self.histories.write().remove(device_id);
    }

    /// Number of devices currently tracked.
    pub fn tracked_devices(&self) -> usize {
        self.histories.read().len()
    }

    /// Snapshot of one device's history, oldest first. Test and diagnostics
    /// helper.
    pub fn history(&self, device_id: &str) -> Vec<i32> {
        self.histories
            .read()
            .get(device_id)
            .map(|h| h.iter().copied().collect())
            .unwrap_or_default()
    }
}

impl Default for SignalAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Pure helpers
// =============================================================================

/// Log-distance path-loss estimate in metres; -1.0 for the sentinel.
fn distance_from_rssi(rssi: i32) -> f64 {
    if rssi == 0 {
        return -1.0;
    }
    10f64.powf((TX_POWER_DBM - rssi as f64) / (10.0 * PATH_LOSS_EXPONENT))
}

/// max(0, 1 - stddev/20), using the population standard deviation.
fn stability_score(history: &VecDeque<i32>) -> f64 {
    if history.len() < 2 {
        return 1.0;
    }
    let n = history.len() as f64;
    let mean = history.iter().map(|&r| r as f64).sum::<f64>() / n;
    let variance = history
        .iter()
        .map(|&r| {
            let d = r as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    let stddev = variance.sqrt();
    (1.0 - stddev / STABILITY_SPAN_DBM).max(0.0)
}

/// Compare the older and newer halves of the last `TREND_WINDOW` readings.
/// Fewer than `TREND_WINDOW` readings is Stable by definition. For the odd
/// window the middle reading belongs to neither half.
fn detect_trend(history: &VecDeque<i32>) -> Trend {
    if history.len() < TREND_WINDOW {
        return Trend::Stable;
    }

    let recent: Vec<f64> = history
        .iter()
        .skip(history.len() - TREND_WINDOW)
        .map(|&r| r as f64)
        .collect();

    let half = TREND_WINDOW / 2;
    let older_avg = recent[..half].iter().sum::<f64>() / half as f64;
    let newer_avg = recent[TREND_WINDOW - half..].iter().sum::<f64>() / half as f64;

    let diff = newer_avg - older_avg;
    if diff > TREND_DELTA_DBM {
        Trend::Approaching
    } else if diff < -TREND_DELTA_DBM {
        Trend::Departing
    } else {
        Trend::Stable
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn feed(analyzer: &SignalAnalyzer, device: &str, readings: &[i32]) -> SignalAnalysis {
        let mut last = None;
        for &r in readings {
            last = Some(analyzer.analyze(device, r));
        }
        last.expect("at least one reading")
    }

    // ---- distance --------------------------------------------------------

    #[test]
    fn distance_at_reference_power_is_one_metre() {
        // rssi == tx_power => exponent 0 => 1 m.
        assert!((distance_from_rssi(-59) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn distance_grows_as_signal_weakens() {
        // -79 dBm => 10^(20/20) = 10 m.
        assert!((distance_from_rssi(-79) - 10.0).abs() < 1e-9);
        assert!(distance_from_rssi(-90) > distance_from_rssi(-70));
    }

    #[test]
    fn sentinel_reading_yields_invalid_distance() {
        let analyzer = SignalAnalyzer::new();
        let analysis = analyzer.analyze("dev", 0);
        assert!((analysis.estimated_distance_m - (-1.0)).abs() < f64::EPSILON);
        // Sentinel never enters history.
        assert!(analyzer.history("dev").is_empty());
    }

    // ---- history bounds --------------------------------------------------

    #[test]
    fn history_is_capped_at_ten() {
        let analyzer = SignalAnalyzer::new();
        for i in 0..25 {
            analyzer.analyze("dev", -60 - i);
        }
        let hist = analyzer.history("dev");
        assert_eq!(hist.len(), 10);
        // Oldest evicted: the surviving readings are the most recent 10.
        assert_eq!(hist[0], -75);
        assert_eq!(hist[9], -84);
    }

    #[test]
    fn forget_drops_device_history() {
        let analyzer = SignalAnalyzer::new();
        analyzer.analyze("dev", -60);
        assert_eq!(analyzer.tracked_devices(), 1);
        analyzer.forget("dev");
        assert_eq!(analyzer.tracked_devices(), 0);
    }

    // ---- stability -------------------------------------------------------

    #[test]
    fn flat_history_is_perfectly_stable() {
        let analyzer = SignalAnalyzer::new();
        let analysis = feed(&analyzer, "dev", &[-70; 8]);
        assert!((analysis.stability - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn wild_history_saturates_to_zero() {
        // Alternating -30/-110 has a stddev of 40 dBm, well past the span.
        let analyzer = SignalAnalyzer::new();
        let analysis = feed(&analyzer, "dev", &[-30, -110, -30, -110, -30, -110]);
        assert!(analysis.stability.abs() < f64::EPSILON);
    }

    #[test]
    fn moderate_variance_reduces_stability_linearly() {
        // [-65, -75] repeated: mean -70, every point 5 off => stddev 5.
        let analyzer = SignalAnalyzer::new();
        let analysis = feed(&analyzer, "dev", &[-65, -75, -65, -75]);
        assert!((analysis.stability - 0.75).abs() < 1e-9);
    }

    // ---- trend -----------------------------------------------------------

    #[test]
    fn rising_rssi_is_approaching() {
        // Older half avg -69, newer half avg -63, diff +6 > +3.
        let analyzer = SignalAnalyzer::new();
        let analysis = feed(&analyzer, "dev", &[-70, -68, -66, -64, -62]);
        assert_eq!(analysis.trend, Trend::Approaching);
    }

    #[test]
    fn falling_rssi_is_departing() {
        let analyzer = SignalAnalyzer::new();
        let analysis = feed(&analyzer, "dev", &[-62, -64, -66, -68, -70]);
        assert_eq!(analysis.trend, Trend::Departing);
    }

    #[test]
    fn flat_rssi_is_stable() {
        let analyzer = SignalAnalyzer::new();
        let analysis = feed(&analyzer, "dev", &[-70, -70, -70, -70, -70]);
        assert_eq!(analysis.trend, Trend::Stable);
    }

    #[test]
    fn short_history_is_stable_by_definition() {
        let analyzer = SignalAnalyzer::new();
        let analysis = feed(&analyzer, "dev", &[-90, -60, -50, -40]);
        assert_eq!(analysis.trend, Trend::Stable);
    }

    #[test]
    fn small_swing_within_threshold_is_stable() {
        // Diff of exactly +3 is not strictly greater than the threshold.
        let analyzer = SignalAnalyzer::new();
        let analysis = feed(&analyzer, "dev", &[-70, -70, -68, -67, -67]);
        assert_eq!(analysis.trend, Trend::Stable);
    }

    #[test]
    fn trend_uses_only_last_five_readings() {
        // Ancient strong readings must not drown out the recent decline.
        let analyzer = SignalAnalyzer::new();
        let mut readings = vec![-50; 5];
        readings.extend_from_slice(&[-62, -64, -66, -68, -70]);
        let analysis = feed(&analyzer, "dev", &readings);
        assert_eq!(analysis.trend, Trend::Departing);
    }

    // ---- concurrent-ish access ------------------------------------------

    #[test]
    fn devices_have_independent_histories() {
        let analyzer = SignalAnalyzer::new();
        feed(&analyzer, "a", &[-70, -68, -66, -64, -62]);
        feed(&analyzer, "b", &[-62, -64, -66, -68, -70]);
        assert_eq!(analyzer.analyze("a", -60).trend, Trend::Approaching);
        assert_eq!(analyzer.analyze("b", -72).trend, Trend::Departing);
    }
}
