// =============================================================================
// Signal analysis — rolling RSSI interpretation
// =============================================================================

pub mod analyzer;

pub use analyzer::{SignalAnalysis, SignalAnalyzer, Trend};
