// =============================================================================
// Scanning — the radio seam and the per-location orchestrator
// =============================================================================

pub mod orchestrator;
pub mod seam;

pub use orchestrator::ScanOrchestrator;
pub use seam::{ScanProvider, SimulatedScanner};
