// =============================================================================
// Event classification — state machine, confidence gate, duplicate filter
// =============================================================================

pub mod classifier;
pub mod dedupe;

pub use classifier::EventClassifier;
pub use dedupe::DuplicateFilter;
