// =============================================================================
// Error taxonomy — transient vs. domain vs. fatal
// =============================================================================
//
// Every fallible step in the pipeline surfaces an `EngineError`. The retry
// executor branches on `is_retryable()`:
//
//   retryable      — Timeout, Connection, Upstream 5xx. Backed off and retried.
//   non-retryable  — Validation and Domain errors. Dropped locally, logged,
//                    never retried, never propagated as hard failures.
//   fatal          — Internal. Propagates to the orchestration entry point.
// =============================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// An external call exceeded its time budget.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// Connection refused / reset / dropped mid-flight.
    #[error("connection failure: {0}")]
    Connection(String),

    /// An upstream collaborator returned a server-side failure.
    #[error("upstream returned status {status}: {message}")]
    Upstream { status: u16, message: String },

    /// Malformed input (bad MAC, out-of-range RSSI, unknown location).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Business-rule rejection (inactive device, below-confidence event).
    #[error("domain rule: {0}")]
    Domain(String),

    /// Anything unexpected. Surfaces to the caller for operator attention.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether the default retry predicate will re-attempt this error.
    ///
    /// 5xx-equivalent upstream statuses are retryable; 4xx-equivalent are
    /// treated as the caller's fault and are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Connection(_) => true,
            Self::Upstream { status, .. } => *status >= 500,
            Self::Validation(_) | Self::Domain(_) | Self::Internal(_) => false,
        }
    }

    /// Short machine-readable class name, used in structured log fields.
    pub fn class(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Connection(_) => "connection",
            Self::Upstream { .. } => "upstream",
            Self::Validation(_) => "validation",
            Self::Domain(_) => "domain",
            Self::Internal(_) => "internal",
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(EngineError::Timeout("scan".into()).is_retryable());
        assert!(EngineError::Connection("refused".into()).is_retryable());
        assert!(EngineError::Upstream { status: 503, message: "unavailable".into() }
            .is_retryable());
    }

    #[test]
    fn upstream_4xx_is_not_retryable() {
        assert!(!EngineError::Upstream { status: 404, message: "missing".into() }
            .is_retryable());
    }

    #[test]
    fn domain_and_validation_are_not_retryable() {
        assert!(!EngineError::Validation("bad mac".into()).is_retryable());
        assert!(!EngineError::Domain("inactive device".into()).is_retryable());
        assert!(!EngineError::Internal("bug".into()).is_retryable());
    }

    #[test]
    fn class_names_are_stable() {
        assert_eq!(EngineError::Timeout("t".into()).class(), "timeout");
        assert_eq!(EngineError::Domain("d".into()).class(), "domain");
    }
}
