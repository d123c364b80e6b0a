//! Per-source failure records for fallback diagnostics.
//!
//! When the chain advances past a source, the reason is recorded with its
//! [`ErrorKind`] preserved, so the aggregate failure distinguishes a
//! timeout from an auth rejection from an open circuit.

use crate::errors::{ErrorKind, SourceError};

/// Why one source failed during a fetch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureReason {
    /// A classified request failure.
    Error(ErrorKind),
    /// The source's circuit breaker was open; no request was sent.
    CircuitOpen,
    /// The source answered but its payload had no usable market price.
    NoUsablePrice,
    /// The source did not finish before the multi-source deadline.
    DeadlineExceeded,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error(kind) => f.write_str(kind.label()),
            Self::CircuitOpen => f.write_str("circuit_open"),
            Self::NoUsablePrice => f.write_str("no_usable_price"),
            Self::DeadlineExceeded => f.write_str("deadline_exceeded"),
        }
    }
}

/// Record of one source's failure within a fetch.
#[derive(Clone, Debug)]
pub struct SourceFailure {
    /// Source that failed.
    pub source_id: String,
    /// Why it failed.
    pub reason: FailureReason,
    /// Human-readable detail.
    pub message: String,
}

impl SourceFailure {
    /// Record a failure from a source error.
    pub fn from_error(source_id: &str, err: &SourceError) -> Self {
        let reason = match err {
            SourceError::CircuitOpen { .. } => FailureReason::CircuitOpen,
            SourceError::NoUsablePrice { .. } => FailureReason::NoUsablePrice,
            SourceError::Api { kind, .. } => FailureReason::Error(kind.clone()),
            SourceError::AllSourcesFailed { .. } => FailureReason::Error(ErrorKind::Transient),
        };
        Self {
            source_id: source_id.to_string(),
            reason,
            message: err.to_string(),
        }
    }

    /// Record a deadline overrun for the concurrent fetch path.
    pub fn deadline_exceeded(source_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            reason: FailureReason::DeadlineExceeded,
            message: "deadline exceeded".to_string(),
        }
    }

    /// One-line summary of a failure list, for logging and error display.
    pub fn summary(failures: &[SourceFailure]) -> String {
        failures
            .iter()
            .map(|f| format!("{}: {}", f.source_id, f.reason))
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_error_preserves_kind() {
        let err = SourceError::Api {
            service: "justtcg".to_string(),
            kind: ErrorKind::Authentication,
            status: Some(401),
            message: "bad key".to_string(),
        };
        let failure = SourceFailure::from_error("justtcg", &err);
        assert_eq!(failure.reason, FailureReason::Error(ErrorKind::Authentication));
    }

    #[test]
    fn test_circuit_open_mapped() {
        let err = SourceError::CircuitOpen {
            service: "tcgplayer".to_string(),
        };
        let failure = SourceFailure::from_error("tcgplayer", &err);
        assert_eq!(failure.reason, FailureReason::CircuitOpen);
    }

    #[test]
    fn test_summary_format() {
        let failures = vec![
            SourceFailure {
                source_id: "a".to_string(),
                reason: FailureReason::Error(ErrorKind::Authentication),
                message: String::new(),
            },
            SourceFailure {
                source_id: "b".to_string(),
                reason: FailureReason::Error(ErrorKind::Transient),
                message: String::new(),
            },
            SourceFailure {
                source_id: "c".to_string(),
                reason: FailureReason::DeadlineExceeded,
                message: String::new(),
            },
        ];
        assert_eq!(
            SourceFailure::summary(&failures),
            "a: authentication -> b: transient -> c: deadline_exceeded"
        );
    }
}
