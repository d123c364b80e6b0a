//! Error types and retry classification for the price source layer.
//!
//! This module provides:
//! - [`ErrorKind`]: The semantic failure taxonomy every failure is mapped into
//! - [`SourceError`]: The main error enum for all source operations
//! - Pure classifier functions in [`classify`]

pub mod classify;

use std::mem;
use std::time::Duration;

use thiserror::Error;

use crate::sources::attempts::SourceFailure;

/// Semantic classification of a failed request.
///
/// Every transport or HTTP failure is mapped to exactly one kind before
/// any retry decision is made. The kind drives both the retry orchestrator
/// (retry or re-raise) and the circuit breaker (count or ignore).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Might succeed on retry (5xx, unrecognized failures).
    Transient,
    /// Will not succeed on retry (4xx other than 401/403/422/429).
    Permanent,
    /// The provider rate limited the request (HTTP 429).
    /// Carries the integer-seconds `Retry-After` hint when present.
    RateLimited { retry_after: Option<Duration> },
    /// Credentials were rejected (401/403).
    Authentication,
    /// Connect or DNS failure. Retryable.
    Network,
    /// The request timed out. Retryable.
    Timeout,
    /// The provider rejected the request payload (422), or the response
    /// failed local validation.
    Validation,
}

impl ErrorKind {
    /// Whether a retry of the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient | Self::RateLimited { .. } | Self::Network | Self::Timeout
        )
    }

    /// Whether this failure counts against the circuit breaker.
    ///
    /// Mirrors the retryable set: a breaker tracks provider health, and
    /// Authentication/Validation/Permanent failures say nothing about it.
    pub fn trips_breaker(&self) -> bool {
        self.is_retryable()
    }

    /// Compare two kinds ignoring variant payloads.
    pub fn same_class(&self, other: &ErrorKind) -> bool {
        mem::discriminant(self) == mem::discriminant(other)
    }

    /// Short label for logging and aggregate failure reports.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::RateLimited { .. } => "rate_limited",
            Self::Authentication => "authentication",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Validation => "validation",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Errors that can occur while fetching prices from external sources.
#[derive(Error, Debug)]
pub enum SourceError {
    /// A classified request failure against one service.
    #[error("{service}: {kind} ({message})")]
    Api {
        /// Service the request was sent to.
        service: String,
        /// Semantic classification of the failure.
        kind: ErrorKind,
        /// HTTP status, when the failure came from a completed response.
        status: Option<u16>,
        /// Human-readable detail from the response or transport error.
        message: String,
    },

    /// The circuit breaker rejected the call without a network attempt.
    #[error("circuit open: {service}")]
    CircuitOpen {
        /// Service whose circuit is open.
        service: String,
    },

    /// The source answered but produced no usable market price.
    #[error("no usable price from {service}")]
    NoUsablePrice {
        /// Service whose payload was unusable.
        service: String,
    },

    /// Every source in the chain failed.
    ///
    /// Carries one entry per source with the failure kind preserved,
    /// in the order the sources were tried.
    #[error("all sources failed: {}", SourceFailure::summary(.failures))]
    AllSourcesFailed {
        /// Per-source failure records.
        failures: Vec<SourceFailure>,
    },
}

impl SourceError {
    /// The semantic kind of this failure, if it maps to one.
    ///
    /// `CircuitOpen` and `AllSourcesFailed` are breaker/chain level
    /// outcomes rather than classified request failures.
    pub fn kind(&self) -> Option<&ErrorKind> {
        match self {
            Self::Api { kind, .. } => Some(kind),
            Self::NoUsablePrice { .. } => Some(&ErrorKind::Validation),
            Self::CircuitOpen { .. } | Self::AllSourcesFailed { .. } => None,
        }
    }

    /// Whether the retry orchestrator may re-attempt this failure.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_some_and(ErrorKind::is_retryable)
    }

    /// Whether this failure counts against the circuit breaker.
    pub fn trips_breaker(&self) -> bool {
        self.kind().is_some_and(ErrorKind::trips_breaker)
    }

    /// Provider-supplied retry delay, for rate-limited failures.
    pub fn retry_after(&self) -> Option<Duration> {
        match self.kind() {
            Some(ErrorKind::RateLimited { retry_after }) => *retry_after,
            _ => None,
        }
    }
}
