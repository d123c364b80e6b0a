//! Pure failure classification.
//!
//! Maps completed HTTP responses and transport errors into the
//! [`ErrorKind`] taxonomy. No network access, no state; classifying the
//! same input twice always yields the same kind.

use std::time::Duration;

use super::ErrorKind;

/// Classify a completed HTTP response status.
///
/// `retry_after` is the parsed `Retry-After` header, only consulted for
/// 429 responses.
pub fn classify_status(status: u16, retry_after: Option<Duration>) -> ErrorKind {
    match status {
        429 => ErrorKind::RateLimited { retry_after },
        401 | 403 => ErrorKind::Authentication,
        422 => ErrorKind::Validation,
        400..=499 => ErrorKind::Permanent,
        500..=599 => ErrorKind::Transient,
        // Unrecognized statuses: retry is the safe default.
        _ => ErrorKind::Transient,
    }
}

/// Classify a transport-level failure from the HTTP client.
pub fn classify_transport(err: &reqwest::Error) -> ErrorKind {
    if err.is_timeout() {
        ErrorKind::Timeout
    } else if err.is_connect() {
        ErrorKind::Network
    } else if let Some(status) = err.status() {
        classify_status(status.as_u16(), None)
    } else {
        ErrorKind::Transient
    }
}

/// Parse an integer-seconds `Retry-After` header value.
///
/// HTTP-date forms are not used by the supported providers and yield `None`.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
