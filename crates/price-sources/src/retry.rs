//! Bounded retry with exponential backoff and jitter.
//!
//! [`RetryPolicy::run`] is an explicit execute-with-policy operation: it
//! invokes the supplied operation up to `max_attempts` times, consulting
//! the failure's [`ErrorKind`] before every re-attempt. Permanent,
//! Authentication, and Validation failures are re-raised immediately. A
//! provider-supplied `Retry-After` takes precedence over backoff math.

use std::future::Future;
use std::time::Duration;

use log::warn;
use rand::Rng;

use crate::errors::{ErrorKind, SourceError};

/// Retry configuration for one service.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total invocation budget, including the first attempt.
    pub max_attempts: u32,
    /// Delay before the first re-attempt.
    pub base_delay: Duration,
    /// Upper bound on any computed delay.
    pub max_delay: Duration,
    /// Growth factor applied per attempt.
    pub backoff_multiplier: f64,
    /// Uniform noise applied to computed delays, as a fraction of the delay.
    pub jitter_fraction: f64,
    /// Failure kinds worth retrying; matched by variant, ignoring payloads.
    pub retryable_kinds: Vec<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_fraction: 0.25,
            retryable_kinds: vec![
                ErrorKind::Transient,
                ErrorKind::RateLimited { retry_after: None },
                ErrorKind::Network,
                ErrorKind::Timeout,
            ],
        }
    }
}

impl RetryPolicy {
    /// Whether a failure of this kind may be re-attempted under this policy.
    pub fn is_retryable(&self, kind: &ErrorKind) -> bool {
        self.retryable_kinds.iter().any(|k| k.same_class(kind))
    }

    /// Exponential delay for a 0-based attempt index, before jitter.
    fn raw_backoff(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        let delay = self.base_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    /// Delay for a 0-based attempt index, with jitter applied and floored
    /// at zero.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay = self.raw_backoff(attempt).as_secs_f64();
        let jitter_range = delay * self.jitter_fraction;
        let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
        Duration::from_secs_f64((delay + jitter).max(0.0))
    }

    /// Execute `op` under this policy.
    ///
    /// The operation receives the 0-based attempt index. On failure it is
    /// classified via [`SourceError::kind`]; non-retryable kinds and the
    /// final attempt re-raise immediately with no delay.
    pub async fn run<T, F, Fut>(&self, service: &str, mut op: F) -> Result<T, SourceError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let mut attempt = 0;
        loop {
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let retryable = err.kind().is_some_and(|k| self.is_retryable(k));
            let exhausted = attempt + 1 >= self.max_attempts;
            if !retryable || exhausted {
                warn!(
                    "Request to '{}' failed permanently on attempt {}/{}: {}",
                    service,
                    attempt + 1,
                    self.max_attempts,
                    err
                );
                return Err(err);
            }

            // Provider hint wins over backoff math.
            let delay = match err.retry_after() {
                Some(hint) => {
                    warn!(
                        "'{}' rate limited, honoring Retry-After of {:?} (attempt {}/{})",
                        service,
                        hint,
                        attempt + 1,
                        self.max_attempts
                    );
                    hint
                }
                None => {
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        "Request to '{}' failed, retrying in {:?} (attempt {}/{}): {}",
                        service,
                        delay,
                        attempt + 1,
                        self.max_attempts,
                        err
                    );
                    delay
                }
            };

            if delay > Duration::ZERO {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }
}
