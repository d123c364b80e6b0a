//! Per-service sliding-window rate limiter.
//!
//! Tracks the instants of past requests and admits a new request only
//! when the trailing 60-second (and optional 3600-second) count is below
//! quota. `acquire` never rejects; it suspends the caller until a slot
//! exists. Each service owns one limiter with its own lock, so unrelated
//! services never serialize against each other.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use log::debug;
use tokio::sync::Mutex;

/// Trailing window for the per-minute quota.
const MINUTE_WINDOW: Duration = Duration::from_secs(60);

/// Trailing window for the optional per-hour quota.
const HOUR_WINDOW: Duration = Duration::from_secs(3600);

/// Rate limit quotas for one service.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    /// Maximum requests in any trailing 60-second window.
    pub requests_per_minute: u32,
    /// Maximum requests in any trailing 3600-second window, if the
    /// provider enforces one.
    pub requests_per_hour: Option<u32>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            requests_per_hour: None,
        }
    }
}

/// Ordered instants of past requests for one service.
#[derive(Debug, Default)]
struct RequestWindow {
    minute: VecDeque<Instant>,
    hour: VecDeque<Instant>,
}

impl RequestWindow {
    fn prune(&mut self, now: Instant, track_hour: bool) {
        while self
            .minute
            .front()
            .is_some_and(|t| now.duration_since(*t) >= MINUTE_WINDOW)
        {
            self.minute.pop_front();
        }
        if track_hour {
            while self
                .hour
                .front()
                .is_some_and(|t| now.duration_since(*t) >= HOUR_WINDOW)
            {
                self.hour.pop_front();
            }
        }
    }
}

/// Time until a slot opens, or `None` if one is free now.
fn next_slot_delay(window: &RequestWindow, now: Instant, config: &RateLimitConfig) -> Option<Duration> {
    if window.minute.len() >= config.requests_per_minute as usize {
        let oldest = *window.minute.front()?;
        return Some(MINUTE_WINDOW.saturating_sub(now.duration_since(oldest)));
    }
    if let Some(per_hour) = config.requests_per_hour {
        if window.hour.len() >= per_hour as usize {
            let oldest = *window.hour.front()?;
            return Some(HOUR_WINDOW.saturating_sub(now.duration_since(oldest)));
        }
    }
    None
}

/// Sliding-window rate limiter for a single service.
///
/// The window is guarded by an async mutex held across the wait, so two
/// concurrent `acquire` calls can never both conclude the same slot is
/// free.
pub struct RateLimiter {
    service: String,
    config: RateLimitConfig,
    window: Mutex<RequestWindow>,
}

impl RateLimiter {
    /// Create a limiter for one service.
    pub fn new(service: impl Into<String>, config: RateLimitConfig) -> Self {
        Self {
            service: service.into(),
            config,
            window: Mutex::new(RequestWindow::default()),
        }
    }

    /// Wait until a request slot is available, then claim it.
    ///
    /// Loops: prune expired instants, compute the exact wait until the
    /// oldest tracked request exits its window, sleep, re-evaluate. The
    /// new instant is recorded only after every quota check passes.
    pub async fn acquire(&self) {
        let track_hour = self.config.requests_per_hour.is_some();
        let mut window = self.window.lock().await;

        loop {
            let now = Instant::now();
            window.prune(now, track_hour);

            match next_slot_delay(&window, now, &self.config) {
                Some(wait) if wait > Duration::ZERO => {
                    debug!(
                        "Rate limit reached for '{}', waiting {:?} ({} in window)",
                        self.service,
                        wait,
                        window.minute.len()
                    );
                    tokio::time::sleep(wait).await;
                }
                Some(_) => {
                    // Oldest entry just expired; re-prune and re-check.
                    continue;
                }
                None => {
                    window.minute.push_back(now);
                    if track_hour {
                        window.hour.push_back(now);
                    }
                    return;
                }
            }
        }
    }

    /// Requests currently tracked in the trailing minute window.
    pub async fn in_flight_minute(&self) -> usize {
        let track_hour = self.config.requests_per_hour.is_some();
        let mut window = self.window.lock().await;
        window.prune(Instant::now(), track_hour);
        window.minute.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backdated(by: Duration) -> Instant {
        Instant::now() - by
    }

    #[test]
    fn test_slot_free_under_quota() {
        let config = RateLimitConfig {
            requests_per_minute: 3,
            requests_per_hour: None,
        };
        let mut window = RequestWindow::default();
        window.minute.push_back(backdated(Duration::from_secs(1)));
        window.minute.push_back(backdated(Duration::from_secs(2)));

        assert_eq!(next_slot_delay(&window, Instant::now(), &config), None);
    }

    #[test]
    fn test_delay_until_oldest_exits_window() {
        let config = RateLimitConfig {
            requests_per_minute: 2,
            requests_per_hour: None,
        };
        let mut window = RequestWindow::default();
        window.minute.push_back(backdated(Duration::from_secs(20)));
        window.minute.push_back(backdated(Duration::from_secs(5)));

        let wait = next_slot_delay(&window, Instant::now(), &config).unwrap();
        // Oldest entry exits the 60s window after ~40 more seconds.
        assert!(wait > Duration::from_secs(39));
        assert!(wait <= Duration::from_secs(40));
    }

    #[test]
    fn test_hour_quota_checked_after_minute_quota() {
        let config = RateLimitConfig {
            requests_per_minute: 10,
            requests_per_hour: Some(2),
        };
        let mut window = RequestWindow::default();
        window.hour.push_back(backdated(Duration::from_secs(3000)));
        window.hour.push_back(backdated(Duration::from_secs(100)));

        let wait = next_slot_delay(&window, Instant::now(), &config).unwrap();
        // Oldest hourly entry exits after ~600 more seconds.
        assert!(wait > Duration::from_secs(599));
        assert!(wait <= Duration::from_secs(600));
    }

    #[test]
    fn test_prune_drops_expired_entries() {
        let mut window = RequestWindow::default();
        window.minute.push_back(backdated(Duration::from_secs(61)));
        window.minute.push_back(backdated(Duration::from_secs(1)));
        window.prune(Instant::now(), false);
        assert_eq!(window.minute.len(), 1);
    }

    #[tokio::test]
    async fn test_acquire_immediate_under_quota() {
        let limiter = RateLimiter::new(
            "fast",
            RateLimitConfig {
                requests_per_minute: 5,
                requests_per_hour: None,
            },
        );

        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(limiter.in_flight_minute().await, 5);
    }

    #[tokio::test]
    async fn test_acquire_over_quota_waits_for_oldest_exit() {
        let limiter = RateLimiter::new(
            "slow",
            RateLimitConfig {
                requests_per_minute: 3,
                requests_per_hour: None,
            },
        );
        for _ in 0..3 {
            limiter.acquire().await;
        }

        // Backdate the tracked requests so the oldest exits in ~50ms.
        {
            let mut window = limiter.window.lock().await;
            let shift = Duration::from_secs(60) - Duration::from_millis(50);
            for slot in window.minute.iter_mut() {
                *slot -= shift;
            }
        }

        let start = Instant::now();
        limiter.acquire().await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(40), "waited {elapsed:?}");
    }

    #[tokio::test]
    async fn test_concurrent_acquires_serialize() {
        use std::sync::Arc;

        let limiter = Arc::new(RateLimiter::new(
            "shared",
            RateLimitConfig {
                requests_per_minute: 100,
                requests_per_hour: None,
            },
        ));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move { limiter.acquire().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        // Every acquire recorded exactly one instant.
        assert_eq!(limiter.in_flight_minute().await, 10);
    }
}
