//! Per-service circuit breaker and registry.
//!
//! Stops sending requests to an unhealthy provider, periodically probing
//! for recovery. Three states:
//!
//! - **Closed**: normal operation, calls pass through.
//! - **Open**: calls are rejected without a network attempt.
//! - **HalfOpen**: limited probe calls test whether the provider recovered.
//!
//! State is in-memory per breaker and resets on process restart. Each
//! breaker serializes its own state behind one lock; the registry lock is
//! only held while looking breakers up, never while mutating their state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

/// Circuit breaker state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CircuitState {
    /// Normal operation - calls are allowed.
    Closed,
    /// Provider is failing - calls are blocked.
    Open,
    /// Testing recovery - probe calls allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Clone, Debug)]
pub struct BreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// Time to wait after the last failure before probing recovery.
    pub recovery_timeout: Duration,
    /// Consecutive HalfOpen successes needed to close the circuit.
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 2,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    /// Consecutive successes; only meaningful in HalfOpen.
    success_count: u32,
    last_failure: Option<Instant>,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
        }
    }
}

/// Observability snapshot of one breaker.
#[derive(Clone, Debug)]
pub struct BreakerSnapshot {
    /// Service this breaker guards.
    pub service: String,
    /// Current circuit state.
    pub state: CircuitState,
    /// Consecutive failure count.
    pub failure_count: u32,
    /// Time of the last recorded failure.
    pub last_failure: Option<Instant>,
    /// Configured recovery timeout.
    pub recovery_timeout: Duration,
}

/// Failure-tracking state machine for one external service.
pub struct CircuitBreaker {
    service: String,
    config: BreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a breaker for one service.
    pub fn new(service: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            service: service.into(),
            config,
            inner: Mutex::new(BreakerState::new()),
        }
    }

    /// Service this breaker guards.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Lock the state, recovering from poison if necessary.
    ///
    /// Worst case after recovery is slightly stale circuit state, which
    /// beats panicking inside a fetch path.
    fn lock_state(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            warn!("Circuit breaker mutex for '{}' was poisoned, recovering", self.service);
            poisoned.into_inner()
        })
    }

    /// Whether a call may proceed right now.
    ///
    /// Open circuits lazily transition to HalfOpen once the recovery
    /// timeout has elapsed since the last failure; the call that observes
    /// the elapsed timeout becomes the first probe.
    pub fn is_allowed(&self) -> bool {
        let mut state = self.lock_state();

        match state.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let recovered = state
                    .last_failure
                    .is_some_and(|at| at.elapsed() >= self.config.recovery_timeout);
                if recovered {
                    info!(
                        "Circuit breaker: '{}' Open -> HalfOpen after recovery timeout",
                        self.service
                    );
                    state.state = CircuitState::HalfOpen;
                    state.success_count = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut state = self.lock_state();

        match state.state {
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                state.success_count += 1;
                debug!(
                    "Circuit breaker: success for '{}' in HalfOpen ({}/{})",
                    self.service, state.success_count, self.config.success_threshold
                );
                if state.success_count >= self.config.success_threshold {
                    info!(
                        "Circuit breaker: closing circuit for '{}' after {} probe successes",
                        self.service, state.success_count
                    );
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.success_count = 0;
                    state.last_failure = None;
                }
            }
            CircuitState::Open => {
                // is_allowed should have moved us to HalfOpen first.
                debug!(
                    "Circuit breaker: unexpected success for '{}' while Open",
                    self.service
                );
            }
        }
    }

    /// Record a failed call.
    ///
    /// Callers only invoke this for failures whose kind counts against
    /// the breaker; unrelated failures propagate without touching state.
    pub fn record_failure(&self) {
        let mut state = self.lock_state();

        state.failure_count += 1;
        state.last_failure = Some(Instant::now());
        state.success_count = 0;

        match state.state {
            CircuitState::Closed => {
                if state.failure_count >= self.config.failure_threshold {
                    warn!(
                        "Circuit breaker: opening circuit for '{}' after {} failures",
                        self.service, state.failure_count
                    );
                    state.state = CircuitState::Open;
                } else {
                    debug!(
                        "Circuit breaker: failure for '{}' ({}/{})",
                        self.service, state.failure_count, self.config.failure_threshold
                    );
                }
            }
            CircuitState::HalfOpen => {
                // Any probe failure reopens and restarts the recovery clock.
                warn!(
                    "Circuit breaker: reopening circuit for '{}' after HalfOpen failure",
                    self.service
                );
                state.state = CircuitState::Open;
            }
            CircuitState::Open => {}
        }
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.lock_state().state
    }

    /// Current consecutive failure count.
    pub fn failure_count(&self) -> u32 {
        self.lock_state().failure_count
    }

    /// Manually reset the breaker to Closed.
    pub fn reset(&self) {
        let mut state = self.lock_state();
        info!("Circuit breaker: manually resetting circuit for '{}'", self.service);
        *state = BreakerState::new();
    }

    /// Observability snapshot.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = self.lock_state();
        BreakerSnapshot {
            service: self.service.clone(),
            state: state.state,
            failure_count: state.failure_count,
            last_failure: state.last_failure,
            recovery_timeout: self.config.recovery_timeout,
        }
    }
}

/// Registry of circuit breakers, one per external service.
///
/// Breakers are created lazily on first use and live for the process
/// lifetime.
#[derive(Default)]
pub struct CircuitBreakerRegistry {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_breakers(&self) -> MutexGuard<'_, HashMap<String, Arc<CircuitBreaker>>> {
        self.breakers.lock().unwrap_or_else(|poisoned| {
            warn!("Circuit breaker registry mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Get the breaker for a service, creating it on first use.
    ///
    /// Idempotent under concurrent first use: the registry lock makes one
    /// caller the creator, everyone else gets the same instance. `config`
    /// only applies on creation.
    pub fn get_or_create(&self, service: &str, config: BreakerConfig) -> Arc<CircuitBreaker> {
        let mut breakers = self.lock_breakers();
        Arc::clone(
            breakers
                .entry(service.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(service, config))),
        )
    }

    /// Get the breaker for a service, if one exists.
    pub fn get(&self, service: &str) -> Option<Arc<CircuitBreaker>> {
        self.lock_breakers().get(service).cloned()
    }

    /// Reset every breaker to Closed.
    pub fn reset_all(&self) {
        let breakers = self.lock_breakers();
        for breaker in breakers.values() {
            breaker.reset();
        }
    }

    /// Snapshots of every tracked breaker.
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        self.lock_breakers().values().map(|b| b.snapshot()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32, recovery_ms: u64, successes: u32) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: threshold,
            recovery_timeout: Duration::from_millis(recovery_ms),
            success_threshold: successes,
        }
    }

    #[test]
    fn test_starts_closed() {
        let cb = CircuitBreaker::new("pricecharting", BreakerConfig::default());
        assert!(cb.is_allowed());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_opens_after_threshold() {
        let cb = CircuitBreaker::new("failing", config(3, 60_000, 2));

        cb.record_failure();
        cb.record_failure();
        assert!(cb.is_allowed());
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert!(!cb.is_allowed());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_success_resets_failure_count_while_closed() {
        let cb = CircuitBreaker::new("intermittent", config(3, 60_000, 2));

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.failure_count(), 2);

        cb.record_success();
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn test_open_transitions_to_half_open_after_recovery() {
        let cb = CircuitBreaker::new("recovering", config(1, 10, 1));

        cb.record_failure();
        assert!(!cb.is_allowed());
        assert_eq!(cb.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(20));

        assert!(cb.is_allowed());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_closes_after_success_threshold() {
        let cb = CircuitBreaker::new("healing", config(1, 10, 2));

        cb.record_failure();
        std::thread::sleep(Duration::from_millis(20));
        assert!(cb.is_allowed());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let cb = CircuitBreaker::new("relapsing", config(1, 10, 2));

        cb.record_failure();
        std::thread::sleep(Duration::from_millis(20));
        assert!(cb.is_allowed());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        // Recovery clock restarted: still blocked immediately after.
        assert!(!cb.is_allowed());
    }

    #[test]
    fn test_never_open_to_closed_directly() {
        let cb = CircuitBreaker::new("strict", config(1, 10, 1));

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(20));
        // Permit check must pass through HalfOpen before any close.
        assert!(cb.is_allowed());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_manual_reset() {
        let cb = CircuitBreaker::new("reset", config(1, 60_000, 2));
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn test_snapshot() {
        let cb = CircuitBreaker::new("snap", config(5, 60_000, 2));
        cb.record_failure();
        cb.record_failure();

        let snap = cb.snapshot();
        assert_eq!(snap.service, "snap");
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.failure_count, 2);
        assert!(snap.last_failure.is_some());
        assert_eq!(snap.recovery_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_registry_get_or_create_is_idempotent() {
        let registry = CircuitBreakerRegistry::new();
        let a = registry.get_or_create("justtcg", BreakerConfig::default());
        let b = registry.get_or_create("justtcg", config(1, 10, 1));
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_registry_isolates_services() {
        let registry = CircuitBreakerRegistry::new();
        let a = registry.get_or_create("service_a", config(1, 60_000, 1));
        let b = registry.get_or_create("service_b", config(1, 60_000, 1));

        a.record_failure();
        assert!(!a.is_allowed());
        assert!(b.is_allowed());
    }

    #[test]
    fn test_registry_snapshots() {
        let registry = CircuitBreakerRegistry::new();
        registry
            .get_or_create("a", BreakerConfig::default())
            .record_failure();
        registry.get_or_create("b", BreakerConfig::default());

        let snaps = registry.snapshots();
        assert_eq!(snaps.len(), 2);
        let a = snaps.iter().find(|s| s.service == "a").unwrap();
        assert_eq!(a.failure_count, 1);
    }

    #[test]
    fn test_concurrent_first_use_yields_one_breaker() {
        let registry = Arc::new(CircuitBreakerRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.get_or_create("shared", BreakerConfig::default()))
            })
            .collect();

        let breakers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for breaker in &breakers[1..] {
            assert!(Arc::ptr_eq(&breakers[0], breaker));
        }
    }
}
