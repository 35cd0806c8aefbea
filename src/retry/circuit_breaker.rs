//! Per-service circuit breaker.
//!
//! States: `Closed -> Open -> HalfOpen -> Closed/Open`. The breaker opens
//! once a minimum request window shows a failure rate at or above the
//! threshold, rejects until the open timeout elapses, then admits a bounded
//! number of probes; probe failures reopen, a full run of probe successes
//! closes and resets the counters.

use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

/// Breaker state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests flow normally.
    Closed,
    /// Requests are rejected outright.
    Open,
    /// A limited number of probe requests test recovery.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => f.write_str("Closed"),
            CircuitState::Open => f.write_str("Open"),
            CircuitState::HalfOpen => f.write_str("HalfOpen"),
        }
    }
}

/// Breaker tuning parameters.
#[derive(Clone, Copy, Debug)]
pub struct BreakerConfig {
    /// Failure rate in `[0,1]` that opens the circuit.
    pub failure_threshold: f64,
    /// Minimum requests in the window before the threshold is evaluated.
    pub min_requests: u32,
    /// How long the circuit stays open before probing.
    pub open_timeout: Duration,
    /// Probe budget in the half-open state.
    pub half_open_max_probes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        BreakerConfig {
            failure_threshold: 0.5,
            min_requests: 10,
            open_timeout: Duration::from_secs(30),
            half_open_max_probes: 3,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    successes: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
}

/// Circuit breaker guarding one service type.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: Mutex<BreakerState>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        CircuitBreaker::new(BreakerConfig::default())
    }
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        CircuitBreaker {
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                consecutive_successes: 0,
                opened_at: None,
            }),
        }
    }

    /// Whether a request should be allowed through right now. An open
    /// circuit whose timeout has elapsed moves to half-open and admits the
    /// caller as the first probe.
    pub fn should_allow(&self) -> bool {
        let mut inner = self.state.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.open_timeout)
                    .unwrap_or(true);
                if elapsed {
                    inner.state = CircuitState::HalfOpen;
                    inner.consecutive_successes = 0;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                inner.consecutive_successes < self.config.half_open_max_probes
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.state.lock();
        inner.successes += 1;
        match inner.state {
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.half_open_max_probes {
                    inner.state = CircuitState::Closed;
                    inner.failures = 0;
                    inner.successes = 0;
                    inner.consecutive_successes = 0;
                    inner.opened_at = None;
                }
            }
            CircuitState::Closed => {
                // Stale-window guard: reset counters once the window doubles
                // past the evaluation minimum.
                if inner.failures + inner.successes >= self.config.min_requests * 2 {
                    inner.failures = 0;
                    inner.successes = 0;
                    inner.consecutive_successes = 0;
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.state.lock();
        inner.failures += 1;
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.consecutive_successes = 0;
            }
            CircuitState::Closed => {
                let total = inner.failures + inner.successes;
                if total >= self.config.min_requests {
                    let failure_rate = f64::from(inner.failures) / f64::from(total);
                    if failure_rate >= self.config.failure_threshold {
                        inner.state = CircuitState::Open;
                        inner.opened_at = Some(Instant::now());
                    }
                }
            }
            CircuitState::Open => {}
        }
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// (failures, successes, state) snapshot.
    #[must_use]
    pub fn stats(&self) -> (u32, u32, CircuitState) {
        let inner = self.state.lock();
        (inner.failures, inner.successes, inner.state)
    }
}

/// Breakers keyed by node type, created lazily with a shared config.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: RwLock<FxHashMap<String, std::sync::Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        BreakerRegistry {
            config,
            breakers: RwLock::new(FxHashMap::default()),
        }
    }

    /// The breaker for a service type, created on first use.
    pub fn breaker(&self, service_type: &str) -> std::sync::Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(service_type) {
            return breaker.clone();
        }
        let mut breakers = self.breakers.write();
        breakers
            .entry(service_type.to_string())
            .or_insert_with(|| std::sync::Arc::new(CircuitBreaker::new(self.config)))
            .clone()
    }

    pub fn should_allow(&self, service_type: &str) -> bool {
        self.breaker(service_type).should_allow()
    }

    pub fn record_success(&self, service_type: &str) {
        self.breaker(service_type).record_success();
    }

    pub fn record_failure(&self, service_type: &str) {
        self.breaker(service_type).record_failure();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_closed_below_min_requests() {
        let breaker = CircuitBreaker::default();
        for _ in 0..9 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.should_allow());
    }

    #[test]
    fn opens_at_threshold() {
        let breaker = CircuitBreaker::default();
        for _ in 0..5 {
            breaker.record_success();
        }
        for _ in 0..5 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.should_allow());
    }

    #[test]
    fn probes_after_open_timeout() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            open_timeout: Duration::from_millis(20),
            ..BreakerConfig::default()
        });
        for _ in 0..10 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(30));
        assert!(breaker.should_allow());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            open_timeout: Duration::from_millis(1),
            ..BreakerConfig::default()
        });
        for _ in 0..10 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(5));
        assert!(breaker.should_allow());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn half_open_successes_close() {
        let breaker = CircuitBreaker::new(BreakerConfig {
            open_timeout: Duration::from_millis(1),
            ..BreakerConfig::default()
        });
        for _ in 0..10 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(5));
        assert!(breaker.should_allow());
        breaker.record_success();
        breaker.record_success();
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        let (failures, successes, _) = breaker.stats();
        assert_eq!((failures, successes), (0, 0));
    }

    #[test]
    fn registry_is_per_service() {
        let registry = BreakerRegistry::default();
        for _ in 0..10 {
            registry.record_failure("researcher");
        }
        assert!(!registry.should_allow("researcher"));
        assert!(registry.should_allow("critic"));
    }
}
