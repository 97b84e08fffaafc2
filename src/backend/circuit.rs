//! Three-state circuit breaker for backend calls.
//!
//! Closed passes everything through and counts consecutive failures.
//! At the failure threshold the breaker opens and blocks calls until
//! the open duration elapses, then admits a bounded number of probe
//! calls (HalfOpen). Enough probe successes close it again; any probe
//! failure re-opens it.

use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Thresholds and timers.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in Closed that open the breaker
    pub failure_threshold: u32,
    /// Successes in HalfOpen that close it
    pub success_threshold: u32,
    /// How long the breaker stays Open before probing
    pub open_duration: Duration,
    /// Calls admitted while HalfOpen
    pub half_open_probes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_duration: Duration::from_secs(30),
            half_open_probes: 3,
        }
    }
}

struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    half_open_successes: u32,
    probes_used: u32,
    opened_at: Option<Instant>,
}

/// All operations are O(1) under a single exclusive guard.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                probes_used: 0,
                opened_at: None,
            }),
        }
    }

    /// Whether a call may proceed. The first allowed call after the
    /// open duration elapses transitions the breaker to HalfOpen and
    /// counts as its first probe.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker lock");
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed() >= self.config.open_duration)
                    .unwrap_or(true);
                if !elapsed {
                    return false;
                }
                debug!("circuit breaker half-open, probing");
                inner.state = BreakerState::HalfOpen;
                inner.half_open_successes = 0;
                inner.probes_used = 1;
                true
            }
            BreakerState::HalfOpen => {
                if inner.probes_used < self.config.half_open_probes {
                    inner.probes_used += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock");
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    debug!(
                        failures = inner.consecutive_failures,
                        "circuit breaker opened"
                    );
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::HalfOpen => {
                debug!("probe failed, circuit breaker re-opened");
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.consecutive_failures = 0;
            }
            BreakerState::Open => {
                inner.consecutive_failures += 1;
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock");
        inner.consecutive_failures = 0;
        if inner.state == BreakerState::HalfOpen {
            inner.half_open_successes += 1;
            if inner.half_open_successes >= self.config.success_threshold {
                debug!("circuit breaker closed");
                inner.state = BreakerState::Closed;
                inner.probes_used = 0;
                inner.half_open_successes = 0;
                inner.opened_at = None;
            }
        }
    }

    /// Current state, for observability.
    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("breaker lock").state
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failures: u32, successes: u32, open: Duration) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: failures,
            success_threshold: successes,
            open_duration: open,
            half_open_probes: 3,
        })
    }

    #[test]
    fn test_closed_allows() {
        let cb = CircuitBreaker::default();
        assert!(cb.allow());
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn test_opens_at_threshold() {
        let cb = breaker(3, 2, Duration::from_secs(60));
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(!cb.allow());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let cb = breaker(3, 2, Duration::from_secs(60));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_after_timer() {
        let cb = breaker(1, 1, Duration::ZERO);
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Open);
        // Zero open duration: the next allow() probes immediately
        assert!(cb.allow());
        assert_eq!(cb.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn test_half_open_probe_budget() {
        let cb = breaker(1, 5, Duration::ZERO);
        cb.record_failure();
        assert!(cb.allow()); // transition + probe 1
        assert!(cb.allow()); // probe 2
        assert!(cb.allow()); // probe 3
        assert!(!cb.allow()); // budget exhausted
    }

    #[test]
    fn test_closes_after_successes() {
        let cb = breaker(1, 2, Duration::ZERO);
        cb.record_failure();
        assert!(cb.allow());
        cb.record_success();
        assert_eq!(cb.state(), BreakerState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), BreakerState::Closed);
        assert!(cb.allow());
    }

    #[test]
    fn test_probe_failure_reopens() {
        let cb = breaker(1, 2, Duration::ZERO);
        cb.record_failure();
        assert!(cb.allow());
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Open);
    }

    #[test]
    fn test_reopen_restarts_probe_budget() {
        let cb = breaker(1, 5, Duration::ZERO);
        cb.record_failure();
        assert!(cb.allow());
        cb.record_failure(); // re-open
        assert!(cb.allow()); // timer elapsed again (zero duration)
        assert_eq!(cb.state(), BreakerState::HalfOpen);
    }
}
