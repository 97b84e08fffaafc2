//! Error handling, retry, and the resilient backend composition.
//!
//! The resilient backend guarantees non-fatal degradation: a blocked or
//! failing backend yields a neutral or reduced probability, never an
//! error. Callers above this layer only see `Err` for configuration
//! mistakes.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, ErrorClass, Result};

use super::circuit::CircuitBreaker;
use super::VerifierBackend;

/// Probability returned when no estimate could be made.
pub const NEUTRAL_PROBABILITY: f64 = 0.5;

/// Configuration for the error handler and retry helper.
#[derive(Debug, Clone)]
pub struct ErrorHandlerConfig {
    /// Multiplier applied to the caller's confidence on degradation
    pub reduction_factor: f64,
    /// Mark rate-limited calls as queued for later replay
    pub queue_on_rate_limit: bool,
    /// Attempts per call, including the first
    pub max_attempts: u32,
    /// Fixed delay between attempts
    pub retry_delay: Duration,
}

impl Default for ErrorHandlerConfig {
    fn default() -> Self {
        Self {
            reduction_factor: 0.5,
            queue_on_rate_limit: false,
            max_attempts: 3,
            retry_delay: Duration::from_millis(100),
        }
    }
}

/// Per-class error counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct HandlerStats {
    pub timeouts: u64,
    pub rate_limited: u64,
    pub invalid_input: u64,
    pub generic: u64,
    pub queued: u64,
}

impl HandlerStats {
    pub fn total(&self) -> u64 {
        self.timeouts + self.rate_limited + self.invalid_input + self.generic
    }
}

/// Outcome of gracefully absorbing one error.
#[derive(Debug, Clone)]
pub struct Degradation {
    /// Confidence the caller should carry forward
    pub adjusted_confidence: f64,
    pub class: ErrorClass,
    /// Set for rate-limited calls when queuing is enabled
    pub queued: bool,
    /// The original failure, for the result's non-fatal error field
    pub reason: String,
}

/// Classifies errors and produces degraded confidences.
pub struct ErrorHandler {
    config: ErrorHandlerConfig,
    stats: Mutex<HandlerStats>,
}

impl ErrorHandler {
    pub fn new(config: ErrorHandlerConfig) -> Self {
        Self {
            config,
            stats: Mutex::new(HandlerStats::default()),
        }
    }

    /// Absorb an error: classify it, count it, and reduce the caller's
    /// confidence by the configured factor.
    pub fn handle(&self, error: &Error, confidence: f64) -> Degradation {
        let class = error.classify();
        let mut queued = false;
        {
            let mut stats = self.stats.lock().expect("handler lock");
            match class {
                ErrorClass::Timeout => stats.timeouts += 1,
                ErrorClass::RateLimited => {
                    stats.rate_limited += 1;
                    if self.config.queue_on_rate_limit {
                        stats.queued += 1;
                        queued = true;
                    }
                }
                ErrorClass::InvalidInput => stats.invalid_input += 1,
                ErrorClass::Generic => stats.generic += 1,
            }
        }
        Degradation {
            adjusted_confidence: (confidence * self.config.reduction_factor).clamp(0.0, 1.0),
            class,
            queued,
            reason: error.to_string(),
        }
    }

    pub fn stats(&self) -> HandlerStats {
        *self.stats.lock().expect("handler lock")
    }

    pub fn config(&self) -> &ErrorHandlerConfig {
        &self.config
    }
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self::new(ErrorHandlerConfig::default())
    }
}

/// Run `op` up to `max_attempts` times with a fixed delay between
/// attempts. InvalidInput is never retried. The delay is a suspension
/// point, so cancelling the surrounding future cancels the sleep.
pub async fn retry<T, F, Fut>(max_attempts: u32, delay: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts && e.is_retryable() => {
                debug!(attempt, error = %e, "retrying backend call");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Composes a circuit breaker, the retry helper, and the error handler
/// in front of a backend. Never returns an error from the estimate
/// paths.
pub struct ResilientBackend {
    inner: Arc<dyn VerifierBackend>,
    breaker: CircuitBreaker,
    handler: ErrorHandler,
    name: String,
}

impl ResilientBackend {
    pub fn new(
        inner: Arc<dyn VerifierBackend>,
        breaker: CircuitBreaker,
        handler: ErrorHandler,
    ) -> Self {
        let name = format!("resilient({})", inner.name());
        Self {
            inner,
            breaker,
            handler,
            name,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn handler(&self) -> &ErrorHandler {
        &self.handler
    }

    fn degraded(&self, error: &Error) -> f64 {
        let degradation = self.handler.handle(error, NEUTRAL_PROBABILITY);
        warn!(
            backend = %self.name,
            class = %degradation.class,
            error = %degradation.reason,
            "backend call degraded"
        );
        degradation.adjusted_confidence
    }
}

#[async_trait]
impl VerifierBackend for ResilientBackend {
    async fn estimate_probability(&self, claim: &str, context: &str) -> Result<f64> {
        if !self.breaker.allow() {
            debug!(backend = %self.name, "circuit open, returning neutral");
            return Ok(NEUTRAL_PROBABILITY);
        }

        let cfg = self.handler.config();
        let result = retry(cfg.max_attempts, cfg.retry_delay, || {
            self.inner.estimate_probability(claim, context)
        })
        .await;

        match result {
            Ok(probability) => {
                self.breaker.record_success();
                Ok(probability)
            }
            Err(e) => {
                self.breaker.record_failure();
                Ok(self.degraded(&e))
            }
        }
    }

    async fn batch_estimate(&self, claims: &[&str], context: &str) -> Result<Vec<f64>> {
        if !self.breaker.allow() {
            return Ok(vec![NEUTRAL_PROBABILITY; claims.len()]);
        }

        let cfg = self.handler.config();
        let result = retry(cfg.max_attempts, cfg.retry_delay, || {
            self.inner.batch_estimate(claims, context)
        })
        .await;

        match result {
            Ok(probabilities) => {
                self.breaker.record_success();
                Ok(probabilities)
            }
            Err(e) => {
                self.breaker.record_failure();
                Ok(vec![self.degraded(&e); claims.len()])
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::circuit::{BreakerState, CircuitBreakerConfig};
    use crate::backend::MockBackend;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_handler_reduces_confidence() {
        let handler = ErrorHandler::default();
        let deg = handler.handle(&Error::timeout(100), 0.9);
        assert!((deg.adjusted_confidence - 0.45).abs() < 1e-9);
        assert_eq!(deg.class, ErrorClass::Timeout);
        assert!(!deg.queued);
    }

    #[test]
    fn test_handler_queues_rate_limits() {
        let handler = ErrorHandler::new(ErrorHandlerConfig {
            queue_on_rate_limit: true,
            ..Default::default()
        });
        let deg = handler.handle(&Error::RateLimited("429".into()), 0.8);
        assert!(deg.queued);
        assert_eq!(handler.stats().queued, 1);
    }

    #[test]
    fn test_handler_counts_by_class() {
        let handler = ErrorHandler::default();
        handler.handle(&Error::timeout(10), 0.5);
        handler.handle(&Error::backend("x"), 0.5);
        handler.handle(&Error::backend("y"), 0.5);
        handler.handle(&Error::InvalidInput("z".into()), 0.5);
        let stats = handler.stats();
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.generic, 2);
        assert_eq!(stats.invalid_input, 1);
        assert_eq!(stats.total(), 4);
    }

    #[tokio::test]
    async fn test_retry_succeeds_eventually() {
        let attempts = AtomicU32::new(0);
        let result = retry(3, Duration::ZERO, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::backend("flaky"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let attempts = AtomicU32::new(0);
        let result: Result<()> = retry(2, Duration::ZERO, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::backend("always down")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_skips_invalid_input() {
        let attempts = AtomicU32::new(0);
        let result: Result<()> = retry(5, Duration::ZERO, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::InvalidInput("empty claim".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    fn no_retry_handler() -> ErrorHandler {
        ErrorHandler::new(ErrorHandlerConfig {
            max_attempts: 1,
            retry_delay: Duration::ZERO,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_resilient_passes_through() {
        let backend = ResilientBackend::new(
            Arc::new(MockBackend::new(0.8)),
            CircuitBreaker::default(),
            no_retry_handler(),
        );
        let p = backend.estimate_probability("c", "x").await.unwrap();
        assert_eq!(p, 0.8);
    }

    #[tokio::test]
    async fn test_resilient_degrades_on_error() {
        let mock = Arc::new(MockBackend::new(0.8));
        mock.fail("backend down");
        let backend =
            ResilientBackend::new(mock, CircuitBreaker::default(), no_retry_handler());

        let p = backend.estimate_probability("c", "x").await.unwrap();
        // Neutral 0.5 reduced by the default factor
        assert!((p - 0.25).abs() < 1e-9);
        assert_eq!(backend.handler().stats().generic, 1);
    }

    #[tokio::test]
    async fn test_resilient_blocked_returns_neutral() {
        let mock = Arc::new(MockBackend::new(0.8));
        mock.fail("down");
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            open_duration: Duration::from_secs(600),
            half_open_probes: 1,
        });
        let backend = ResilientBackend::new(mock.clone(), breaker, no_retry_handler());

        // First call fails and opens the breaker
        backend.estimate_probability("c", "x").await.unwrap();
        assert_eq!(backend.breaker().state(), BreakerState::Open);

        // Second call is blocked: exactly neutral, no backend call
        let calls_before = mock.calls();
        let p = backend.estimate_probability("c", "x").await.unwrap();
        assert_eq!(p, NEUTRAL_PROBABILITY);
        assert_eq!(mock.calls(), calls_before);
    }

    #[tokio::test]
    async fn test_resilient_recovers_through_probes() {
        let mock = Arc::new(MockBackend::new(0.7));
        mock.fail("down");
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            open_duration: Duration::ZERO,
            half_open_probes: 2,
        });
        let backend = ResilientBackend::new(mock.clone(), breaker, no_retry_handler());

        backend.estimate_probability("c", "x").await.unwrap(); // opens
        mock.succeed();
        let p = backend.estimate_probability("c", "x").await.unwrap(); // probe
        assert_eq!(p, 0.7);
        assert_eq!(backend.breaker().state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_resilient_batch_degrades_whole_batch() {
        let mock = Arc::new(MockBackend::new(0.8));
        mock.fail("down");
        let backend =
            ResilientBackend::new(mock, CircuitBreaker::default(), no_retry_handler());
        let probs = backend.batch_estimate(&["a", "b"], "x").await.unwrap();
        assert_eq!(probs.len(), 2);
        assert!(probs.iter().all(|p| (*p - 0.25).abs() < 1e-9));
    }
}
