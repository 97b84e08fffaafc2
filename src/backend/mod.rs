//! Probability-estimation backends and their resilience wrappers.
//!
//! The core consumes one capability: given a claim and a context,
//! estimate the probability that the claim is true. Concrete backends
//! bind that capability to a completer; wrappers add caching, retry,
//! circuit breaking, and graceful degradation without changing the
//! trait surface.

pub mod cache;
pub mod circuit;
pub mod mock;
pub mod resilience;
pub mod self_verify;

use async_trait::async_trait;

use crate::error::Result;

pub use cache::{CacheStats, CachingBackend, CachingConfig};
pub use circuit::{BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use mock::MockBackend;
pub use resilience::{ErrorHandler, ErrorHandlerConfig, HandlerStats, ResilientBackend};
pub use self_verify::{SelfVerifyBackend, SelfVerifyConfig, SmallModelBackend};

/// A probability-estimation backend.
#[async_trait]
pub trait VerifierBackend: Send + Sync {
    /// Estimate P(claim is true | context), in [0, 1].
    async fn estimate_probability(&self, claim: &str, context: &str) -> Result<f64>;

    /// Estimate several claims against the same context. The default
    /// implementation runs serially; wrappers and batching-capable
    /// backends override it.
    async fn batch_estimate(&self, claims: &[&str], context: &str) -> Result<Vec<f64>> {
        let mut probabilities = Vec::with_capacity(claims.len());
        for claim in claims {
            probabilities.push(self.estimate_probability(claim, context).await?);
        }
        Ok(probabilities)
    }

    /// Human-readable backend name for logs and events.
    fn name(&self) -> &str;
}
