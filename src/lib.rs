//! # epistemic-core
//!
//! Information-theoretic hallucination detection and gating for
//! LLM-driven agents.
//!
//! A generative model can state things its evidence does not support,
//! and later recall and reuse them. This crate quantifies that failure
//! mode instead of guessing at it: for each claim it estimates the
//! probability the claim holds *with* its evidence (P1) and with the
//! evidence scrubbed away (P0), converts the pair into information
//! gained (Bernoulli KL, in bits), and compares that against the bits
//! the claim's stated confidence requires. The difference is the
//! budget gap; the gap classifies into one of four verdicts:
//! Grounded, Unsupported, Contradicted, Unverifiable.
//!
//! Three gates consume the verdicts:
//!
//! - [`MemoryGate`](gate::MemoryGate) decides whether facts may enter
//!   persistent memory. It is the only component that hard-rejects.
//! - [`OutputVerifier`](gate::OutputVerifier) checks generated
//!   responses and warns; it never blocks.
//! - [`TraceAuditor`](gate::TraceAuditor) grades reasoning traces and
//!   checks that the final answer is derivable from its steps.
//!
//! Probability estimates come from a [`VerifierBackend`]: typically the
//! generating model asked a YES/NO question about its own claim
//! ([`SelfVerifyBackend`](backend::SelfVerifyBackend)), wrapped in a
//! cache, a circuit breaker, and graceful-degradation handling so that
//! backend trouble reduces confidence instead of raising errors.
//!
//! ## Example
//!
//! ```rust,ignore
//! use epistemic_core::{
//!     backend::{CachingBackend, CachingConfig, SelfVerifyBackend, SelfVerifyConfig},
//!     gate::{MemoryGate, MemoryGateConfig},
//!     Detector,
//! };
//! use std::sync::Arc;
//!
//! let backend = Arc::new(CachingBackend::new(
//!     Arc::new(SelfVerifyBackend::new(completer, SelfVerifyConfig::default())),
//!     CachingConfig::default(),
//! ));
//! let detector = Arc::new(Detector::new(backend));
//! let gate = MemoryGate::new(detector, MemoryGateConfig::default());
//!
//! let decision = gate
//!     .verify_fact("The sky is green", "The sky is blue", 0.9)
//!     .await;
//! assert!(!decision.admit);
//! ```

pub mod adapter;
pub mod backend;
pub mod budget;
pub mod completer;
pub mod detector;
pub mod error;
pub mod events;
pub mod extractor;
pub mod gate;
pub mod metrics;
pub mod scrubber;
pub mod types;

#[cfg(test)]
mod proptest;

// Re-exports for convenience
pub use adapter::{FactVerifier, GateFactVerifier};
pub use backend::{
    BreakerState, CacheStats, CachingBackend, CachingConfig, CircuitBreaker,
    CircuitBreakerConfig, ErrorHandler, ErrorHandlerConfig, HandlerStats, MockBackend,
    ResilientBackend, SelfVerifyBackend, SelfVerifyConfig, SmallModelBackend, VerifierBackend,
};
pub use budget::{
    compute_budget, compute_budget_interval, kl_bits, severity, trust_from_gap, BudgetInterval,
};
pub use completer::{Completer, ScriptedCompleter};
pub use detector::{
    classify_step, quick_risk_screen, Detector, DetectorConfig, NO_EVIDENCE_SENTINEL,
    NO_PRIOR_CONTEXT,
};
pub use error::{Error, ErrorClass, Result};
pub use events::{DecisionEvent, EventKind, EventSink, TracingSink, VecSink};
pub use extractor::{split_sentences, ClaimExtractor};
pub use gate::{
    CorrectionHint, FactDecision, FlaggedClaim, GateStats, MemoryGate, MemoryGateConfig,
    OutputCheck, OutputVerifier, OutputVerifierConfig, RejectedFact, TraceAuditor,
    TraceAuditorConfig,
};
pub use metrics::{
    Counter, Gauge, Histogram, HistogramSnapshot, InMemoryRegistry, MetricsRegistry,
    NoopRegistry,
};
pub use scrubber::{
    EvidenceScrubber, EvidenceSpan, ScrubConfig, ScrubResult, EVIDENCE_MARKER,
};
pub use types::{
    BudgetResult, Citation, Claim, PostHocCheck, StepStatus, StepVerification, TraceAudit,
    TraceStep, TraceVerdict, Verdict, VerificationReport, VerificationResult, VerificationStats,
};
