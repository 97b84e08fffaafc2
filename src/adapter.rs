//! Adapter for the memory store's fact-verification capability.
//!
//! The persistent memory store lives outside this crate and consumes a
//! narrow surface: one admission call plus an enabled flag. This module
//! defines that surface and the facade binding it to the memory gate.

use async_trait::async_trait;
use std::sync::Arc;

use crate::gate::memory::{FactDecision, MemoryGate};

/// The capability the memory store consumes.
#[async_trait]
pub trait FactVerifier: Send + Sync {
    /// Decide whether a fact may be persisted, returning the admit
    /// flag, the confidence to store, and any non-fatal error.
    async fn verify_fact(&self, content: &str, evidence: &str, confidence: f64) -> FactDecision;

    /// Whether verification is active; a disabled verifier admits
    /// everything unchanged.
    fn enabled(&self) -> bool;
}

/// Facade exposing a [`MemoryGate`] as a [`FactVerifier`].
pub struct GateFactVerifier {
    gate: Arc<MemoryGate>,
}

impl GateFactVerifier {
    pub fn new(gate: Arc<MemoryGate>) -> Self {
        Self { gate }
    }

    pub fn gate(&self) -> &MemoryGate {
        &self.gate
    }
}

#[async_trait]
impl FactVerifier for GateFactVerifier {
    async fn verify_fact(&self, content: &str, evidence: &str, confidence: f64) -> FactDecision {
        self.gate.verify_fact(content, evidence, confidence).await
    }

    fn enabled(&self) -> bool {
        self.gate.enabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::detector::{Detector, NO_EVIDENCE_SENTINEL};
    use crate::gate::memory::MemoryGateConfig;
    use crate::types::Verdict;

    fn verifier(mock: MockBackend) -> GateFactVerifier {
        let detector = Arc::new(Detector::new(Arc::new(mock)));
        GateFactVerifier::new(Arc::new(MemoryGate::new(detector, MemoryGateConfig::default())))
    }

    #[tokio::test]
    async fn test_facade_delegates() {
        let mock = MockBackend::new(0.9).with_context_probability(NO_EVIDENCE_SENTINEL, 0.3);
        let verifier = verifier(mock);

        assert!(verifier.enabled());
        let decision = verifier
            .verify_fact("The limit is three retries", "retry limit: 3", 0.8)
            .await;
        assert!(decision.admit);
        assert_eq!(decision.verdict, Verdict::Grounded);
    }

    #[tokio::test]
    async fn test_facade_usable_as_trait_object() {
        let mock = MockBackend::new(0.9).with_context_probability(NO_EVIDENCE_SENTINEL, 0.3);
        let verifier: Arc<dyn FactVerifier> = Arc::new(verifier(mock));
        let decision = verifier.verify_fact("A fact to store", "evidence", 0.8).await;
        assert!(decision.admit);
    }

    #[tokio::test]
    async fn test_rejections_visible_through_gate() {
        let mock = MockBackend::new(0.05).with_context_probability(NO_EVIDENCE_SENTINEL, 0.5);
        let verifier = verifier(mock);
        let decision = verifier
            .verify_fact("The moon is made of basalt foam", "geology notes", 0.9)
            .await;
        assert!(!decision.admit);
        assert_eq!(verifier.gate().rejected_facts().len(), 1);
    }
}
