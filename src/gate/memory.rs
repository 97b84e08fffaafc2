//! Memory admission gate.
//!
//! Decides whether a fact may be persisted to the agent's memory store.
//! This is the only gate permitted to hard-reject. Every rejection is
//! recorded in a bounded ring buffer so callers can inspect what was
//! kept out and why.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::detector::Detector;
use crate::events::{DecisionEvent, EventSink, TracingSink};
use crate::metrics::{MetricsRegistry, NoopRegistry};
use crate::types::{Claim, Verdict};

/// Evidence is truncated to this many characters in rejection records.
const REJECTED_EVIDENCE_CAP: usize = 200;

/// Memory-gate policy knobs.
#[derive(Debug, Clone)]
pub struct MemoryGateConfig {
    /// Master switch; a disabled gate admits everything unchanged
    pub enabled: bool,
    /// Reject unsupported facts whose gap exceeds the flag threshold
    pub reject_unsupported: bool,
    /// Gap above which an unsupported fact is rejected
    pub flag_threshold: f64,
    /// Admitted facts below this confidence are flipped to reject
    pub min_confidence: f64,
    /// Admit with reduced confidence when verification itself fails
    pub graceful_degrade: bool,
    /// Confidence multiplier for degraded admissions
    pub reduction_factor: f64,
    /// Capacity of the rejected-facts ring buffer
    pub rejected_capacity: usize,
}

impl Default for MemoryGateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reject_unsupported: true,
            flag_threshold: 0.5,
            min_confidence: 0.1,
            graceful_degrade: true,
            reduction_factor: 0.5,
            rejected_capacity: 100,
        }
    }
}

impl MemoryGateConfig {
    /// Reject anything that is not clearly grounded.
    pub fn strict() -> Self {
        Self {
            reject_unsupported: true,
            flag_threshold: 0.3,
            min_confidence: 0.3,
            graceful_degrade: false,
            ..Default::default()
        }
    }

    /// Only reject contradictions.
    pub fn permissive() -> Self {
        Self {
            reject_unsupported: false,
            flag_threshold: 1.0,
            min_confidence: 0.0,
            graceful_degrade: true,
            ..Default::default()
        }
    }
}

/// Admission decision for one fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactDecision {
    pub admit: bool,
    /// Confidence the store should persist; 0 on rejection
    pub adjusted_confidence: f64,
    pub verdict: Verdict,
    pub gap: f64,
    /// Why the gate decided as it did
    pub reason: String,
    /// Non-fatal verification error, if any
    pub error: Option<String>,
}

/// A fact the gate kept out of memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedFact {
    pub content: String,
    /// Evidence, truncated for the record
    pub evidence: String,
    pub reason: String,
    pub verdict: Verdict,
    pub gap: f64,
    pub p0: f64,
    pub p1: f64,
    pub prior_confidence: f64,
    pub rejected_at: DateTime<Utc>,
}

/// Admission counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GateStats {
    pub evaluated: u64,
    pub admitted: u64,
    pub rejected: u64,
    /// Admissions that went through graceful degradation
    pub degraded: u64,
}

impl GateStats {
    pub fn rejection_rate(&self) -> f64 {
        if self.evaluated == 0 {
            0.0
        } else {
            self.rejected as f64 / self.evaluated as f64
        }
    }
}

/// Gate deciding which facts enter persistent memory.
pub struct MemoryGate {
    detector: Option<Arc<Detector>>,
    config: MemoryGateConfig,
    rejected: Mutex<VecDeque<RejectedFact>>,
    stats: Mutex<GateStats>,
    registry: Arc<dyn MetricsRegistry>,
    sink: Arc<dyn EventSink>,
}

impl MemoryGate {
    pub fn new(detector: Arc<Detector>, config: MemoryGateConfig) -> Self {
        Self {
            detector: Some(detector),
            config,
            rejected: Mutex::new(VecDeque::new()),
            stats: Mutex::new(GateStats::default()),
            registry: Arc::new(NoopRegistry),
            sink: Arc::new(TracingSink),
        }
    }

    /// A gate with no detector admits everything unchanged.
    pub fn detached(config: MemoryGateConfig) -> Self {
        Self {
            detector: None,
            config,
            rejected: Mutex::new(VecDeque::new()),
            stats: Mutex::new(GateStats::default()),
            registry: Arc::new(NoopRegistry),
            sink: Arc::new(TracingSink),
        }
    }

    pub fn with_registry(mut self, registry: Arc<dyn MetricsRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Decide whether a fact may be stored.
    pub async fn verify_fact(
        &self,
        content: &str,
        evidence: &str,
        confidence: f64,
    ) -> FactDecision {
        if !self.config.enabled || self.detector.is_none() {
            return self.admit(
                content,
                confidence,
                Verdict::Unverifiable,
                0.0,
                "gate disabled, admitted unchanged",
                None,
            );
        }
        let detector = self.detector.as_ref().expect("detector checked above");

        let claim = Claim::new(content, "memory").with_confidence(confidence);
        let result = detector.verify_claim_with_evidence(&claim, evidence).await;
        let budget = &result.budget;

        // Verification itself failed: degrade or refuse
        if let Some(reason) = &result.error {
            return if self.config.graceful_degrade {
                let adjusted = (confidence * self.config.reduction_factor).clamp(0.0, 1.0);
                self.note_degraded();
                self.admit(
                    content,
                    adjusted,
                    Verdict::Unverifiable,
                    0.0,
                    "verification unavailable, admitted with reduced confidence",
                    Some(reason.clone()),
                )
            } else {
                self.reject(
                    content,
                    evidence,
                    confidence,
                    budget.p0,
                    budget.p1,
                    0.0,
                    Verdict::Unverifiable,
                    "verification unavailable",
                    Some(reason.clone()),
                )
            };
        }

        let decision = match budget.verdict {
            Verdict::Grounded => self.admit(
                content,
                budget.adjusted_confidence,
                Verdict::Grounded,
                budget.gap,
                "grounded in evidence",
                None,
            ),
            Verdict::Contradicted => self.reject(
                content,
                evidence,
                confidence,
                budget.p0,
                budget.p1,
                budget.gap,
                Verdict::Contradicted,
                "contradicted by evidence",
                None,
            ),
            Verdict::Unsupported => {
                if self.config.reject_unsupported && budget.gap > self.config.flag_threshold {
                    self.reject(
                        content,
                        evidence,
                        confidence,
                        budget.p0,
                        budget.p1,
                        budget.gap,
                        Verdict::Unsupported,
                        "information gap exceeds threshold",
                        None,
                    )
                } else {
                    // Blend the stated confidence with the fraction of the
                    // requirement the evidence met, floored by the posterior
                    let ratio = if budget.required_bits > 0.0 {
                        (budget.observed_bits / budget.required_bits).min(1.0)
                    } else {
                        1.0
                    };
                    let blended = confidence * (0.5 + 0.5 * ratio);
                    let adjusted = blended.max(budget.p1).clamp(0.0, 1.0);
                    self.admit(
                        content,
                        adjusted,
                        Verdict::Unsupported,
                        budget.gap,
                        "partially supported, confidence blended",
                        None,
                    )
                }
            }
            Verdict::Unverifiable => {
                if self.config.graceful_degrade {
                    let adjusted = (confidence * self.config.reduction_factor).clamp(0.0, 1.0);
                    self.note_degraded();
                    self.admit(
                        content,
                        adjusted,
                        Verdict::Unverifiable,
                        budget.gap,
                        "unverifiable, admitted with reduced confidence",
                        None,
                    )
                } else {
                    self.reject(
                        content,
                        evidence,
                        confidence,
                        budget.p0,
                        budget.p1,
                        budget.gap,
                        Verdict::Unverifiable,
                        "unverifiable",
                        None,
                    )
                }
            }
        };

        // Confidence floor applies to every admission
        if decision.admit && decision.adjusted_confidence < self.config.min_confidence {
            let verdict = decision.verdict;
            let gap = decision.gap;
            return self.flip_to_reject(
                content, evidence, confidence, budget.p0, budget.p1, gap, verdict,
            );
        }

        decision
    }

    /// Rejections recorded so far, oldest first.
    pub fn rejected_facts(&self) -> Vec<RejectedFact> {
        self.rejected
            .lock()
            .expect("rejected lock")
            .iter()
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> GateStats {
        *self.stats.lock().expect("stats lock")
    }

    fn note_degraded(&self) {
        self.stats.lock().expect("stats lock").degraded += 1;
    }

    fn admit(
        &self,
        content: &str,
        adjusted: f64,
        verdict: Verdict,
        gap: f64,
        reason: &str,
        error: Option<String>,
    ) -> FactDecision {
        {
            let mut stats = self.stats.lock().expect("stats lock");
            stats.evaluated += 1;
            stats.admitted += 1;
        }
        self.registry
            .counter("memory_gate_decisions_total", &[("decision", "admit")])
            .inc();
        self.sink
            .record(DecisionEvent::memory_decision(true, content, reason));
        debug!(verdict = %verdict, adjusted, "fact admitted");
        FactDecision {
            admit: true,
            adjusted_confidence: adjusted,
            verdict,
            gap,
            reason: reason.to_string(),
            error,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn reject(
        &self,
        content: &str,
        evidence: &str,
        prior_confidence: f64,
        p0: f64,
        p1: f64,
        gap: f64,
        verdict: Verdict,
        reason: &str,
        error: Option<String>,
    ) -> FactDecision {
        {
            let mut stats = self.stats.lock().expect("stats lock");
            stats.evaluated += 1;
            stats.rejected += 1;
        }
        self.registry
            .counter("memory_gate_decisions_total", &[("decision", "reject")])
            .inc();

        let mut truncated: String = evidence.chars().take(REJECTED_EVIDENCE_CAP).collect();
        if evidence.chars().count() > REJECTED_EVIDENCE_CAP {
            truncated.push('…');
        }
        let record = RejectedFact {
            content: content.to_string(),
            evidence: truncated,
            reason: reason.to_string(),
            verdict,
            gap,
            p0,
            p1,
            prior_confidence,
            rejected_at: Utc::now(),
        };
        {
            let mut rejected = self.rejected.lock().expect("rejected lock");
            while rejected.len() >= self.config.rejected_capacity.max(1) {
                rejected.pop_front();
            }
            rejected.push_back(record);
        }

        warn!(verdict = %verdict, gap, reason, "fact rejected");
        self.sink
            .record(DecisionEvent::memory_decision(false, content, reason));

        FactDecision {
            admit: false,
            adjusted_confidence: 0.0,
            verdict,
            gap,
            reason: reason.to_string(),
            error,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn flip_to_reject(
        &self,
        content: &str,
        evidence: &str,
        prior_confidence: f64,
        p0: f64,
        p1: f64,
        gap: f64,
        verdict: Verdict,
    ) -> FactDecision {
        // The admission was already counted; undo it before recording
        // the rejection so the totals stay consistent
        {
            let mut stats = self.stats.lock().expect("stats lock");
            stats.evaluated = stats.evaluated.saturating_sub(1);
            stats.admitted = stats.admitted.saturating_sub(1);
        }
        self.reject(
            content,
            evidence,
            prior_confidence,
            p0,
            p1,
            gap,
            verdict,
            "adjusted confidence below minimum",
            None,
        )
    }
}
