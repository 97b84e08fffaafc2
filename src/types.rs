//! Core types for claim verification.
//!
//! The data model follows one rule throughout: probabilities and
//! confidences are `f64` in [0,1], information quantities are `f64` in
//! bits, and every decision carries the numbers that produced it so a
//! caller can audit the verdict without re-running the backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A bracketed citation found inside a claim sentence.
///
/// Offsets are relative to the trimmed enclosing sentence, not the
/// original document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// Span identifier, the token between the brackets
    pub id: String,
    /// Resolved evidence text, populated from the caller's evidence map
    pub text: Option<String>,
    /// Start offset of `[` within the sentence
    pub start: usize,
    /// End offset just past `]`
    pub end: usize,
}

impl Citation {
    pub fn new(id: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            id: id.into(),
            text: None,
            start,
            end,
        }
    }
}

/// A single sentence-level assertion extracted from agent output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    /// The sentence text, trimmed
    pub content: String,
    /// Citations found inside the sentence, in order of appearance
    pub citations: Vec<Citation>,
    /// Confidence the text itself states, inferred from hedge/certainty markers
    pub confidence: f64,
    /// Caller-supplied provenance tag ("response", "memory", ...)
    pub source: String,
    /// Start offset of the sentence in the original text
    pub offset: usize,
    /// False for questions, imperatives, and meta-commentary
    pub assertive: bool,
}

impl Claim {
    /// Create a claim with the default stated confidence of 0.9.
    pub fn new(content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            citations: Vec::new(),
            confidence: 0.9,
            source: source.into(),
            offset: 0,
            assertive: true,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_citations(mut self, citations: Vec<Citation>) -> Self {
        self.citations = citations;
        self
    }

    /// Identifiers of all citations, resolved or not.
    pub fn citation_ids(&self) -> Vec<&str> {
        self.citations.iter().map(|c| c.id.as_str()).collect()
    }
}

/// The four verdicts emitted by the budget classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Evidence supplies the information the stated confidence demands
    Grounded,
    /// Evidence supplies less information than required
    Unsupported,
    /// Evidence actively lowers the claim's probability
    Contradicted,
    /// Verification could not complete; no judgement made
    Unverifiable,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Grounded => write!(f, "grounded"),
            Self::Unsupported => write!(f, "unsupported"),
            Self::Contradicted => write!(f, "contradicted"),
            Self::Unverifiable => write!(f, "unverifiable"),
        }
    }
}

/// Result of the information-budget computation for one claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetResult {
    /// Pseudo-prior P(claim | no evidence), clamped to [0.01, 0.99]
    pub p0: f64,
    /// Posterior P(claim | evidence), clamped to [0.01, 0.99]
    pub p1: f64,
    /// Target confidence the claim states, clamped to [0.01, 0.99]
    pub target: f64,
    /// Bits needed to move the prior to the target
    pub required_bits: f64,
    /// Bits the evidence actually supplied
    pub observed_bits: f64,
    /// required - observed; positive means under-supported
    pub gap: f64,
    /// Classification of the gap
    pub verdict: Verdict,
    /// Confidence the caller should carry forward, in [0, 1]
    pub adjusted_confidence: f64,
}

impl BudgetResult {
    /// Whether the claim is within its information budget.
    pub fn is_grounded(&self) -> bool {
        self.verdict == Verdict::Grounded
    }

    /// Whether this result should raise a flag at the given gap threshold.
    pub fn should_flag(&self, threshold: f64) -> bool {
        self.gap > threshold
    }
}

/// Full verification outcome for one claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    /// The claim that was verified
    pub claim: Claim,
    /// Budget computation, including p0/p1/gap and the verdict
    pub budget: BudgetResult,
    /// Human-readable account of the decision
    pub explanation: String,
    /// Wall-clock time spent, milliseconds
    pub duration_ms: u64,
    /// Non-fatal backend error, when the verdict is Unverifiable
    pub error: Option<String>,
}

impl VerificationResult {
    pub fn verdict(&self) -> Verdict {
        self.budget.verdict
    }

    /// Trust score derived from the gap: 1/(1 + e^gap).
    pub fn trust(&self) -> f64 {
        crate::budget::trust_from_gap(self.budget.gap)
    }

    /// Severity of the finding in [0, 1].
    pub fn severity(&self) -> f64 {
        crate::budget::severity(self.budget.verdict, self.budget.gap)
    }
}

/// Aggregate outcome of a text-wide verification pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Unique id for this pass
    pub session_id: Uuid,
    /// One result per verified assertive claim
    pub results: Vec<VerificationResult>,
    /// Aggregate statistics
    pub stats: VerificationStats,
    /// Wall-clock time for the whole pass, milliseconds
    pub duration_ms: u64,
    /// When the pass completed
    pub completed_at: DateTime<Utc>,
}

/// Per-verdict counts and gap aggregates for a verification pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationStats {
    pub total_claims: u32,
    pub grounded: u32,
    pub unsupported: u32,
    pub contradicted: u32,
    pub unverifiable: u32,
    pub avg_gap: f64,
    pub max_gap: f64,
    /// Backend probability estimates issued, including batch members
    pub backend_calls: u32,
}

impl VerificationStats {
    /// Fraction of claims that are unsupported or contradicted.
    pub fn hallucination_rate(&self) -> f64 {
        if self.total_claims == 0 {
            0.0
        } else {
            (self.unsupported + self.contradicted) as f64 / self.total_claims as f64
        }
    }

    /// Fraction of claims that are grounded.
    pub fn grounding_rate(&self) -> f64 {
        if self.total_claims == 0 {
            1.0
        } else {
            self.grounded as f64 / self.total_claims as f64
        }
    }

    /// Fold one result into the aggregates.
    pub fn record(&mut self, result: &VerificationResult) {
        self.total_claims += 1;
        match result.budget.verdict {
            Verdict::Grounded => self.grounded += 1,
            Verdict::Unsupported => self.unsupported += 1,
            Verdict::Contradicted => self.contradicted += 1,
            Verdict::Unverifiable => self.unverifiable += 1,
        }
        let n = self.total_claims as f64;
        self.avg_gap = self.avg_gap * (n - 1.0) / n + result.budget.gap / n;
        if result.budget.gap > self.max_gap || self.total_claims == 1 {
            self.max_gap = result.budget.gap;
        }
    }
}

/// One step of a reasoning trace supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    /// The step's text
    pub content: String,
    /// Caller's tag for the step ("thought", "action", "observation", ...)
    pub kind: String,
    /// Confidence the agent declared for this step
    pub confidence: f64,
    /// Position within the audited sequence
    pub index: usize,
}

impl TraceStep {
    pub fn new(content: impl Into<String>, kind: impl Into<String>, index: usize) -> Self {
        Self {
            content: content.into(),
            kind: kind.into(),
            confidence: 0.9,
            index,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }
}

/// Classification of one trace step against its accumulated context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Step follows from the context
    Entailed,
    /// Step conflicts with the context
    Contradicted,
    /// Step is plausible without any context; it adds nothing traceable
    NotInContext,
    /// Probabilities were inconclusive
    Unverifiable,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Entailed => write!(f, "entailed"),
            Self::Contradicted => write!(f, "contradicted"),
            Self::NotInContext => write!(f, "not_in_context"),
            Self::Unverifiable => write!(f, "unverifiable"),
        }
    }
}

/// Probabilities and status for a single audited step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepVerification {
    pub index: usize,
    /// P(step | no prior context)
    pub p0: f64,
    /// P(step | accumulated context)
    pub p1: f64,
    pub status: StepStatus,
    /// Non-fatal backend error for this step, if any
    pub error: Option<String>,
}

/// Outcome of the post-hoc derivability check on a final answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostHocCheck {
    /// Whether the final answer scored at or above the derivability threshold
    pub derivable: bool,
    /// The backend's derivability score
    pub score: f64,
    /// Up to three content words of the answer absent from every step
    pub missing_concepts: Vec<String>,
}

/// Overall verdict for a trace audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceVerdict {
    Valid,
    Warning,
    Invalid,
    Unauditable,
}

impl std::fmt::Display for TraceVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Valid => write!(f, "valid"),
            Self::Warning => write!(f, "warning"),
            Self::Invalid => write!(f, "invalid"),
            Self::Unauditable => write!(f, "unauditable"),
        }
    }
}

/// Result of auditing a reasoning trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceAudit {
    /// Unique id for this audit
    pub audit_id: Uuid,
    /// Number of steps submitted
    pub total_steps: usize,
    /// Indices of steps whose status was not Entailed
    pub flagged_steps: Vec<usize>,
    /// Per-step probabilities and statuses, in step order
    pub steps: Vec<StepVerification>,
    /// Post-hoc derivability outcome, when the check ran
    pub post_hoc: Option<PostHocCheck>,
    /// Wall-clock time, milliseconds
    pub duration_ms: u64,
    pub verdict: TraceVerdict,
}

impl TraceAudit {
    /// Recompute the overall verdict from the step statuses and post-hoc
    /// outcome. Post-hoc hallucination and contradicted steps are fatal;
    /// anything else flagged downgrades to Warning.
    pub fn compute_verdict(&self) -> TraceVerdict {
        if let Some(ph) = &self.post_hoc {
            if !ph.derivable {
                return TraceVerdict::Invalid;
            }
        }
        if self
            .steps
            .iter()
            .any(|s| s.status == StepStatus::Contradicted)
        {
            return TraceVerdict::Invalid;
        }
        if !self.flagged_steps.is_empty()
            || self
                .steps
                .iter()
                .any(|s| s.status == StepStatus::NotInContext)
        {
            return TraceVerdict::Warning;
        }
        TraceVerdict::Valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_defaults() {
        let claim = Claim::new("The parser caches tokens", "response");
        assert_eq!(claim.confidence, 0.9);
        assert!(claim.assertive);
        assert!(claim.citations.is_empty());
    }

    #[test]
    fn test_claim_confidence_clamped() {
        let claim = Claim::new("x", "test").with_confidence(1.7);
        assert_eq!(claim.confidence, 1.0);
        let claim = Claim::new("x", "test").with_confidence(-0.2);
        assert_eq!(claim.confidence, 0.0);
    }

    #[test]
    fn test_stats_record() {
        let mut stats = VerificationStats::default();
        let claim = Claim::new("test claim content here", "test");
        let budget = crate::budget::compute_budget(0.5, 0.9, 0.8);
        stats.record(&VerificationResult {
            claim,
            budget,
            explanation: String::new(),
            duration_ms: 1,
            error: None,
        });
        assert_eq!(stats.total_claims, 1);
        assert_eq!(stats.grounded + stats.unsupported + stats.contradicted, 1);
    }

    #[test]
    fn test_hallucination_rate_empty() {
        let stats = VerificationStats::default();
        assert_eq!(stats.hallucination_rate(), 0.0);
        assert_eq!(stats.grounding_rate(), 1.0);
    }

    #[test]
    fn test_trace_verdict_ladder() {
        let mut audit = TraceAudit {
            audit_id: Uuid::new_v4(),
            total_steps: 2,
            flagged_steps: vec![],
            steps: vec![
                StepVerification {
                    index: 0,
                    p0: 0.3,
                    p1: 0.9,
                    status: StepStatus::Entailed,
                    error: None,
                },
                StepVerification {
                    index: 1,
                    p0: 0.3,
                    p1: 0.9,
                    status: StepStatus::Entailed,
                    error: None,
                },
            ],
            post_hoc: None,
            duration_ms: 0,
            verdict: TraceVerdict::Valid,
        };
        assert_eq!(audit.compute_verdict(), TraceVerdict::Valid);

        audit.steps[1].status = StepStatus::NotInContext;
        assert_eq!(audit.compute_verdict(), TraceVerdict::Warning);

        audit.steps[1].status = StepStatus::Contradicted;
        assert_eq!(audit.compute_verdict(), TraceVerdict::Invalid);

        audit.steps[1].status = StepStatus::Entailed;
        audit.post_hoc = Some(PostHocCheck {
            derivable: false,
            score: 0.2,
            missing_concepts: vec![],
        });
        assert_eq!(audit.compute_verdict(), TraceVerdict::Invalid);
    }
}
