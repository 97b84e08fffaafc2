//! Verification orchestration.
//!
//! The detector wires the extractor, the scrubber, a probability
//! backend, and the budget math into the three verification shapes the
//! gates consume: single-claim, text-wide, and step-by-step trace
//! auditing.
//!
//! Backend failures never escape: a failed estimate becomes an
//! Unverifiable result carrying the failure reason, with the claim's
//! confidence reduced by the error handler.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::resilience::ErrorHandler;
use crate::backend::VerifierBackend;
use crate::budget::compute_budget;
use crate::error::{Error, Result};
use crate::events::{DecisionEvent, EventKind, EventSink, TracingSink};
use crate::extractor::ClaimExtractor;
use crate::metrics::{MetricsRegistry, NoopRegistry};
use crate::scrubber::{EvidenceScrubber, ScrubConfig};
use crate::types::{
    BudgetResult, Claim, StepStatus, StepVerification, TraceAudit, TraceStep, TraceVerdict,
    Verdict, VerificationReport, VerificationResult, VerificationStats,
};

/// Context sentinel standing in for removed evidence.
pub const NO_EVIDENCE_SENTINEL: &str = "[No specific evidence provided]";

/// Context sentinel for the first trace step's prior estimate.
pub const NO_PRIOR_CONTEXT: &str = "[No prior context]";

/// Source tag attached to claims the detector extracts itself.
const DETECTOR_SOURCE: &str = "response";

/// Detector configuration.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Deadline applied to each claim or step verification
    pub request_timeout: Duration,
    /// Abort a trace audit at the first contradicted step
    pub stop_on_contradiction: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            stop_on_contradiction: false,
        }
    }
}

impl DetectorConfig {
    /// Tight deadline for latency-sensitive callers.
    pub fn fast() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            stop_on_contradiction: true,
        }
    }

    /// Generous deadline for offline auditing.
    pub fn thorough() -> Self {
        Self {
            request_timeout: Duration::from_secs(120),
            stop_on_contradiction: false,
        }
    }
}

/// Orchestrates claim verification against a probability backend.
pub struct Detector {
    backend: Arc<dyn VerifierBackend>,
    extractor: ClaimExtractor,
    scrubber: EvidenceScrubber,
    handler: ErrorHandler,
    config: DetectorConfig,
    registry: Arc<dyn MetricsRegistry>,
    sink: Arc<dyn EventSink>,
}

impl Detector {
    pub fn new(backend: Arc<dyn VerifierBackend>) -> Self {
        Self {
            backend,
            extractor: ClaimExtractor::new(),
            scrubber: EvidenceScrubber::new(
                ScrubConfig::default().with_marker(NO_EVIDENCE_SENTINEL),
            ),
            handler: ErrorHandler::default(),
            config: DetectorConfig::default(),
            registry: Arc::new(NoopRegistry),
            sink: Arc::new(TracingSink),
        }
    }

    pub fn with_config(mut self, config: DetectorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_handler(mut self, handler: ErrorHandler) -> Self {
        self.handler = handler;
        self
    }

    pub fn with_registry(mut self, registry: Arc<dyn MetricsRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn extractor(&self) -> &ClaimExtractor {
        &self.extractor
    }

    /// The "no evidence" twin of a context: scrubbing the evidence out
    /// of itself collapses to the sentinel.
    fn no_evidence_context(&self, evidence: &str) -> String {
        if evidence.trim().is_empty() {
            return NO_EVIDENCE_SENTINEL.to_string();
        }
        self.scrubber.scrub_patterns(evidence, &[evidence]).scrubbed
    }

    /// Verify one claim against its evidence.
    pub async fn verify_claim_with_evidence(
        &self,
        claim: &Claim,
        evidence: &str,
    ) -> VerificationResult {
        let start = Instant::now();

        let estimates = timeout(self.config.request_timeout, async {
            // P1 before P0; callers may rely on this order
            let p1 = self
                .backend
                .estimate_probability(&claim.content, evidence)
                .await?;
            let p0_context = self.no_evidence_context(evidence);
            let p0 = self
                .backend
                .estimate_probability(&claim.content, &p0_context)
                .await?;
            Ok::<_, Error>((p0, p1))
        })
        .await;

        let result = match estimates {
            Ok(Ok((p0, p1))) => {
                let budget = compute_budget(p0, p1, claim.confidence);
                let explanation = explain(&budget);
                VerificationResult {
                    claim: claim.clone(),
                    budget,
                    explanation,
                    duration_ms: start.elapsed().as_millis() as u64,
                    error: None,
                }
            }
            Ok(Err(e)) => self.unverifiable(claim, e, start.elapsed()),
            Err(_) => self.unverifiable(
                claim,
                Error::timeout(self.config.request_timeout.as_millis() as u64),
                start.elapsed(),
            ),
        };

        self.observe(&result);
        result
    }

    /// Build the Unverifiable result for an absorbed backend error.
    fn unverifiable(
        &self,
        claim: &Claim,
        error: Error,
        elapsed: Duration,
    ) -> VerificationResult {
        let degradation = self.handler.handle(&error, claim.confidence);
        let budget = BudgetResult {
            p0: 0.5,
            p1: 0.5,
            target: claim.confidence.clamp(0.01, 0.99),
            required_bits: 0.0,
            observed_bits: 0.0,
            gap: 0.0,
            verdict: Verdict::Unverifiable,
            adjusted_confidence: degradation.adjusted_confidence,
        };
        let explanation = format!(
            "Unverifiable: {}; confidence reduced to {:.2}.",
            degradation.reason, degradation.adjusted_confidence
        );
        VerificationResult {
            claim: claim.clone(),
            budget,
            explanation,
            duration_ms: elapsed.as_millis() as u64,
            error: Some(degradation.reason),
        }
    }

    fn observe(&self, result: &VerificationResult) {
        let verdict = result.budget.verdict.to_string();
        self.registry
            .counter("verifications_total", &[("verdict", &verdict)])
            .inc();
        self.registry
            .histogram("verification_duration_seconds", &[])
            .observe(result.duration_ms as f64 / 1000.0);

        let event = match result.budget.verdict {
            Verdict::Unsupported | Verdict::Contradicted => DecisionEvent::hallucination_flag(
                &result.claim.content,
                result.budget.gap,
                result.budget.verdict,
            ),
            _ => DecisionEvent::new(EventKind::BudgetComputed, result.explanation.clone())
                .with_field("gap", result.budget.gap)
                .with_field("verdict", verdict),
        };
        self.sink.record(event);
    }

    /// Extract assertive claims and verify each sequentially. Claims
    /// whose verification failed are logged and left out of the report.
    pub async fn verify_text(&self, text: &str, context: &str) -> VerificationReport {
        let start = Instant::now();
        let session_id = Uuid::new_v4();
        self.sink
            .record(DecisionEvent::new(EventKind::VerifyStart, "text verification"));

        let claims = self.extractor.extract_assertive(text, DETECTOR_SOURCE);
        let backend_calls = (claims.len() * 2) as u32;

        let mut results = Vec::with_capacity(claims.len());
        for claim in &claims {
            let result = self.verify_claim_with_evidence(claim, context).await;
            if let Some(reason) = &result.error {
                warn!(claim = %claim.content, error = %reason, "claim skipped");
                continue;
            }
            results.push(result);
        }

        self.finish_report(session_id, results, backend_calls, start)
    }

    /// Like [`verify_text`](Detector::verify_text) but issues one batch
    /// call for the posteriors and one for the priors. Falls back to
    /// the sequential path when a batch call fails.
    pub async fn verify_text_batch(&self, text: &str, context: &str) -> VerificationReport {
        let start = Instant::now();
        let session_id = Uuid::new_v4();
        self.sink
            .record(DecisionEvent::new(EventKind::VerifyStart, "batch verification"));

        let claims = self.extractor.extract_assertive(text, DETECTOR_SOURCE);
        if claims.is_empty() {
            return self.finish_report(session_id, Vec::new(), 0, start);
        }

        let texts: Vec<&str> = claims.iter().map(|c| c.content.as_str()).collect();
        let p0_context = self.no_evidence_context(context);

        let batches = timeout(self.config.request_timeout, async {
            // P1 batch first, then the P0 batch, both in claim order
            let p1s = self.backend.batch_estimate(&texts, context).await?;
            let p0s = self.backend.batch_estimate(&texts, &p0_context).await?;
            Ok::<_, Error>((p1s, p0s))
        })
        .await;

        let (p1s, p0s) = match batches {
            Ok(Ok((p1s, p0s))) if p1s.len() == claims.len() && p0s.len() == claims.len() => {
                (p1s, p0s)
            }
            Ok(Ok(_)) => {
                warn!("batch returned wrong arity, falling back to sequential");
                return self.verify_text(text, context).await;
            }
            Ok(Err(e)) => {
                warn!(error = %e, "batch estimate failed, falling back to sequential");
                return self.verify_text(text, context).await;
            }
            Err(_) => {
                warn!("batch estimate timed out, falling back to sequential");
                return self.verify_text(text, context).await;
            }
        };

        let per_claim_ms = start.elapsed().as_millis() as u64 / claims.len() as u64;
        let results: Vec<VerificationResult> = claims
            .into_iter()
            .zip(p1s.into_iter().zip(p0s))
            .map(|(claim, (p1, p0))| {
                let budget = compute_budget(p0, p1, claim.confidence);
                let explanation = explain(&budget);
                let result = VerificationResult {
                    claim,
                    budget,
                    explanation,
                    duration_ms: per_claim_ms,
                    error: None,
                };
                self.observe(&result);
                result
            })
            .collect();

        let backend_calls = (results.len() * 2) as u32;
        self.finish_report(session_id, results, backend_calls, start)
    }

    fn finish_report(
        &self,
        session_id: Uuid,
        results: Vec<VerificationResult>,
        backend_calls: u32,
        start: Instant,
    ) -> VerificationReport {
        let mut stats = VerificationStats::default();
        for result in &results {
            stats.record(result);
        }
        stats.backend_calls = backend_calls;

        let duration_ms = start.elapsed().as_millis() as u64;
        self.sink.record(
            DecisionEvent::new(
                EventKind::VerifyComplete,
                format!(
                    "{} claims, {} flagged, {duration_ms}ms",
                    stats.total_claims,
                    stats.unsupported + stats.contradicted
                ),
            )
            .with_field("total", stats.total_claims)
            .with_field("hallucination_rate", stats.hallucination_rate()),
        );

        VerificationReport {
            session_id,
            results,
            stats,
            duration_ms,
            completed_at: Utc::now(),
        }
    }

    /// Audit a reasoning trace step by step.
    ///
    /// Each step is estimated against the context accumulated so far
    /// (posterior) and against the no-prior sentinel (prior); the step
    /// classification follows from the two probabilities and the step's
    /// declared confidence.
    pub async fn audit_trace(&self, steps: &[TraceStep], initial_context: &str) -> TraceAudit {
        let start = Instant::now();
        let mut accumulated = initial_context.to_string();
        let mut verified = Vec::with_capacity(steps.len());
        let mut flagged = Vec::new();

        for (i, step) in steps.iter().enumerate() {
            let estimates = timeout(self.config.request_timeout, async {
                let p1 = self
                    .backend
                    .estimate_probability(&step.content, &accumulated)
                    .await?;
                let p0 = self
                    .backend
                    .estimate_probability(&step.content, NO_PRIOR_CONTEXT)
                    .await?;
                Ok::<_, Error>((p0, p1))
            })
            .await;

            let (p0, p1, error) = match estimates {
                Ok(Ok((p0, p1))) => (p0, p1, None),
                Ok(Err(e)) => {
                    let degradation = self.handler.handle(&e, step.confidence);
                    (0.5, 0.5, Some(degradation.reason))
                }
                Err(_) => {
                    let e = Error::timeout(self.config.request_timeout.as_millis() as u64);
                    let degradation = self.handler.handle(&e, step.confidence);
                    (0.5, 0.5, Some(degradation.reason))
                }
            };

            let status = if error.is_some() {
                StepStatus::Unverifiable
            } else {
                classify_step(p0, p1, step.confidence)
            };

            debug!(step = i, p0, p1, status = %status, "trace step audited");
            if status != StepStatus::Entailed {
                flagged.push(i);
                self.sink.record(
                    DecisionEvent::new(
                        EventKind::TraceStepFlagged,
                        step.content.chars().take(80).collect::<String>(),
                    )
                    .with_field("index", i as u64)
                    .with_field("status", status.to_string()),
                );
            }

            verified.push(StepVerification {
                index: i,
                p0,
                p1,
                status,
                error,
            });

            if self.config.stop_on_contradiction && status == StepStatus::Contradicted {
                break;
            }

            accumulated.push('\n');
            accumulated.push_str(&step.content);
        }

        let mut audit = TraceAudit {
            audit_id: Uuid::new_v4(),
            total_steps: steps.len(),
            flagged_steps: flagged,
            steps: verified,
            post_hoc: None,
            duration_ms: start.elapsed().as_millis() as u64,
            verdict: TraceVerdict::Valid,
        };
        audit.verdict = audit.compute_verdict();

        self.registry
            .counter("trace_audits_total", &[("verdict", &audit.verdict.to_string())])
            .inc();

        audit
    }

    /// One probability estimate against an arbitrary context, with the
    /// detector's deadline and degradation applied. Used by the trace
    /// auditor's post-hoc check.
    pub async fn estimate(&self, claim: &str, context: &str) -> Result<f64> {
        match timeout(
            self.config.request_timeout,
            self.backend.estimate_probability(claim, context),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(
                self.config.request_timeout.as_millis() as u64
            )),
        }
    }
}

/// Trace step classification. Rule order is part of the contract.
pub fn classify_step(p0: f64, p1: f64, declared_confidence: f64) -> StepStatus {
    if p1 < 0.2 {
        return StepStatus::Contradicted;
    }
    if p1 > 0.7 && (p1 - p0) > 0.2 {
        return StepStatus::Entailed;
    }
    if p0 > 0.7 && (p1 - p0) < 0.1 {
        return StepStatus::NotInContext;
    }
    if declared_confidence > 0.8 && p1 < 0.5 {
        return StepStatus::Contradicted;
    }
    if p1 > 0.5 {
        return StepStatus::Entailed;
    }
    StepStatus::Unverifiable
}

/// Human-readable account of a budget result.
fn explain(budget: &BudgetResult) -> String {
    match budget.verdict {
        Verdict::Grounded => format!(
            "Grounded: evidence supplies {:.2} bits of the {:.2} required for stated confidence {:.2} (gap {:.2}).",
            budget.observed_bits, budget.required_bits, budget.target, budget.gap
        ),
        Verdict::Unsupported => format!(
            "Unsupported: evidence supplies only {:.2} of {:.2} required bits (gap {:.2}); confidence adjusted to {:.2}.",
            budget.observed_bits, budget.required_bits, budget.gap, budget.adjusted_confidence
        ),
        Verdict::Contradicted => format!(
            "Contradicted: probability moved from {:.2} to {:.2} once evidence was considered.",
            budget.p0, budget.p1
        ),
        Verdict::Unverifiable => "Unverifiable: no estimate available.".to_string(),
    }
}

/// Cheap heuristic risk screen with no backend calls: hedge-free
/// universal claims, uncited high-confidence claims, and dense numeric
/// detail all raise the score.
pub fn quick_risk_screen(text: &str) -> f64 {
    let extractor = ClaimExtractor::new();
    let claims = extractor.extract_assertive(text, "screen");
    let mut risk: f64 = 0.0;

    let confident_uncited = claims
        .iter()
        .filter(|c| c.confidence >= 0.9 && c.citations.is_empty())
        .count();
    if confident_uncited > 0 {
        risk += 0.3;
    }

    let lower = text.to_lowercase();
    let universal = ["always", "never", "all ", "none ", "every ", "guaranteed"];
    let hedges = ["might", "could", "possibly", "perhaps", "likely", "probably"];
    if universal.iter().any(|w| lower.contains(w)) && !hedges.iter().any(|w| lower.contains(w)) {
        risk += 0.2;
    }

    let number_re = regex::Regex::new(r"\b\d{3,}\b").expect("static regex");
    if number_re.find_iter(&lower).count() > 2 {
        risk += 0.15;
    }

    let long_sentences = text.split('.').filter(|s| s.len() > 200).count();
    if long_sentences > 1 {
        risk += 0.1;
    }

    risk.clamp(0.0, 1.0)
}
