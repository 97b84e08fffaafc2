//! Post-generation output verification.
//!
//! Verifies an agent response against its conversation context after
//! generation. This gate never blocks: it flags, warns, and produces a
//! self-correction hint, but the response always goes through.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::detector::Detector;
use crate::events::{DecisionEvent, EventKind, EventSink, TracingSink};
use crate::metrics::{MetricsRegistry, NoopRegistry};
use crate::types::{Verdict, VerificationResult};

/// Fraction of flagged claims above which a response is flagged.
const FLAG_RATIO_THRESHOLD: f64 = 0.3;

/// Overall risk above which a response is flagged.
const RISK_THRESHOLD: f64 = 0.5;

/// Output-verifier policy knobs.
#[derive(Debug, Clone)]
pub struct OutputVerifierConfig {
    pub enabled: bool,
    /// Responses shorter than this are skipped
    pub min_response_len: usize,
    /// Cap on claims verified per response
    pub max_claims: usize,
    /// Gap above which an individual claim is flagged
    pub gap_threshold: f64,
    /// Produce a user-facing warning when the response is flagged
    pub warn_on_flag: bool,
}

impl Default for OutputVerifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_response_len: 50,
            max_claims: 10,
            gap_threshold: 0.5,
            warn_on_flag: true,
        }
    }
}

/// A claim the verifier flagged, with everything a caller needs to
/// self-correct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlaggedClaim {
    pub content: String,
    /// Offset of the claim in the response
    pub offset: usize,
    pub gap: f64,
    pub verdict: Verdict,
    pub explanation: String,
}

/// Guidance for regenerating a flagged response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionHint {
    pub claims: Vec<FlaggedClaim>,
    /// Natural-language suggestion chosen by the worst verdict present
    pub suggestion: String,
}

/// Verification outcome for one response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputCheck {
    /// True when verification did not run at all
    pub skipped: bool,
    pub skip_reason: Option<String>,
    /// Whether the response as a whole is flagged
    pub flagged: bool,
    pub verified_claims: usize,
    pub flagged_claims: usize,
    /// `1 - 1/(1 + avgGap/threshold)`, in [0, 1)
    pub overall_risk: f64,
    /// User-facing warning, when flagged and warnings are enabled
    pub warning: Option<String>,
    /// Self-correction guidance, only when flagged
    pub hint: Option<CorrectionHint>,
    pub results: Vec<VerificationResult>,
    pub duration_ms: u64,
}

impl OutputCheck {
    fn skipped(reason: &str) -> Self {
        Self {
            skipped: true,
            skip_reason: Some(reason.to_string()),
            flagged: false,
            verified_claims: 0,
            flagged_claims: 0,
            overall_risk: 0.0,
            warning: None,
            hint: None,
            results: Vec::new(),
            duration_ms: 0,
        }
    }
}

/// Post-generation verifier with a warn-don't-block policy.
pub struct OutputVerifier {
    detector: Option<Arc<Detector>>,
    config: OutputVerifierConfig,
    registry: Arc<dyn MetricsRegistry>,
    sink: Arc<dyn EventSink>,
}

impl OutputVerifier {
    pub fn new(detector: Arc<Detector>, config: OutputVerifierConfig) -> Self {
        Self {
            detector: Some(detector),
            config,
            registry: Arc::new(NoopRegistry),
            sink: Arc::new(TracingSink),
        }
    }

    /// A verifier with no detector skips everything.
    pub fn detached(config: OutputVerifierConfig) -> Self {
        Self {
            detector: None,
            config,
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

    /// Verify a response against the conversation context.
    pub async fn verify_response(&self, response: &str, context: &str) -> OutputCheck {
        if !self.config.enabled {
            return OutputCheck::skipped("verifier disabled");
        }
        let Some(detector) = &self.detector else {
            return OutputCheck::skipped("no detector configured");
        };
        if response.len() < self.config.min_response_len {
            return OutputCheck::skipped("response below length floor");
        }

        let mut claims = detector.extractor().extract_assertive(response, "output");
        if claims.is_empty() {
            return OutputCheck::skipped("no assertive claims");
        }
        claims.truncate(self.config.max_claims.max(1));

        let start = Instant::now();
        let mut results = Vec::with_capacity(claims.len());
        for claim in &claims {
            results.push(detector.verify_claim_with_evidence(claim, context).await);
        }

        let verified = results.len();
        let flagged_results: Vec<&VerificationResult> = results
            .iter()
            .filter(|r| r.budget.gap > self.config.gap_threshold)
            .collect();
        let flagged_count = flagged_results.len();

        // Negative gaps carry no risk
        let avg_gap = results
            .iter()
            .map(|r| r.budget.gap.max(0.0))
            .sum::<f64>()
            / verified as f64;
        let overall_risk = 1.0 - 1.0 / (1.0 + avg_gap / self.config.gap_threshold);

        let flagged = flagged_count as f64 / verified as f64 > FLAG_RATIO_THRESHOLD
            || overall_risk > RISK_THRESHOLD;

        let warning = if flagged && self.config.warn_on_flag {
            Some(warning_text(flagged_count))
        } else {
            None
        };

        let hint = if flagged {
            Some(build_hint(&flagged_results))
        } else {
            None
        };

        self.registry
            .counter(
                "output_verifications_total",
                &[("flagged", if flagged { "true" } else { "false" })],
            )
            .inc();
        let event_kind = if flagged {
            EventKind::OutputFlagged
        } else {
            EventKind::OutputVerified
        };
        self.sink.record(
            DecisionEvent::new(
                event_kind,
                format!("{flagged_count}/{verified} claims flagged"),
            )
            .with_field("risk", overall_risk),
        );
        debug!(verified, flagged_count, overall_risk, "output verified");

        OutputCheck {
            skipped: false,
            skip_reason: None,
            flagged,
            verified_claims: verified,
            flagged_claims: flagged_count,
            overall_risk,
            warning,
            hint,
            results,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

/// Warning string with an exact count.
fn warning_text(flagged: usize) -> String {
    if flagged == 1 {
        "One claim in this response may not be fully supported by the available evidence."
            .to_string()
    } else {
        format!(
            "{flagged} claims in this response may not be fully supported by the available evidence."
        )
    }
}

/// Correction hint: flagged claim details plus a suggestion keyed to
/// the worst verdict present.
fn build_hint(flagged: &[&VerificationResult]) -> CorrectionHint {
    let claims = flagged
        .iter()
        .map(|r| FlaggedClaim {
            content: r.claim.content.clone(),
            offset: r.claim.offset,
            gap: r.budget.gap,
            verdict: r.budget.verdict,
            explanation: r.explanation.clone(),
        })
        .collect();

    let any_contradicted = flagged
        .iter()
        .any(|r| r.budget.verdict == Verdict::Contradicted);
    let any_unsupported = flagged
        .iter()
        .any(|r| r.budget.verdict == Verdict::Unsupported);

    let suggestion = if any_contradicted {
        "Revise the contradicted statements or add qualifiers reflecting the evidence."
    } else if any_unsupported {
        "Add citations or hedging language to the statements the evidence does not cover."
    } else {
        "Review the flagged statements against the available evidence."
    };

    CorrectionHint {
        claims,
        suggestion: suggestion.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::detector::NO_EVIDENCE_SENTINEL;
    use crate::events::VecSink;

    fn verifier_with(mock: MockBackend, config: OutputVerifierConfig) -> OutputVerifier {
        OutputVerifier::new(Arc::new(Detector::new(Arc::new(mock))), config)
    }

    const LONG_GROUNDED_RESPONSE: &str =
        "The scheduler runs every five seconds. The worker pool holds eight threads.";

    #[tokio::test]
    async fn test_disabled_skips() {
        let verifier = verifier_with(
            MockBackend::new(0.9),
            OutputVerifierConfig {
                enabled: false,
                ..Default::default()
            },
        );
        let check = verifier.verify_response(LONG_GROUNDED_RESPONSE, "ctx").await;
        assert!(check.skipped);
        assert!(!check.flagged);
    }

    #[tokio::test]
    async fn test_detached_skips() {
        let verifier = OutputVerifier::detached(OutputVerifierConfig::default());
        let check = verifier.verify_response(LONG_GROUNDED_RESPONSE, "ctx").await;
        assert!(check.skipped);
        assert_eq!(check.skip_reason.as_deref(), Some("no detector configured"));
    }

    #[tokio::test]
    async fn test_short_response_skipped() {
        let verifier = verifier_with(MockBackend::new(0.9), OutputVerifierConfig::default());
        let check = verifier.verify_response("Too short.", "ctx").await;
        assert!(check.skipped);
        assert_eq!(check.skip_reason.as_deref(), Some("response below length floor"));
    }

    #[tokio::test]
    async fn test_no_assertive_claims_skipped() {
        let verifier = verifier_with(MockBackend::new(0.9), OutputVerifierConfig::default());
        let check = verifier
            .verify_response(
                "Please check the deploy logs before anything else happens today?",
                "ctx",
            )
            .await;
        assert!(check.skipped);
    }

    #[tokio::test]
    async fn test_grounded_response_not_flagged() {
        let mock = MockBackend::new(0.9).with_context_probability(NO_EVIDENCE_SENTINEL, 0.3);
        let verifier = verifier_with(mock, OutputVerifierConfig::default());
        let check = verifier
            .verify_response(LONG_GROUNDED_RESPONSE, "scheduler=5s pool=8")
            .await;
        assert!(!check.skipped);
        assert!(!check.flagged);
        assert!(check.warning.is_none());
        assert!(check.hint.is_none());
        assert_eq!(check.verified_claims, 2);
    }

    #[tokio::test]
    async fn test_unsupported_response_flagged_with_warning() {
        // Evidence moves nothing; every claim carries a large gap
        let mock = MockBackend::new(0.4).with_context_probability(NO_EVIDENCE_SENTINEL, 0.4);
        let verifier = verifier_with(mock, OutputVerifierConfig::default());
        let check = verifier
            .verify_response(LONG_GROUNDED_RESPONSE, "irrelevant context")
            .await;

        assert!(check.flagged);
        assert_eq!(check.flagged_claims, 2);
        assert_eq!(
            check.warning.as_deref(),
            Some("2 claims in this response may not be fully supported by the available evidence.")
        );
        let hint = check.hint.expect("hint present when flagged");
        assert_eq!(hint.claims.len(), 2);
        assert!(hint.suggestion.contains("citations") || hint.suggestion.contains("hedging"));
    }

    #[tokio::test]
    async fn test_singular_warning_text() {
        assert_eq!(
            warning_text(1),
            "One claim in this response may not be fully supported by the available evidence."
        );
        assert!(warning_text(3).starts_with("3 claims"));
    }

    #[tokio::test]
    async fn test_contradicted_suggestion_wins() {
        // Low prior, lower posterior: contradicted with a positive gap
        let mock = MockBackend::new(0.1).with_context_probability(NO_EVIDENCE_SENTINEL, 0.3);
        let verifier = verifier_with(mock, OutputVerifierConfig::default());
        let check = verifier
            .verify_response(LONG_GROUNDED_RESPONSE, "contradicting context")
            .await;

        assert!(check.flagged);
        let hint = check.hint.expect("hint");
        assert!(hint.suggestion.contains("Revise"));
    }

    #[tokio::test]
    async fn test_max_claims_cap() {
        let mock = MockBackend::new(0.9).with_context_probability(NO_EVIDENCE_SENTINEL, 0.3);
        let verifier = verifier_with(
            mock,
            OutputVerifierConfig {
                max_claims: 2,
                ..Default::default()
            },
        );
        let response = "The first subsystem boots early. The second subsystem boots later. \
                        The third subsystem boots last. The fourth subsystem never boots.";
        let check = verifier.verify_response(response, "boot order docs").await;
        assert_eq!(check.verified_claims, 2);
    }

    #[tokio::test]
    async fn test_never_blocks_even_when_flagged() {
        let mock = MockBackend::new(0.1).with_context_probability(NO_EVIDENCE_SENTINEL, 0.3);
        let verifier = verifier_with(mock, OutputVerifierConfig::default());
        let check = verifier
            .verify_response(LONG_GROUNDED_RESPONSE, "ctx")
            .await;
        // The check reports, it does not veto: results are all present
        assert!(check.flagged);
        assert_eq!(check.results.len(), check.verified_claims);
    }

    #[tokio::test]
    async fn test_warning_suppressed_when_disabled() {
        let mock = MockBackend::new(0.4).with_context_probability(NO_EVIDENCE_SENTINEL, 0.4);
        let verifier = verifier_with(
            mock,
            OutputVerifierConfig {
                warn_on_flag: false,
                ..Default::default()
            },
        );
        let check = verifier.verify_response(LONG_GROUNDED_RESPONSE, "ctx").await;
        assert!(check.flagged);
        assert!(check.warning.is_none());
        // The hint is independent of the warning switch
        assert!(check.hint.is_some());
    }

    #[tokio::test]
    async fn test_events_emitted() {
        let sink = Arc::new(VecSink::new());
        let mock = MockBackend::new(0.9).with_context_probability(NO_EVIDENCE_SENTINEL, 0.3);
        let verifier =
            verifier_with(mock, OutputVerifierConfig::default()).with_sink(sink.clone());
        verifier
            .verify_response(LONG_GROUNDED_RESPONSE, "scheduler=5s pool=8")
            .await;
        assert_eq!(sink.count_kind(EventKind::OutputVerified), 1);
    }
}
