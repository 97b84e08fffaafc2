//! Reasoning-trace audit.
//!
//! Runs the detector's step-by-step audit, then checks whether the
//! final answer can be derived from the steps at all (the post-hoc
//! check). A final answer the steps cannot support is the strongest
//! hallucination signal this crate produces.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::detector::Detector;
use crate::events::{DecisionEvent, EventKind, EventSink, TracingSink};
use crate::metrics::{MetricsRegistry, NoopRegistry};
use crate::types::{PostHocCheck, TraceAudit, TraceStep, TraceVerdict};
use uuid::Uuid;

/// Content words shorter than this are ignored by the missing-concept
/// heuristic.
const MIN_CONCEPT_LEN: usize = 4;

/// At most this many missing concepts are reported.
const MAX_MISSING_CONCEPTS: usize = 3;

/// Fixed stopword list for the missing-concept heuristic. Deliberately
/// small; it filters connective tissue, not domain vocabulary.
const STOPWORDS: &[&str] = &[
    "that", "this", "with", "from", "have", "will", "been", "were", "they", "them", "than",
    "then", "what", "when", "where", "which", "their", "there", "these", "those", "about",
    "because", "therefore", "answer",
];

/// Trace-auditor policy knobs.
#[derive(Debug, Clone)]
pub struct TraceAuditorConfig {
    /// Run the post-hoc derivability check on the final answer
    pub post_hoc_check: bool,
    /// Minimum derivability score for the final answer
    pub derivability_threshold: f64,
}

impl Default for TraceAuditorConfig {
    fn default() -> Self {
        Self {
            post_hoc_check: true,
            derivability_threshold: 0.6,
        }
    }
}

/// Audits reasoning traces and final answers.
pub struct TraceAuditor {
    detector: Arc<Detector>,
    config: TraceAuditorConfig,
    registry: Arc<dyn MetricsRegistry>,
    sink: Arc<dyn EventSink>,
}

impl TraceAuditor {
    pub fn new(detector: Arc<Detector>, config: TraceAuditorConfig) -> Self {
        Self {
            detector,
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

    /// Audit a trace and, when a final answer is supplied, check that
    /// it is derivable from the steps.
    pub async fn audit(
        &self,
        steps: &[TraceStep],
        initial_context: &str,
        final_answer: Option<&str>,
    ) -> TraceAudit {
        if steps.is_empty() {
            return TraceAudit {
                audit_id: Uuid::new_v4(),
                total_steps: 0,
                flagged_steps: Vec::new(),
                steps: Vec::new(),
                post_hoc: None,
                duration_ms: 0,
                verdict: TraceVerdict::Unauditable,
            };
        }

        let mut audit = self.detector.audit_trace(steps, initial_context).await;

        if self.config.post_hoc_check {
            if let Some(final_answer) = final_answer {
                audit.post_hoc = self.check_derivability(steps, final_answer).await;
            }
        }

        audit.verdict = audit.compute_verdict();

        self.registry
            .counter(
                "trace_audit_verdicts_total",
                &[("verdict", &audit.verdict.to_string())],
            )
            .inc();
        self.sink.record(
            DecisionEvent::new(
                EventKind::AuditComplete,
                format!(
                    "{} steps, {} flagged, verdict {}",
                    audit.total_steps,
                    audit.flagged_steps.len(),
                    audit.verdict
                ),
            )
            .with_field("verdict", audit.verdict.to_string()),
        );

        audit
    }

    /// Ask the backend whether the final answer follows from the steps.
    async fn check_derivability(
        &self,
        steps: &[TraceStep],
        final_answer: &str,
    ) -> Option<PostHocCheck> {
        let synthetic = derivability_context(steps, final_answer);
        let score = match self.detector.estimate(final_answer, &synthetic).await {
            Ok(score) => score,
            Err(e) => {
                warn!(error = %e, "derivability check unavailable");
                return None;
            }
        };

        let derivable = score >= self.config.derivability_threshold;
        let missing_concepts = if derivable {
            Vec::new()
        } else {
            missing_concepts(final_answer, steps)
        };

        if !derivable {
            self.sink.record(
                DecisionEvent::new(
                    EventKind::PostHocFlag,
                    final_answer.chars().take(80).collect::<String>(),
                )
                .with_field("score", score)
                .with_field(
                    "missing_concepts",
                    missing_concepts.join(","),
                ),
            );
        }
        debug!(score, derivable, "post-hoc derivability checked");

        Some(PostHocCheck {
            derivable,
            score,
            missing_concepts,
        })
    }
}

/// The synthetic context for the post-hoc check: numbered steps plus
/// the derivation question.
fn derivability_context(steps: &[TraceStep], final_answer: &str) -> String {
    let mut context = String::from("Given the following reasoning steps:\n");
    for (i, step) in steps.iter().enumerate() {
        context.push_str(&format!("{}. {}\n", i + 1, step.content));
    }
    context.push_str(&format!(
        "Determine if the following answer can be logically derived: {final_answer}"
    ));
    context
}

/// Content words of the final answer absent from every trace step:
/// length >= 4, not a stopword, first three unique findings in order
/// of appearance.
fn missing_concepts(final_answer: &str, steps: &[TraceStep]) -> Vec<String> {
    let step_words: HashSet<String> = steps
        .iter()
        .flat_map(|s| words_of(&s.content))
        .collect();

    let mut seen = HashSet::new();
    let mut missing = Vec::new();
    for word in words_of(final_answer) {
        if word.len() < MIN_CONCEPT_LEN || STOPWORDS.contains(&word.as_str()) {
            continue;
        }
        if step_words.contains(&word) || !seen.insert(word.clone()) {
            continue;
        }
        missing.push(word);
        if missing.len() == MAX_MISSING_CONCEPTS {
            break;
        }
    }
    missing
}

fn words_of(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}
