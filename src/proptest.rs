//! Property-based tests for the verification invariants.
//!
//! These cover the universal invariants: KL identity and
//! non-negativity, the gap identity, extractor offset monotonicity,
//! scrubber no-op and merge behavior, and adjusted-confidence bounds.

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::budget::{compute_budget, compute_budget_interval, kl_bits, trust_from_gap};
    use crate::extractor::{split_sentences, ClaimExtractor};
    use crate::scrubber::{EvidenceScrubber, EvidenceSpan};
    use crate::types::Verdict;

    fn probability() -> impl Strategy<Value = f64> {
        0.01f64..0.99f64
    }

    fn probability_with_edges() -> impl Strategy<Value = f64> {
        prop_oneof![
            Just(0.0),
            Just(0.5),
            Just(1.0),
            0.0f64..1.0f64,
        ]
    }

    // =========================================================================
    // KL divergence
    // =========================================================================

    proptest! {
        /// KL(p, p) = 0 for every p.
        #[test]
        fn kl_identity_is_zero(p in probability()) {
            prop_assert!(kl_bits(p, p).abs() < 1e-9);
        }

        /// KL is non-negative everywhere, including the clamped edges.
        #[test]
        fn kl_is_non_negative(
            p in probability_with_edges(),
            q in probability_with_edges()
        ) {
            let kl = kl_bits(p, q);
            prop_assert!(kl >= -1e-12, "KL({}, {}) = {}", p, q, kl);
            prop_assert!(kl.is_finite());
        }

        /// KL grows as the distributions separate (fixed reference).
        #[test]
        fn kl_monotone_in_separation(delta in 0.01f64..0.4f64) {
            let near = kl_bits(0.5 + delta / 2.0, 0.5);
            let far = kl_bits(0.5 + delta, 0.5);
            prop_assert!(far >= near - 1e-12);
        }
    }

    // =========================================================================
    // Budget computation
    // =========================================================================

    proptest! {
        /// gap = required - observed, always.
        #[test]
        fn gap_identity(
            p0 in probability_with_edges(),
            p1 in probability_with_edges(),
            target in probability_with_edges()
        ) {
            let b = compute_budget(p0, p1, target);
            prop_assert!((b.gap - (b.required_bits - b.observed_bits)).abs() < 1e-9);
        }

        /// Inputs are clamped to [0.01, 0.99].
        #[test]
        fn budget_inputs_clamped(
            p0 in -1.0f64..2.0f64,
            p1 in -1.0f64..2.0f64,
            target in -1.0f64..2.0f64
        ) {
            let b = compute_budget(p0, p1, target);
            for v in [b.p0, b.p1, b.target] {
                prop_assert!((0.01..=0.99).contains(&v));
            }
        }

        /// Adjusted confidence stays in [0, 1] and never exceeds p1
        /// when something was required.
        #[test]
        fn adjusted_confidence_bounded(
            p0 in probability(),
            p1 in probability(),
            target in probability()
        ) {
            let b = compute_budget(p0, p1, target);
            prop_assert!((0.0..=1.0).contains(&b.adjusted_confidence));
            if b.required_bits > 0.0 {
                prop_assert!(b.adjusted_confidence <= b.p1 + 1e-9);
            }
        }

        /// A non-positive gap always classifies as Grounded.
        #[test]
        fn non_positive_gap_not_unsupported(
            p0 in probability(),
            p1 in 0.3f64..0.99f64,
            target in probability()
        ) {
            let b = compute_budget(p0, p1, target);
            if b.gap <= 0.0 && !(b.p1 < 0.3 && b.p0 > 0.5) {
                prop_assert_eq!(b.verdict, Verdict::Grounded);
            }
        }

        /// compute_budget never emits Unverifiable; that verdict is
        /// reserved for absorbed errors.
        #[test]
        fn budget_never_unverifiable(
            p0 in probability_with_edges(),
            p1 in probability_with_edges(),
            target in probability_with_edges()
        ) {
            let b = compute_budget(p0, p1, target);
            prop_assert!(b.verdict != Verdict::Unverifiable);
        }

        /// Trust is in (0, 1) and decreasing in the gap.
        #[test]
        fn trust_bounded_and_monotone(gap in -10.0f64..10.0f64) {
            let t = trust_from_gap(gap);
            prop_assert!(t > 0.0 && t < 1.0);
            prop_assert!(trust_from_gap(gap + 0.5) <= t);
        }

        /// The interval variant brackets the point computation.
        #[test]
        fn interval_brackets_point(
            p0 in probability(),
            p1 in probability(),
            target in probability(),
            spread in 0.0f64..0.1f64
        ) {
            let b = compute_budget(p0, p1, target);
            let iv = compute_budget_interval(
                p0 - spread, p0 + spread,
                p1 - spread, p1 + spread,
                target,
            );
            prop_assert!(iv.gap_best <= b.gap + 1e-9);
            prop_assert!(iv.gap_worst >= b.gap - 1e-9);
        }
    }

    // =========================================================================
    // Extractor
    // =========================================================================

    proptest! {
        /// Sentence start offsets are strictly increasing and point
        /// into the original text.
        #[test]
        fn sentence_offsets_strictly_increase(text in "[A-Za-z0-9 .!?\n]{0,300}") {
            let sentences = split_sentences(&text);
            for pair in sentences.windows(2) {
                prop_assert!(pair[1].0 > pair[0].0);
            }
            for (offset, sentence) in &sentences {
                prop_assert!(text[*offset..].starts_with(sentence));
            }
        }

        /// Extracted claims always carry a confidence from the fixed
        /// inference set and sit above the length floor.
        #[test]
        fn claims_have_valid_confidence(text in "[A-Za-z ,.!?]{0,300}") {
            let extractor = ClaimExtractor::new();
            for claim in extractor.extract(&text, "prop") {
                prop_assert!([0.6, 0.8, 0.9, 0.95].contains(&claim.confidence));
                prop_assert!(claim.content.len() >= 10);
            }
        }

        /// Stripping citations only removes text, and is the identity
        /// on bracket-free input.
        #[test]
        fn strip_citations_only_removes(text in "[a-z \\[\\]0-9]{0,200}") {
            let extractor = ClaimExtractor::new();
            let stripped = extractor.strip_citations(&text);
            prop_assert!(stripped.len() <= text.len());
            if !text.contains('[') && !text.contains(']') {
                prop_assert_eq!(stripped, text);
            }
        }
    }

    // =========================================================================
    // Scrubber
    // =========================================================================

    proptest! {
        /// Scrubbing with no spans or only invalid spans is a no-op.
        #[test]
        fn invalid_spans_are_noop(
            text in "[a-zA-Z0-9 ]{0,100}",
            start in 200usize..300,
            end in 0usize..100
        ) {
            let scrubber = EvidenceScrubber::default();
            let spans = [
                EvidenceSpan::new("oob", start, start + 50),
                EvidenceSpan::new("backwards", end.max(1), 0),
            ];
            let result = scrubber.scrub_spans(&text, &spans);
            prop_assert_eq!(result.scrubbed, text);
            prop_assert!(result.removed_spans.is_empty());
        }

        /// Overlapping or adjacent spans always merge to one entry.
        #[test]
        fn overlapping_spans_merge(
            len in 20usize..100,
            a_start in 0usize..10,
            a_len in 1usize..10,
            overlap in 0usize..5
        ) {
            let text: String = "x".repeat(len);
            let a_end = (a_start + a_len).min(len);
            let b_start = a_end.saturating_sub(overlap);
            let b_end = (b_start + 5).min(len);

            prop_assume!(a_start < a_end && b_start < b_end);

            let scrubber = EvidenceScrubber::default();
            let spans = [
                EvidenceSpan::new("a", a_start, a_end),
                EvidenceSpan::new("b", b_start, b_end),
            ];
            let result = scrubber.scrub_spans(&text, &spans);
            prop_assert_eq!(result.removed_spans.len(), 1);
        }

        /// Removed spans never exceed the input span count, and the
        /// scrubbed text contains the marker exactly once per removed
        /// span for marker-free inputs.
        #[test]
        fn removed_span_count_bounded(
            len in 10usize..100,
            cuts in proptest::collection::vec((0usize..100, 1usize..20), 0..5)
        ) {
            let text: String = "y".repeat(len);
            let spans: Vec<EvidenceSpan> = cuts
                .iter()
                .enumerate()
                .map(|(i, (start, width))| {
                    EvidenceSpan::new(format!("s{i}"), *start, start + width)
                })
                .collect();

            let scrubber = EvidenceScrubber::default();
            let result = scrubber.scrub_spans(&text, &spans);
            prop_assert!(result.removed_spans.len() <= spans.len());
            prop_assert_eq!(
                result.scrubbed.matches("[EVIDENCE REMOVED]").count(),
                result.removed_spans.len()
            );
        }
    }
}
