//! Claim extraction from agent output.
//!
//! Turns raw text into sentence-level [`Claim`]s: a shallow sentence
//! splitter, an assertive/non-assertive classifier, stated-confidence
//! inference from hedge and certainty markers, and bracketed-citation
//! extraction.
//!
//! The sentence splitter is intentionally shallow: it breaks on '.',
//! '!', '?' only when followed by end of text, a newline, or a space and
//! an uppercase letter. Abbreviation handling is out of scope; callers
//! needing better segmentation can pre-split and feed sentences
//! individually.

use regex::Regex;
use std::collections::HashMap;

use crate::types::{Citation, Claim};

/// Minimum sentence length (after trimming) to become a claim.
const MIN_SENTENCE_LEN: usize = 10;

/// Maximum citation token length; longer bracketed spans are prose.
const MAX_CITATION_LEN: usize = 50;

/// Sentence prefixes that mark an instruction rather than an assertion.
const IMPERATIVE_MARKERS: &[&str] = &[
    "please ",
    "let me ",
    "let's ",
    "try ",
    "consider ",
    "note that ",
    "remember ",
    "don't ",
    "do not ",
    "make sure ",
    "be sure ",
    "ensure ",
    "check ",
    "run ",
    "execute ",
    "open ",
    "close ",
    "click ",
    "go to ",
    "navigate ",
    "select ",
    "choose ",
];

/// Sentence prefixes that mark meta-commentary about the response itself.
const META_MARKERS: &[&str] = &[
    "i'll ",
    "i will ",
    "i can ",
    "i would ",
    "here's ",
    "here is ",
    "this is ",
    "let me explain",
    "to summarize",
    "in summary",
    "as mentioned",
    "as i said",
    "as noted",
];

/// Bracketed tokens that are editorial, not citations.
const CITATION_BLACKLIST: &[&str] = &[
    "edit",
    "note",
    "todo",
    "sic",
    "emphasis added",
    "emphasis mine",
    "citation needed",
    "clarification needed",
];

/// Extracts sentence-level claims from text.
pub struct ClaimExtractor {
    hedge_start_re: Regex,
    hedge_modal_re: Regex,
    hedge_uncertain_re: Regex,
    hedge_approx_re: Regex,
    certainty_re: Regex,
    moderate_re: Regex,
    citation_re: Regex,
}

impl Default for ClaimExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ClaimExtractor {
    pub fn new() -> Self {
        Self {
            hedge_start_re: Regex::new(
                r"(?i)^(i think|i believe|maybe|perhaps|possibly|probably|it seems|appears to)",
            )
            .expect("static regex"),
            hedge_modal_re: Regex::new(r"(?i)\b(might|could be|may be|could)\b")
                .expect("static regex"),
            hedge_uncertain_re: Regex::new(r"(?i)(i'm not sure|not certain|unclear|uncertain)")
                .expect("static regex"),
            hedge_approx_re: Regex::new(r"(?i)\b(approximately|roughly|about|around|estimated)\b")
                .expect("static regex"),
            certainty_re: Regex::new(
                r"(?i)\b(definitely|certainly|absolutely|always|never|must be|is guaranteed|without doubt)\b",
            )
            .expect("static regex"),
            moderate_re: Regex::new(r"(?i)\b(usually|typically|generally|often|commonly)\b")
                .expect("static regex"),
            citation_re: Regex::new(r"\[([^\[\]]*)\]").expect("static regex"),
        }
    }

    /// Extract every sentence above the length floor as a claim, with
    /// the assertive flag set by the classifier.
    pub fn extract(&self, text: &str, source: &str) -> Vec<Claim> {
        let mut claims = Vec::new();

        for (start, sentence) in split_sentences(text) {
            let trimmed = sentence.trim();
            if trimmed.len() < MIN_SENTENCE_LEN {
                continue;
            }
            // Offset of the trimmed sentence in the original text
            let lead = sentence.len() - sentence.trim_start().len();
            let offset = start + lead;

            let assertive = self.is_assertive(trimmed);
            let confidence = self.infer_confidence(trimmed);
            let citations = self.extract_citations(trimmed);

            claims.push(Claim {
                content: trimmed.to_string(),
                citations,
                confidence,
                source: source.to_string(),
                offset,
                assertive,
            });
        }

        claims
    }

    /// Extract only assertive claims.
    pub fn extract_assertive(&self, text: &str, source: &str) -> Vec<Claim> {
        self.extract(text, source)
            .into_iter()
            .filter(|c| c.assertive)
            .collect()
    }

    /// Populate citation texts from the evidence map and return each
    /// claim paired with its resolved evidence, lines joined by '\n'.
    pub fn resolve_citations(
        &self,
        claims: Vec<Claim>,
        evidence: &HashMap<String, String>,
    ) -> Vec<(Claim, String)> {
        claims
            .into_iter()
            .map(|mut claim| {
                let mut lines = Vec::new();
                for citation in &mut claim.citations {
                    if let Some(text) = evidence.get(&citation.id) {
                        citation.text = Some(text.clone());
                        lines.push(text.as_str());
                    }
                }
                let joined = lines.join("\n");
                (claim, joined)
            })
            .collect()
    }

    /// Remove every `[...]` occurrence from the text.
    pub fn strip_citations(&self, text: &str) -> String {
        self.citation_re.replace_all(text, "").into_owned()
    }

    fn is_assertive(&self, sentence: &str) -> bool {
        if sentence.ends_with('?') {
            return false;
        }
        let lower = sentence.to_lowercase();
        if IMPERATIVE_MARKERS.iter().any(|m| lower.starts_with(m)) {
            return false;
        }
        if META_MARKERS.iter().any(|m| lower.starts_with(m)) {
            return false;
        }
        true
    }

    /// Infer the confidence the sentence itself states. Hedges win over
    /// certainty markers; the default is 0.9.
    fn infer_confidence(&self, sentence: &str) -> f64 {
        if self.hedge_start_re.is_match(sentence)
            || self.hedge_modal_re.is_match(sentence)
            || self.hedge_uncertain_re.is_match(sentence)
            || self.hedge_approx_re.is_match(sentence)
        {
            return 0.6;
        }
        if self.certainty_re.is_match(sentence) {
            return 0.95;
        }
        if self.moderate_re.is_match(sentence) {
            return 0.8;
        }
        0.9
    }

    fn extract_citations(&self, sentence: &str) -> Vec<Citation> {
        self.citation_re
            .captures_iter(sentence)
            .filter_map(|cap| {
                let whole = cap.get(0).expect("match group 0");
                let token = cap.get(1).expect("match group 1").as_str().trim();
                if token.is_empty() || token.len() > MAX_CITATION_LEN {
                    return None;
                }
                let lower = token.to_lowercase();
                if CITATION_BLACKLIST.contains(&lower.as_str()) {
                    return None;
                }
                Some(Citation::new(token, whole.start(), whole.end()))
            })
            .collect()
    }
}

/// Shallow sentence splitter. Returns (byte offset, sentence slice)
/// pairs with strictly increasing offsets.
pub fn split_sentences(text: &str) -> Vec<(usize, &str)> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;

    while i < chars.len() {
        let (_, c) = chars[i];
        if matches!(c, '.' | '!' | '?') {
            // A run of terminators belongs to the sentence it ends
            let mut last = i;
            while last + 1 < chars.len() && matches!(chars[last + 1].1, '.' | '!' | '?') {
                last += 1;
            }
            let end = chars
                .get(last + 1)
                .map(|(p, _)| *p)
                .unwrap_or_else(|| text.len());

            let boundary = match chars.get(last + 1) {
                None => true,
                Some((_, '\n')) => true,
                Some((_, ' ')) => chars
                    .get(last + 2)
                    .map(|(_, next)| next.is_uppercase())
                    .unwrap_or(false),
                _ => false,
            };

            if boundary {
                if end > start {
                    sentences.push((start, &text[start..end]));
                }
                i = last + 1;
                while i < chars.len() && chars[i].1.is_whitespace() {
                    i += 1;
                }
                start = chars.get(i).map(|(p, _)| *p).unwrap_or_else(|| text.len());
                continue;
            }
            i = last + 1;
            continue;
        }
        i += 1;
    }

    if start < text.len() {
        sentences.push((start, &text[start..]));
    }

    sentences
}
