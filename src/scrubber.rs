//! Evidence scrubbing for pseudo-prior estimation.
//!
//! Produces the "no evidence" twin of a context string: cited evidence
//! is cut out and replaced with a marker, and the result is fed back to
//! the backend to estimate P0. Four ways of naming what to remove are
//! supported: explicit positions, resolved citations, exact substrings,
//! and delimited sections.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Default replacement marker.
pub const EVIDENCE_MARKER: &str = "[EVIDENCE REMOVED]";

/// A half-open byte range `[start, end)` into a context string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceSpan {
    /// Identifier; merged spans join their ids with '+'
    pub id: String,
    pub start: usize,
    pub end: usize,
    /// The spanned text
    pub text: String,
}

impl EvidenceSpan {
    pub fn new(id: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            id: id.into(),
            start,
            end,
            text: String::new(),
        }
    }
}

/// Result of one scrub call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrubResult {
    pub original: String,
    pub scrubbed: String,
    /// Spans actually removed, after validity filtering and merging
    pub removed_spans: Vec<EvidenceSpan>,
}

impl ScrubResult {
    /// Whether anything was removed.
    pub fn changed(&self) -> bool {
        !self.removed_spans.is_empty()
    }

    /// Total bytes removed from the original.
    pub fn removed_len(&self) -> usize {
        self.removed_spans.iter().map(|s| s.end - s.start).sum()
    }
}

/// Configuration for scrubbing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrubConfig {
    /// Replacement marker text
    pub marker: String,
    /// Mirror the removed slice's paragraph/line structure with
    /// repeated markers
    pub preserve_structure: bool,
}

impl Default for ScrubConfig {
    fn default() -> Self {
        Self {
            marker: EVIDENCE_MARKER.to_string(),
            preserve_structure: false,
        }
    }
}

impl ScrubConfig {
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    pub fn preserving_structure(mut self) -> Self {
        self.preserve_structure = true;
        self
    }
}

/// Removes evidence from context strings.
#[derive(Debug, Clone, Default)]
pub struct EvidenceScrubber {
    config: ScrubConfig,
}

impl EvidenceScrubber {
    pub fn new(config: ScrubConfig) -> Self {
        Self { config }
    }

    /// Position-based scrubbing. Invalid spans (out of range, empty, or
    /// not on character boundaries) are skipped; overlapping or
    /// adjacent spans merge into one removed span with '+'-joined ids.
    pub fn scrub_spans(&self, context: &str, spans: &[EvidenceSpan]) -> ScrubResult {
        let mut valid: Vec<EvidenceSpan> = spans
            .iter()
            .filter(|s| {
                s.start < s.end
                    && s.end <= context.len()
                    && context.is_char_boundary(s.start)
                    && context.is_char_boundary(s.end)
            })
            .cloned()
            .collect();
        valid.sort_by_key(|s| s.start);

        let mut merged: Vec<EvidenceSpan> = Vec::new();
        for span in valid {
            match merged.last_mut() {
                Some(last) if span.start <= last.end => {
                    if span.end > last.end {
                        last.end = span.end;
                    }
                    last.id = format!("{}+{}", last.id, span.id);
                }
                _ => merged.push(span),
            }
        }

        let mut scrubbed = String::with_capacity(context.len());
        let mut cursor = 0usize;
        for span in &mut merged {
            scrubbed.push_str(&context[cursor..span.start]);
            let removed = &context[span.start..span.end];
            span.text = removed.to_string();
            scrubbed.push_str(&self.replacement_for(removed));
            cursor = span.end;
        }
        scrubbed.push_str(&context[cursor..]);

        ScrubResult {
            original: context.to_string(),
            scrubbed,
            removed_spans: merged,
        }
    }

    /// Citation-based scrubbing: resolve each id through the evidence
    /// map and remove every occurrence of the resolved text.
    pub fn scrub_citations(
        &self,
        context: &str,
        citation_ids: &[&str],
        evidence: &HashMap<String, String>,
    ) -> ScrubResult {
        let mut spans = Vec::new();
        for id in citation_ids {
            let Some(text) = evidence.get(*id) else {
                continue;
            };
            if text.is_empty() {
                continue;
            }
            for (pos, found) in context.match_indices(text.as_str()) {
                spans.push(EvidenceSpan::new(*id, pos, pos + found.len()));
            }
        }
        self.scrub_spans(context, &spans)
    }

    /// Pattern-based scrubbing: remove every exact occurrence of each
    /// pattern string.
    pub fn scrub_patterns(&self, context: &str, patterns: &[&str]) -> ScrubResult {
        let mut spans = Vec::new();
        for pattern in patterns {
            if pattern.is_empty() {
                continue;
            }
            for (pos, found) in context.match_indices(*pattern) {
                spans.push(EvidenceSpan::new(*pattern, pos, pos + found.len()));
            }
        }
        self.scrub_spans(context, &spans)
    }

    /// Section-based scrubbing: remove every region between the
    /// delimiters, delimiters included. A start without a matching end
    /// extends to the end of the context.
    pub fn scrub_sections(
        &self,
        context: &str,
        start_delim: &str,
        end_delim: &str,
    ) -> ScrubResult {
        let mut spans = Vec::new();
        if !start_delim.is_empty() {
            let mut search_from = 0usize;
            let mut section = 0usize;
            while let Some(rel) = context[search_from..].find(start_delim) {
                let start = search_from + rel;
                let body_from = start + start_delim.len();
                let end = if end_delim.is_empty() {
                    context.len()
                } else {
                    match context[body_from..].find(end_delim) {
                        Some(rel_end) => body_from + rel_end + end_delim.len(),
                        None => context.len(),
                    }
                };
                spans.push(EvidenceSpan::new(format!("section-{section}"), start, end));
                section += 1;
                if end >= context.len() {
                    break;
                }
                search_from = end;
            }
        }
        self.scrub_spans(context, &spans)
    }

    /// Replacement text for one removed slice. With structure
    /// preservation on, paragraph and line counts survive the removal.
    fn replacement_for(&self, removed: &str) -> String {
        if !self.config.preserve_structure {
            return self.config.marker.clone();
        }
        if removed.contains("\n\n") {
            let paragraphs = removed.split("\n\n").count();
            return vec![self.config.marker.as_str(); paragraphs].join("\n\n");
        }
        if removed.contains('\n') {
            let lines = removed.split('\n').count();
            return vec![self.config.marker.as_str(); lines].join("\n");
        }
        self.config.marker.clone()
    }
}
