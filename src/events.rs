//! Structured decision events.
//!
//! Every gate decision produces an event record that can be exported,
//! replayed, or mirrored into the host's logging pipeline. Sinks are
//! pluggable; the default mirrors events as `tracing` records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// Kinds of decision events emitted by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// A verification pass began
    VerifyStart,
    /// A claim was extracted from text
    ClaimExtracted,
    /// Budget metrics were computed for a claim
    BudgetComputed,
    /// A claim was flagged as potentially hallucinated
    HallucinationFlag,
    /// A verification pass completed
    VerifyComplete,
    /// The memory gate admitted a fact
    MemoryAdmit,
    /// The memory gate rejected a fact
    MemoryReject,
    /// The output verifier flagged a response
    OutputFlagged,
    /// The output verifier finished without flagging
    OutputVerified,
    /// A trace step was flagged during audit
    TraceStepFlagged,
    /// The final answer failed the post-hoc derivability check
    PostHocFlag,
    /// A trace audit completed
    AuditComplete,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::VerifyStart => "VERIFY_START",
            Self::ClaimExtracted => "CLAIM_EXTRACTED",
            Self::BudgetComputed => "BUDGET_COMPUTED",
            Self::HallucinationFlag => "HALLUCINATION_FLAG",
            Self::VerifyComplete => "VERIFY_COMPLETE",
            Self::MemoryAdmit => "MEMORY_ADMIT",
            Self::MemoryReject => "MEMORY_REJECT",
            Self::OutputFlagged => "OUTPUT_FLAGGED",
            Self::OutputVerified => "OUTPUT_VERIFIED",
            Self::TraceStepFlagged => "TRACE_STEP_FLAGGED",
            Self::PostHocFlag => "POST_HOC_FLAG",
            Self::AuditComplete => "AUDIT_COMPLETE",
        };
        write!(f, "{s}")
    }
}

/// A structured decision record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionEvent {
    pub kind: EventKind,
    /// Human-readable summary
    pub content: String,
    /// Event-specific fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<HashMap<String, Value>>,
    pub timestamp: DateTime<Utc>,
}

impl DecisionEvent {
    pub fn new(kind: EventKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            fields: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.as_ref()?.get(key)
    }

    /// Event for a flagged claim.
    pub fn hallucination_flag(claim: &str, gap: f64, verdict: impl std::fmt::Display) -> Self {
        let preview: String = claim.chars().take(80).collect();
        Self::new(EventKind::HallucinationFlag, preview)
            .with_field("gap", gap)
            .with_field("verdict", verdict.to_string())
    }

    /// Event for a memory-gate decision.
    pub fn memory_decision(admitted: bool, content: &str, reason: &str) -> Self {
        let kind = if admitted {
            EventKind::MemoryAdmit
        } else {
            EventKind::MemoryReject
        };
        let preview: String = content.chars().take(80).collect();
        Self::new(kind, preview).with_field("reason", reason)
    }
}

/// Destination for decision events.
pub trait EventSink: Send + Sync {
    fn record(&self, event: DecisionEvent);
}

/// Collects events in memory; useful for tests and export.
#[derive(Default)]
pub struct VecSink {
    events: Mutex<Vec<DecisionEvent>>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DecisionEvent> {
        self.events.lock().expect("sink lock").clone()
    }

    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.events
            .lock()
            .expect("sink lock")
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }
}

impl EventSink for VecSink {
    fn record(&self, event: DecisionEvent) {
        self.events.lock().expect("sink lock").push(event);
    }
}

/// Mirrors events into the `tracing` pipeline.
#[derive(Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: DecisionEvent) {
        debug!(kind = %event.kind, content = %event.content, "decision event");
    }
}
