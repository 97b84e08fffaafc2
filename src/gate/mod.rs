//! Decision gates built on the detector.
//!
//! Three gates consume verification results, each with its own policy:
//! the memory gate is the only component that hard-rejects, the output
//! verifier only warns, and the trace auditor grades reasoning traces.

pub mod memory;
pub mod output;
pub mod trace;

pub use memory::{FactDecision, GateStats, MemoryGate, MemoryGateConfig, RejectedFact};
pub use output::{CorrectionHint, FlaggedClaim, OutputCheck, OutputVerifier, OutputVerifierConfig};
pub use trace::{TraceAuditor, TraceAuditorConfig};
