//! Deterministic backend for tests and wiring checks.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::{Error, Result};

use super::VerifierBackend;

/// Returns a fixed probability, with optional per-input overrides and
/// scripted failures. Counts every invocation, which lets tests assert
/// how often a wrapper reached the wrapped backend.
pub struct MockBackend {
    default_probability: f64,
    /// Substring of the context -> probability override
    context_overrides: Mutex<HashMap<String, f64>>,
    /// Substring of the claim -> probability override
    claim_overrides: Mutex<HashMap<String, f64>>,
    fail_with: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl MockBackend {
    pub fn new(probability: f64) -> Self {
        Self {
            default_probability: probability.clamp(0.0, 1.0),
            context_overrides: Mutex::new(HashMap::new()),
            claim_overrides: Mutex::new(HashMap::new()),
            fail_with: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Return `probability` whenever the context contains `fragment`.
    pub fn with_context_probability(self, fragment: impl Into<String>, probability: f64) -> Self {
        self.context_overrides
            .lock()
            .expect("overrides lock")
            .insert(fragment.into(), probability.clamp(0.0, 1.0));
        self
    }

    /// Return `probability` whenever the claim contains `fragment`.
    pub fn with_claim_probability(self, fragment: impl Into<String>, probability: f64) -> Self {
        self.claim_overrides
            .lock()
            .expect("overrides lock")
            .insert(fragment.into(), probability.clamp(0.0, 1.0));
        self
    }

    /// Fail every call until [`MockBackend::succeed`] is called.
    pub fn fail(&self, message: impl Into<String>) {
        *self.fail_with.lock().expect("fail lock") = Some(message.into());
    }

    /// Stop failing.
    pub fn succeed(&self) {
        *self.fail_with.lock().expect("fail lock") = None;
    }

    /// Number of estimate calls made so far (batch members count
    /// individually).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn lookup(&self, claim: &str, context: &str) -> Result<f64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(msg) = self.fail_with.lock().expect("fail lock").as_ref() {
            return Err(Error::BackendGeneric(msg.clone()));
        }
        let context_overrides = self.context_overrides.lock().expect("overrides lock");
        for (fragment, p) in context_overrides.iter() {
            if context.contains(fragment) {
                return Ok(*p);
            }
        }
        drop(context_overrides);
        let claim_overrides = self.claim_overrides.lock().expect("overrides lock");
        for (fragment, p) in claim_overrides.iter() {
            if claim.contains(fragment) {
                return Ok(*p);
            }
        }
        Ok(self.default_probability)
    }
}

#[async_trait]
impl VerifierBackend for MockBackend {
    async fn estimate_probability(&self, claim: &str, context: &str) -> Result<f64> {
        self.lookup(claim, context)
    }

    fn name(&self) -> &str {
        "mock"
    }
}
