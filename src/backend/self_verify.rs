//! Self-verification backends.
//!
//! Asks a completer whether a claim is true given a context, as a
//! YES/NO question. When the completer exposes token log-probabilities
//! a single call yields a calibrated probability; otherwise the answer
//! distribution is estimated by repeated sampling.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::completer::Completer;
use crate::error::Result;

use super::VerifierBackend;

/// Tokens treated as an affirmative answer in the log-probability map.
const YES_TOKENS: &[&str] = &["YES", "Y", "TRUE"];

/// Tokens treated as a negative answer in the log-probability map.
const NO_TOKENS: &[&str] = &["NO", "N", "FALSE"];

/// Configuration for self-verification.
#[derive(Debug, Clone)]
pub struct SelfVerifyConfig {
    /// Completions per estimate on the sampling path
    pub n_samples: u32,
    /// Token budget for each answer
    pub answer_max_tokens: u32,
}

impl Default for SelfVerifyConfig {
    fn default() -> Self {
        Self {
            n_samples: 5,
            answer_max_tokens: 8,
        }
    }
}

/// Verifies claims by asking the generating model itself.
pub struct SelfVerifyBackend {
    completer: Arc<dyn Completer>,
    config: SelfVerifyConfig,
    /// Probed once at construction
    use_logprobs: bool,
    name: &'static str,
}

impl SelfVerifyBackend {
    pub fn new(completer: Arc<dyn Completer>, config: SelfVerifyConfig) -> Self {
        let use_logprobs = completer.supports_logprobs();
        Self {
            completer,
            config,
            use_logprobs,
            name: "self-verify",
        }
    }

    fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Whether this backend will use the log-probability path.
    pub fn uses_logprobs(&self) -> bool {
        self.use_logprobs
    }

    async fn estimate_via_logprobs(&self, prompt: &str) -> Result<f64> {
        let (_, logprobs) = self
            .completer
            .complete_with_logprobs(prompt, self.config.answer_max_tokens)
            .await?;

        let lookup = |tokens: &[&str]| -> Option<f64> {
            tokens.iter().find_map(|token| {
                logprobs
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(token))
                    .map(|(_, lp)| *lp)
            })
        };

        let mass_yes = lookup(YES_TOKENS).map(f64::exp).unwrap_or(0.0);
        let mass_no = lookup(NO_TOKENS).map(f64::exp).unwrap_or(0.0);

        if mass_yes + mass_no == 0.0 {
            debug!(backend = self.name, "no YES/NO tokens in logprobs, returning 0.5");
            return Ok(0.5);
        }
        Ok(mass_yes / (mass_yes + mass_no))
    }

    async fn estimate_via_sampling(&self, prompt: &str) -> Result<f64> {
        let total = self.config.n_samples.max(1);
        let mut yes = 0u32;

        for _ in 0..total {
            match self
                .completer
                .complete(prompt, self.config.answer_max_tokens)
                .await
            {
                Ok(response) => {
                    if is_yes_response(&response) {
                        yes += 1;
                    }
                }
                // Errors count against the denominator: an unreachable
                // completer must not look like agreement
                Err(e) => {
                    debug!(backend = self.name, error = %e, "sample failed");
                }
            }
        }

        Ok(yes as f64 / total as f64)
    }
}

#[async_trait]
impl VerifierBackend for SelfVerifyBackend {
    async fn estimate_probability(&self, claim: &str, context: &str) -> Result<f64> {
        let prompt = verification_prompt(claim, context);
        if self.use_logprobs {
            self.estimate_via_logprobs(&prompt).await
        } else {
            self.estimate_via_sampling(&prompt).await
        }
    }

    fn name(&self) -> &str {
        self.name
    }
}

/// Same verification shape bound to a secondary, cheaper completer.
pub struct SmallModelBackend {
    inner: SelfVerifyBackend,
}

impl SmallModelBackend {
    pub fn new(completer: Arc<dyn Completer>, config: SelfVerifyConfig) -> Self {
        Self {
            inner: SelfVerifyBackend::new(completer, config).named("small-model"),
        }
    }
}

#[async_trait]
impl VerifierBackend for SmallModelBackend {
    async fn estimate_probability(&self, claim: &str, context: &str) -> Result<f64> {
        self.inner.estimate_probability(claim, context).await
    }

    fn name(&self) -> &str {
        self.inner.name
    }
}

/// The verification prompt sent to the completer.
fn verification_prompt(claim: &str, context: &str) -> String {
    format!(
        "Given the following context:\n{context}\n\n\
         Is the following claim true? Answer only YES or NO.\n\
         Claim: {claim}\n\nAnswer:"
    )
}

/// Whether a sampled response counts as affirmative: trimmed and
/// lowercased, it must begin with "y" or "true". "Yes, that is correct"
/// counts; "maybe" does not.
fn is_yes_response(response: &str) -> bool {
    let normalized = response.trim().to_lowercase();
    normalized.starts_with('y') || normalized.starts_with("true")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completer::ScriptedCompleter;
    use std::collections::HashMap;

    #[test]
    fn test_is_yes_response() {
        assert!(is_yes_response("YES"));
        assert!(is_yes_response("  yes  "));
        assert!(is_yes_response("Yes, that is correct"));
        assert!(is_yes_response("true"));
        assert!(is_yes_response("True."));
        assert!(!is_yes_response("maybe"));
        assert!(!is_yes_response("NO"));
        assert!(!is_yes_response("not really"));
        assert!(!is_yes_response(""));
    }

    #[test]
    fn test_prompt_shape() {
        let prompt = verification_prompt("the sky is blue", "weather report");
        assert_eq!(
            prompt,
            "Given the following context:\nweather report\n\n\
             Is the following claim true? Answer only YES or NO.\n\
             Claim: the sky is blue\n\nAnswer:"
        );
    }

    #[tokio::test]
    async fn test_sampling_majority() {
        let completer = Arc::new(ScriptedCompleter::new(["YES", "NO", "YES", "NO", "YES"]));
        let backend = SelfVerifyBackend::new(completer.clone(), SelfVerifyConfig::default());
        assert!(!backend.uses_logprobs());

        let p = backend.estimate_probability("claim", "ctx").await.unwrap();
        assert!((p - 0.6).abs() < 1e-9);
        assert_eq!(completer.calls(), 5);
    }

    #[tokio::test]
    async fn test_sampling_tolerates_errors() {
        // Two failures keep the denominator at 5: 2 yes / 5 total
        let completer = Arc::new(ScriptedCompleter::with_script(vec![
            Ok("YES".to_string()),
            Err("flaky".to_string()),
            Ok("yes indeed".to_string()),
            Err("flaky".to_string()),
            Ok("NO".to_string()),
        ]));
        let backend = SelfVerifyBackend::new(completer, SelfVerifyConfig::default());
        let p = backend.estimate_probability("claim", "ctx").await.unwrap();
        assert!((p - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_sampling_all_errors_is_zero() {
        let completer = Arc::new(ScriptedCompleter::with_script(vec![
            Err("down".to_string());
            5
        ]));
        let backend = SelfVerifyBackend::new(completer, SelfVerifyConfig::default());
        let p = backend.estimate_probability("claim", "ctx").await.unwrap();
        assert_eq!(p, 0.0);
    }

    #[tokio::test]
    async fn test_logprob_path() {
        let completer = Arc::new(ScriptedCompleter::new(["YES"]).with_logprobs(HashMap::from([
            ("YES".to_string(), -0.1),
            ("NO".to_string(), -2.5),
        ])));
        let backend = SelfVerifyBackend::new(completer.clone(), SelfVerifyConfig::default());
        assert!(backend.uses_logprobs());

        let p = backend.estimate_probability("claim", "ctx").await.unwrap();
        assert!(p > 0.9, "p = {p}");
        // One completion, not n_samples
        assert_eq!(completer.calls(), 1);
    }

    #[tokio::test]
    async fn test_logprob_case_insensitive_keys() {
        let completer = Arc::new(ScriptedCompleter::new(["yes"]).with_logprobs(HashMap::from([
            ("yes".to_string(), -0.2),
            ("no".to_string(), -3.0),
        ])));
        let backend = SelfVerifyBackend::new(completer, SelfVerifyConfig::default());
        let p = backend.estimate_probability("claim", "ctx").await.unwrap();
        assert!(p > 0.9);
    }

    #[tokio::test]
    async fn test_logprob_missing_tokens_neutral() {
        let completer = Arc::new(
            ScriptedCompleter::new(["hmm"])
                .with_logprobs(HashMap::from([("HMM".to_string(), -0.5)])),
        );
        let backend = SelfVerifyBackend::new(completer, SelfVerifyConfig::default());
        let p = backend.estimate_probability("claim", "ctx").await.unwrap();
        assert_eq!(p, 0.5);
    }

    #[tokio::test]
    async fn test_logprob_only_yes_present() {
        let completer = Arc::new(
            ScriptedCompleter::new(["YES"])
                .with_logprobs(HashMap::from([("YES".to_string(), -0.3)])),
        );
        let backend = SelfVerifyBackend::new(completer, SelfVerifyConfig::default());
        let p = backend.estimate_probability("claim", "ctx").await.unwrap();
        assert_eq!(p, 1.0);
    }

    #[tokio::test]
    async fn test_small_model_backend_name() {
        let completer = Arc::new(ScriptedCompleter::new(["YES"; 5]));
        let backend = SmallModelBackend::new(completer, SelfVerifyConfig::default());
        assert_eq!(backend.name(), "small-model");
        let p = backend.estimate_probability("claim", "ctx").await.unwrap();
        assert_eq!(p, 1.0);
    }
}
