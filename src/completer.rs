//! The text-completion collaborator consumed by the self-verify backend.
//!
//! The completion service itself lives outside this crate; only the
//! capability is defined here. Log-probability support is optional and
//! feature-detected at backend construction via
//! [`Completer::supports_logprobs`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::error::{Error, Result};

/// A text-completion service.
#[async_trait]
pub trait Completer: Send + Sync {
    /// Complete a prompt, returning the generated text.
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String>;

    /// Complete a prompt and return token log-probabilities alongside
    /// the text. The default implementation completes without
    /// log-probabilities; implementors that set
    /// [`supports_logprobs`](Completer::supports_logprobs) must
    /// override it.
    async fn complete_with_logprobs(
        &self,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<(String, HashMap<String, f64>)> {
        let text = self.complete(prompt, max_tokens).await?;
        Ok((text, HashMap::new()))
    }

    /// Whether this completer can supply token log-probabilities.
    fn supports_logprobs(&self) -> bool {
        false
    }
}

/// Scripted completer for tests: replays a fixed sequence of responses
/// and records every prompt it receives.
pub struct ScriptedCompleter {
    script: Mutex<VecDeque<std::result::Result<String, String>>>,
    logprobs: Option<HashMap<String, f64>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedCompleter {
    /// Replay the given responses in order.
    pub fn new(responses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            script: Mutex::new(responses.into_iter().map(|r| Ok(r.into())).collect()),
            logprobs: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Replay a mix of successes and failures.
    pub fn with_script(script: Vec<std::result::Result<String, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            logprobs: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Supply log-probabilities with every completion, enabling the
    /// capability probe.
    pub fn with_logprobs(mut self, logprobs: HashMap<String, f64>) -> Self {
        self.logprobs = Some(logprobs);
        self
    }

    /// Prompts received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompts lock").clone()
    }

    /// Number of completions issued so far.
    pub fn calls(&self) -> usize {
        self.prompts.lock().expect("prompts lock").len()
    }

    fn next(&self, prompt: &str) -> Result<String> {
        self.prompts
            .lock()
            .expect("prompts lock")
            .push(prompt.to_string());
        match self.script.lock().expect("script lock").pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(msg)) => Err(Error::BackendGeneric(msg)),
            None => Err(Error::backend("scripted completer exhausted")),
        }
    }
}

#[async_trait]
impl Completer for ScriptedCompleter {
    async fn complete(&self, prompt: &str, _max_tokens: u32) -> Result<String> {
        self.next(prompt)
    }

    async fn complete_with_logprobs(
        &self,
        prompt: &str,
        _max_tokens: u32,
    ) -> Result<(String, HashMap<String, f64>)> {
        let text = self.next(prompt)?;
        Ok((text, self.logprobs.clone().unwrap_or_default()))
    }

    fn supports_logprobs(&self) -> bool {
        self.logprobs.is_some()
    }
}
