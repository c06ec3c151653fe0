//! Ports to the semantic oracles: topic location and summarization.
//!
//! The engine only sees [`BoundaryOracle`] and [`SummaryOracle`]; everything
//! behind them (HTTP, retries, prompts) stays in this module.

pub mod local;
pub mod prompts;
pub mod providers;
pub mod retry;

use crate::decant::config::OracleConfig;
use crate::decant::transcript::Exchange;
use crate::error::DecantError;
use local::LocalOracle;
use providers::{CallError, Completion, HttpCompletion, ModelSelection, resolve_model};
use retry::{RetryPolicy, run_with_retry};

#[derive(Debug, Clone)]
pub struct TopicQuery {
    pub topic: String,
    /// Labelled main-line transcript.
    pub transcript: String,
    pub exchanges: Vec<Exchange>,
}

#[derive(Debug, Clone)]
pub struct SummaryQuery {
    /// Rendered head of the conversation.
    pub transcript: String,
    pub exchanges: Vec<Exchange>,
    pub max_tokens: u32,
}

pub trait BoundaryOracle {
    /// A record id, or `NOT_FOUND`. The answer is validated by the caller.
    fn locate(&self, query: &TopicQuery) -> Result<String, DecantError>;
}

pub trait SummaryOracle {
    fn summarize(&self, query: &SummaryQuery) -> Result<String, DecantError>;
}

pub trait Oracle: BoundaryOracle + SummaryOracle {
    fn label(&self) -> String;
}

/// Oracle backed by a completion provider, with retry and backoff.
pub struct LlmOracle<C> {
    completion: C,
    policy: RetryPolicy,
}

impl<C: Completion> LlmOracle<C> {
    pub fn new(completion: C, policy: RetryPolicy) -> Self {
        Self { completion, policy }
    }
}

impl<C: Completion> BoundaryOracle for LlmOracle<C> {
    fn locate(&self, query: &TopicQuery) -> Result<String, DecantError> {
        let prompt = prompts::boundary_prompt(query);
        let answer = run_with_retry("boundary", self.policy, || self.completion.complete(&prompt))?;
        Ok(answer.trim().to_string())
    }
}

impl<C: Completion> SummaryOracle for LlmOracle<C> {
    fn summarize(&self, query: &SummaryQuery) -> Result<String, DecantError> {
        let prompt = prompts::summary_prompt(query);
        run_with_retry("summary", self.policy, || {
            let text = self.completion.complete(&prompt)?;
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Err(CallError::fatal("model returned an empty summary"));
            }
            Ok(trimmed.to_string())
        })
    }
}

impl<C: Completion> Oracle for LlmOracle<C> {
    fn label(&self) -> String {
        self.completion.label()
    }
}

/// Build the oracle for a `--model` selector. Credentials are checked here,
/// so a missing key fails before any work is done.
pub fn build_oracle(selector: &str, cfg: &OracleConfig) -> Result<Box<dyn Oracle>, DecantError> {
    match resolve_model(selector)? {
        ModelSelection::Local => Ok(Box::new(LocalOracle)),
        ModelSelection::Remote { provider, model } => {
            let completion = HttpCompletion::new(provider, &model, cfg.timeout_secs)?;
            Ok(Box::new(LlmOracle::new(
                completion,
                RetryPolicy::from_config(cfg),
            )))
        }
    }
}
