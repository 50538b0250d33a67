//! Category inference with rate-limit backoff
//!
//! One classification is a small state machine: send the prompt, parse the answer.
//! A throttled call sleeps `base_delay * 2^attempt` and tries again, up to
//! `max_attempts` calls. Every other failure (transport, malformed answer, bad
//! category) ends the classification at once.

use futures::future::{BoxFuture, FutureExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use super::parser::ResponseGrammar;
use super::prompt::{build_classification_prompt, DEFAULT_EXCERPT_CHARS};
use super::{ClassificationResult, SortError};
use crate::llm::{GenerationConfig, LlmError, LlmProvider, LlmRequest};

/// Decides whether a provider failure is throttling worth retrying
pub type RetryPredicate = Arc<dyn Fn(&LlmError) -> bool + Send + Sync>;

/// Sleeps for the given backoff delay
pub type SleepFn = Arc<dyn Fn(Duration) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Backoff after the zero-based `attempt`: base, 2*base, 4*base, ...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

fn tokio_sleep() -> SleepFn {
    Arc::new(|delay: Duration| tokio::time::sleep(delay).boxed())
}

/// LLM-backed document classifier
pub struct Classifier<P> {
    provider: P,
    config: GenerationConfig,
    grammar: ResponseGrammar,
    excerpt_chars: usize,
    policy: RetryPolicy,
    is_retryable: RetryPredicate,
    sleep: SleepFn,
}

impl<P: LlmProvider> Classifier<P> {
    pub fn new(provider: P, grammar: ResponseGrammar) -> Self {
        Self {
            provider,
            config: GenerationConfig::classification(),
            grammar,
            excerpt_chars: DEFAULT_EXCERPT_CHARS,
            policy: RetryPolicy::default(),
            is_retryable: Arc::new(LlmError::is_rate_limited),
            sleep: tokio_sleep(),
        }
    }

    pub fn with_config(mut self, config: GenerationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_excerpt_chars(mut self, excerpt_chars: usize) -> Self {
        self.excerpt_chars = excerpt_chars;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_retry_predicate(mut self, is_retryable: RetryPredicate) -> Self {
        self.is_retryable = is_retryable;
        self
    }

    pub fn with_sleep(mut self, sleep: SleepFn) -> Self {
        self.sleep = sleep;
        self
    }

    pub fn grammar(&self) -> ResponseGrammar {
        self.grammar
    }

    /// Infer the category of one document.
    pub async fn classify(
        &self,
        document_excerpt: &str,
        known_categories: &BTreeSet<String>,
    ) -> Result<ClassificationResult, SortError> {
        let prompt = build_classification_prompt(
            document_excerpt,
            known_categories,
            self.grammar,
            self.excerpt_chars,
        );
        let request = LlmRequest::prompt(prompt, self.config.clone());

        let mut last_error = None;
        for attempt in 0..self.policy.max_attempts {
            match self.provider.generate(&request).await {
                Ok(text) => return self.grammar.parse(text.trim()),
                Err(e) if (self.is_retryable)(&e) => {
                    let delay = self.policy.delay_for(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        delay_secs = delay.as_secs_f64(),
                        error = %e,
                        "Rate limit exceeded, backing off"
                    );
                    (self.sleep)(delay).await;
                    last_error = Some(e);
                }
                Err(e) => {
                    tracing::error!(error = %e, "LLM provider error");
                    return Err(SortError::Provider(e));
                }
            }
        }

        Err(SortError::RetryExhausted {
            attempts: self.policy.max_attempts,
            last: last_error.unwrap_or_else(|| LlmError::new("no attempt was made")),
        })
    }
}
