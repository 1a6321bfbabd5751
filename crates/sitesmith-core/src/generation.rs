use std::sync::Arc;
use std::time::Duration;

use sitesmith_llm::{LanguageModel, Message};

use crate::complexity::{Budget, ComplexityTier, MAX_TOKENS_CEILING};
use crate::error::GenerationError;

/// Retry and sampling policy for [`GenerationClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    /// Total attempts, including the first. Values below 1 are treated as 1.
    pub max_attempts: u32,
    /// Fixed wait between attempts.
    pub backoff: Duration,
    pub temperature: f32,
    pub top_p: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff: Duration::from_secs(2),
            temperature: 0.8,
            top_p: 0.95,
        }
    }
}

/// Calls the generation service with a tier-derived budget and retries
/// transient failures. Returns raw text; interpretation is the parser's job.
#[derive(Clone)]
pub struct GenerationClient {
    model: Arc<LanguageModel>,
    config: GenerationConfig,
}

impl GenerationClient {
    pub fn new(model: LanguageModel, config: GenerationConfig) -> Self {
        Self {
            model: Arc::new(model),
            config,
        }
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    pub fn model(&self) -> &LanguageModel {
        &self.model
    }

    pub async fn generate(
        &self,
        messages: &[Message],
        tier: ComplexityTier,
    ) -> Result<String, GenerationError> {
        self.generate_with_budget(messages, Budget::for_tier(tier))
            .await
    }

    /// Like [`generate`](Self::generate) with an explicit budget.
    pub async fn generate_with_budget(
        &self,
        messages: &[Message],
        budget: Budget,
    ) -> Result<String, GenerationError> {
        let budget = Budget {
            max_tokens: budget.max_tokens.min(MAX_TOKENS_CEILING),
            ..budget
        };
        let max_attempts = self.config.max_attempts.max(1);

        let mut attempt = 0;
        loop {
            attempt += 1;

            let mut req = sitesmith_llm::request();
            req.messages(messages.iter().cloned())
                .max_tokens(budget.max_tokens)
                .temperature(self.config.temperature)
                .top_p(self.config.top_p)
                .timeout(budget.timeout);

            tracing::info!(
                attempt,
                max_attempts,
                max_tokens = budget.max_tokens,
                model = self.model.model_id(),
                "requesting generation"
            );

            let err = match self.model.generate(req).await {
                Ok(text) => {
                    tracing::debug!(attempt, len = text.len(), "generation succeeded");
                    return Ok(text);
                }
                Err(e) => e,
            };

            if !err.is_retryable() {
                tracing::warn!(error = %err, "generation misconfigured, not retrying");
                return Err(GenerationError::Configuration(err));
            }
            if attempt >= max_attempts {
                tracing::warn!(attempts = attempt, error = %err, "generation attempts exhausted");
                return Err(GenerationError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            tracing::warn!(
                attempt,
                backoff_ms = self.config.backoff.as_millis() as u64,
                error = %err,
                "generation failed, retrying"
            );
            tokio::time::sleep(self.config.backoff).await;
        }
    }
}
