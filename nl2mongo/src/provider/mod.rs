//! Model providers and orchestration.
//!
//! Each adapter wraps one HTTP completion API behind `ModelProvider`; the
//! orchestrator walks an ordered chain of them with rate-limit retries. A
//! completion is an opaque string here; parsing it is the normalizer's job.

pub mod gemini;
pub mod ollama;
pub mod openai;
pub mod stub;

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::{ProviderConfig, ProviderKind, RetryConfig};
use crate::error::{EngineError, ProviderError};

pub use gemini::GeminiProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use stub::StubProvider;

/// One text-completion backend.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Stable identifier used in logs and exhaustion summaries.
    fn name(&self) -> &str;

    /// Cheap liveness probe. Failure marks the provider skippable, it does
    /// not remove it from the chain.
    async fn health_check(&self) -> Result<(), ProviderError>;

    /// One prompt in, raw completion text out. An empty completion is an
    /// error, not a success with empty payload.
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError>;

    /// Budget the orchestrator enforces around each call to this provider.
    fn call_timeout(&self) -> Duration {
        Duration::from_secs(30)
    }
}

/// Instantiates the adapter for one provider entry.
pub fn build_provider(config: &ProviderConfig) -> Result<Box<dyn ModelProvider>, EngineError> {
    match config.kind {
        ProviderKind::Ollama => Ok(Box::new(OllamaProvider::new(config.clone())?)),
        ProviderKind::OpenAi => Ok(Box::new(OpenAiProvider::new(config.clone())?)),
        ProviderKind::Gemini => Ok(Box::new(GeminiProvider::new(config.clone())?)),
        ProviderKind::Stub => Ok(Box::new(StubProvider::empty())),
    }
}

/// Walks the provider chain in order until one yields a completion.
///
/// Rate limits retry the SAME provider with linear backoff; any other
/// failure falls through to the next provider immediately. Only when every
/// provider has failed does the caller see an error, carrying the per
/// provider failure summary.
pub struct ModelOrchestrator {
    providers: Vec<Box<dyn ModelProvider>>,
    retry: RetryConfig,
}

impl ModelOrchestrator {
    pub fn new(providers: Vec<Box<dyn ModelProvider>>, retry: RetryConfig) -> Self {
        Self { providers, retry }
    }

    pub fn from_configs(
        configs: &[ProviderConfig],
        retry: RetryConfig,
    ) -> Result<Self, EngineError> {
        let providers = configs
            .iter()
            .map(build_provider)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(providers, retry))
    }

    /// Providers in chain order, for logging and diagnostics.
    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub async fn generate(&self, prompt: &str) -> Result<String, EngineError> {
        if self.providers.is_empty() {
            return Err(EngineError::AllProvidersExhausted {
                summary: "no providers configured".to_string(),
            });
        }

        let mut failures: Vec<String> = Vec::new();
        for provider in &self.providers {
            // Probe before spending the retry budget; an unreachable
            // provider is skipped, not retried.
            if let Err(err) = self.probe(provider.as_ref()).await {
                warn!(provider = provider.name(), error = %err, "health probe failed, skipping");
                failures.push(format!("{}: {}", provider.name(), err));
                continue;
            }
            match self.generate_with_retry(provider.as_ref(), prompt).await {
                Ok(text) => {
                    debug!(provider = provider.name(), "completion obtained");
                    return Ok(text);
                }
                Err(err) => {
                    warn!(provider = provider.name(), error = %err, "provider failed, falling through");
                    failures.push(format!("{}: {}", provider.name(), err));
                }
            }
        }

        Err(EngineError::AllProvidersExhausted {
            summary: failures.join("; "),
        })
    }

    async fn probe(&self, provider: &dyn ModelProvider) -> Result<(), ProviderError> {
        let budget = provider.call_timeout();
        tokio::time::timeout(budget, provider.health_check())
            .await
            .unwrap_or_else(|_| Err(ProviderError::Timeout(budget.as_secs())))
    }

    /// One generate call under the provider's time budget.
    async fn generate_bounded(
        &self,
        provider: &dyn ModelProvider,
        prompt: &str,
    ) -> Result<String, ProviderError> {
        let budget = provider.call_timeout();
        tokio::time::timeout(budget, provider.generate(prompt))
            .await
            .unwrap_or_else(|_| Err(ProviderError::Timeout(budget.as_secs())))
    }

    /// Retries one provider across rate limits. Attempt numbering is
    /// 1-based; the sleep before attempt n+1 is n * backoff_ms.
    async fn generate_with_retry(
        &self,
        provider: &dyn ModelProvider,
        prompt: &str,
    ) -> Result<String, ProviderError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.generate_bounded(provider, prompt).await {
                Ok(text) if text.trim().is_empty() => return Err(ProviderError::EmptyCompletion),
                Ok(text) => return Ok(text),
                Err(ProviderError::RateLimited(_)) if attempt < max_attempts => {
                    let delay = Duration::from_millis(self.retry.backoff_ms * attempt as u64);
                    warn!(
                        provider = provider.name(),
                        attempt, delay_ms = delay.as_millis() as u64,
                        "rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
