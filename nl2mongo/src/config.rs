//! Engine configuration.
//!
//! Loadable from a TOML file or from `NL2MONGO_*` environment variables;
//! command-line/service layers merge on top of whatever this produces.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Configuration for the whole translation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default `options.limit` backfilled into actions that carry none.
    pub preview_limit: i64,
    /// Maximum number of documents sampled per collection during a scan.
    pub sample_size: usize,
    /// Schema cache behaviour.
    pub cache: CacheConfig,
    /// Ordered provider chain; the first entry is the primary provider.
    pub providers: Vec<ProviderConfig>,
    /// Same-provider retry policy for rate-limit signals.
    pub retry: RetryConfig,
}

/// Schema cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether caching is enabled.
    pub enabled: bool,
    /// Cache TTL in seconds.
    pub ttl_seconds: u64,
}

/// Rate-limit retry configuration, applied per provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts against one provider before falling through.
    pub max_attempts: u32,
    /// Base backoff delay in milliseconds; attempt `n` waits `n * backoff_ms`.
    pub backoff_ms: u64,
}

/// One model provider in the fallback chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Model name/identifier.
    pub model: String,
    /// API key (can be loaded from env).
    pub api_key: Option<String>,
    /// Base URL override (local endpoints, proxies).
    pub base_url: Option<String>,
    /// Sampling temperature (0.0 = deterministic).
    pub temperature: Option<f64>,
    /// Maximum output tokens.
    pub max_tokens: Option<u32>,
    /// Per-call timeout in seconds.
    pub timeout_seconds: Option<u64>,
}

/// Supported provider adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Locally hosted model (Ollama-compatible endpoint).
    Ollama,
    /// OpenAI-compatible chat completions API.
    OpenAi,
    /// Google Gemini generateContent API.
    Gemini,
    /// Deterministic responses for testing and offline use.
    Stub,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            preview_limit: 50,
            sample_size: 12,
            cache: CacheConfig::default(),
            providers: vec![],
            retry: RetryConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: 300, // 5 minutes
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 500,
        }
    }
}

impl ProviderConfig {
    pub fn stub(model: &str) -> Self {
        Self {
            kind: ProviderKind::Stub,
            model: model.to_string(),
            api_key: None,
            base_url: None,
            temperature: Some(0.0),
            max_tokens: Some(1024),
            timeout_seconds: Some(30),
        }
    }
}

impl EngineConfig {
    /// Load a configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("failed to read {}: {}", path, e)))?;
        toml::from_str(&content)
            .map_err(|e| EngineError::Config(format!("failed to parse {}: {}", path, e)))
    }

    /// Build a configuration from `NL2MONGO_*` environment variables.
    ///
    /// `NL2MONGO_PROVIDERS` is a comma-separated priority list, e.g.
    /// `ollama,openai,gemini`. Per-provider settings come from
    /// `NL2MONGO_<PROVIDER>_MODEL`, `_API_KEY`, `_BASE_URL`.
    pub fn from_env() -> Result<Self, EngineError> {
        let mut config = EngineConfig::default();

        if let Ok(limit) = std::env::var("NL2MONGO_PREVIEW_LIMIT") {
            config.preview_limit = limit
                .parse()
                .map_err(|_| EngineError::Config("invalid NL2MONGO_PREVIEW_LIMIT".to_string()))?;
        }
        if let Ok(size) = std::env::var("NL2MONGO_SAMPLE_SIZE") {
            config.sample_size = size
                .parse()
                .map_err(|_| EngineError::Config("invalid NL2MONGO_SAMPLE_SIZE".to_string()))?;
        }
        if let Ok(ttl) = std::env::var("NL2MONGO_CACHE_TTL") {
            config.cache.ttl_seconds = ttl
                .parse()
                .map_err(|_| EngineError::Config("invalid NL2MONGO_CACHE_TTL".to_string()))?;
        }
        if let Ok(attempts) = std::env::var("NL2MONGO_MAX_ATTEMPTS") {
            config.retry.max_attempts = attempts
                .parse()
                .map_err(|_| EngineError::Config("invalid NL2MONGO_MAX_ATTEMPTS".to_string()))?;
        }

        let chain =
            std::env::var("NL2MONGO_PROVIDERS").unwrap_or_else(|_| "ollama,openai".to_string());
        for name in chain.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (kind, default_model) = match name {
                "ollama" => (ProviderKind::Ollama, "llama3"),
                "openai" => (ProviderKind::OpenAi, "gpt-4o-mini"),
                "gemini" => (ProviderKind::Gemini, "gemini-1.5-flash"),
                "stub" => (ProviderKind::Stub, "stub-model"),
                other => {
                    return Err(EngineError::Config(format!(
                        "unknown provider '{}' in NL2MONGO_PROVIDERS (use: ollama, openai, gemini, stub)",
                        other
                    )))
                }
            };
            let upper = name.to_uppercase();
            config.providers.push(ProviderConfig {
                kind,
                model: std::env::var(format!("NL2MONGO_{}_MODEL", upper))
                    .unwrap_or_else(|_| default_model.to_string()),
                api_key: std::env::var(format!("NL2MONGO_{}_API_KEY", upper)).ok(),
                base_url: std::env::var(format!("NL2MONGO_{}_BASE_URL", upper)).ok(),
                temperature: std::env::var("NL2MONGO_TEMPERATURE")
                    .ok()
                    .and_then(|s| s.parse().ok()),
                max_tokens: std::env::var("NL2MONGO_MAX_TOKENS")
                    .ok()
                    .and_then(|s| s.parse().ok()),
                timeout_seconds: std::env::var("NL2MONGO_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok()),
            });
        }

        Ok(config)
    }

    /// Validate the configuration, collecting every problem.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.preview_limit <= 0 {
            errors.push("preview_limit must be greater than 0".to_string());
        }
        if self.sample_size == 0 || self.sample_size > 20 {
            errors.push("sample_size must be between 1 and 20".to_string());
        }
        if self.providers.is_empty() {
            errors.push("at least one provider must be configured".to_string());
        }
        if self.retry.max_attempts == 0 {
            errors.push("retry.max_attempts must be greater than 0".to_string());
        }
        for provider in &self.providers {
            if provider.model.is_empty() {
                errors.push(format!("{:?} provider has an empty model name", provider.kind));
            }
            if let Some(temp) = provider.temperature {
                if !(0.0..=1.0).contains(&temp) {
                    errors.push(format!(
                        "{:?} temperature must be between 0.0 and 1.0",
                        provider.kind
                    ));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
