//! Error taxonomy for the translation pipeline.
//!
//! Responsibilities:
//! - One typed variant per failure class the caller can react to.
//! - Display strings carry the failing stage and subject so a failure is
//!   diagnosable without internal logs.
//!
//! Recoverable, component-local conditions (one collection failing to scan,
//! one provider failing) are absorbed and logged at their own layer and never
//! surface through these types.

use thiserror::Error;

/// Top-level error for the translate/execute pipeline.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Database unreachable. Fatal to the current request, not retried.
    #[error("connection failed for '{descriptor}': {message}")]
    Connection { descriptor: String, message: String },

    /// Every configured model provider failed. Carries each provider's last
    /// failure so the chain is diagnosable from the message alone.
    #[error("all model providers exhausted: {summary}")]
    AllProvidersExhausted { summary: String },

    /// Model output could not be recovered into a structured action.
    /// `raw` is truncated for diagnostics.
    #[error("malformed model response ({reason}); raw output: {raw}")]
    MalformedResponse { reason: String, raw: String },

    /// A structural or safety rule was violated. The caller may resubmit
    /// with corrected text.
    #[error("action rejected: {}", errors.join("; "))]
    Validation { errors: Vec<String> },

    /// An underlying database operation failed during execution.
    #[error("execution of {operation} on '{collection}' failed: {message}")]
    Execution {
        operation: String,
        collection: String,
        message: String,
    },

    /// Configuration could not be loaded or did not validate.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Number of characters of raw model output preserved in a
/// `MalformedResponse` for diagnostics.
const RAW_PREVIEW_LEN: usize = 300;

impl EngineError {
    pub fn malformed(reason: impl Into<String>, raw: &str) -> Self {
        let mut preview: String = raw.chars().take(RAW_PREVIEW_LEN).collect();
        if raw.chars().count() > RAW_PREVIEW_LEN {
            preview.push_str("…[truncated]");
        }
        EngineError::MalformedResponse {
            reason: reason.into(),
            raw: preview,
        }
    }
}

/// Failure of a single model provider call. The orchestrator decides whether
/// a variant is retried on the same provider or falls through to the next.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Provider signalled a rate limit or quota exhaustion. Retried on the
    /// same provider with backoff.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Transport-level or non-2xx HTTP failure.
    #[error("http error: {0}")]
    Http(String),

    /// The per-call timeout elapsed.
    #[error("timed out after {0}s")]
    Timeout(u64),

    /// Health probe failed; the provider was skipped without consuming a
    /// retry budget.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Provider returned a completion with no usable text.
    #[error("empty completion")]
    EmptyCompletion,

    /// Provider returned a body that did not match its wire contract.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout(0)
        } else {
            ProviderError::Http(e.to_string())
        }
    }
}
