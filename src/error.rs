//! Error types for the sub-agent core.

use std::time::Duration;

use uuid::Uuid;

/// Top-level error type for the core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Classification of a provider failure.
///
/// Decided by each provider adapter at its own boundary (HTTP status,
/// structured error codes) — the router only ever switches on the kind,
/// never on error message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Credit/quota exhausted (HTTP 402, `insufficient_quota`).
    QuotaExceeded,
    /// Too many requests (HTTP 429).
    RateLimited,
    /// The provider has no credentials and cannot be called at all.
    Unconfigured,
    /// Anything else: network, auth, malformed response.
    Other,
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} is not configured")]
    Unconfigured { provider: String },

    #[error("Provider {provider} quota exhausted: {reason}")]
    QuotaExceeded { provider: String, reason: String },

    #[error("Provider {provider} rate limited: {reason}")]
    RateLimited {
        provider: String,
        reason: String,
        retry_after: Option<Duration>,
    },

    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("All providers failed; last error: {last}")]
    AllProvidersFailed { last: String },
}

impl LlmError {
    /// The failover-relevant classification of this error.
    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            Self::QuotaExceeded { .. } => ProviderErrorKind::QuotaExceeded,
            Self::RateLimited { .. } => ProviderErrorKind::RateLimited,
            Self::Unconfigured { .. } => ProviderErrorKind::Unconfigured,
            _ => ProviderErrorKind::Other,
        }
    }

    /// Quota and rate-limit failures are expected and skippable — the
    /// router fails over to the next provider without treating them as
    /// noteworthy.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            ProviderErrorKind::QuotaExceeded | ProviderErrorKind::RateLimited
        )
    }
}

/// Task-pool errors.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Run {id} not found")]
    NotFound { id: Uuid },

    #[error("Run {id} cannot transition from {state} to {target}")]
    InvalidTransition {
        id: Uuid,
        state: String,
        target: String,
    },

    #[error("Task queue is full ({capacity} runs queued)")]
    QueueFull { capacity: usize },

    #[error("Pool is shut down")]
    ShutDown,
}

/// Result type alias for the core.
pub type Result<T> = std::result::Result<T, Error>;
