//! LLM provider boundary.
//!
//! Supports:
//! - **Anthropic**: Messages API over HTTP
//! - **OpenAI**: Chat Completions API over HTTP
//!
//! Each adapter classifies its own failures into a typed
//! [`ProviderErrorKind`](crate::error::ProviderErrorKind) at the HTTP
//! boundary; the [`FailoverRouter`] only ever inspects the kind.

pub mod anthropic;
pub mod failover;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use failover::FailoverRouter;
pub use openai::OpenAiProvider;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// One chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Per-request options.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// Model id; None = the provider's default.
    pub model: Option<String>,
    /// Cap on output tokens; None = the provider's default.
    pub max_output_tokens: Option<u32>,
    /// Extra system prompt prepended to the request.
    pub system_prompt: Option<String>,
}

/// A backend capable of producing a chat completion.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Stable provider name, used in errors and failover notices.
    fn name(&self) -> &str;

    /// Whether the provider has what it needs to be called at all.
    /// Unconfigured providers are skipped by the router without being
    /// counted as failures.
    fn is_configured(&self) -> bool {
        true
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<String, LlmError>;
}

/// Map an HTTP error status to a typed provider error.
pub(crate) fn classify_status(
    provider: &str,
    status: reqwest::StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> LlmError {
    let reason = format!("HTTP {}: {}", status.as_u16(), truncate(body, 300));
    match status.as_u16() {
        402 => LlmError::QuotaExceeded {
            provider: provider.to_string(),
            reason,
        },
        429 => LlmError::RateLimited {
            provider: provider.to_string(),
            reason,
            retry_after,
        },
        _ => LlmError::RequestFailed {
            provider: provider.to_string(),
            reason,
        },
    }
}

/// Read a `Retry-After` header as a duration, if present and numeric.
pub(crate) fn retry_after_header(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let cut = s
            .char_indices()
            .take_while(|(i, _)| *i < max)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        format!("{}…", &s[..cut])
    }
}
