//! Anthropic provider — Messages API over HTTP.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;

use crate::error::LlmError;
use crate::llm::{ChatMessage, ChatOptions, ChatProvider, classify_status, retry_after_header};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic Messages API provider.
pub struct AnthropicProvider {
    api_key: Option<SecretString>,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(api_key: Option<SecretString>) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
        }
    }

    /// Read the API key from `ANTHROPIC_API_KEY`. A missing key leaves the
    /// provider unconfigured rather than failing.
    pub fn from_env() -> Self {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .ok()
            .map(SecretString::from);
        Self::new(api_key)
    }
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<String, LlmError> {
        let api_key = self.api_key.as_ref().ok_or_else(|| LlmError::Unconfigured {
            provider: self.name().to_string(),
        })?;

        // Anthropic takes the system prompt as a separate field.
        let mut system_parts: Vec<&str> = Vec::new();
        if let Some(ref prompt) = options.system_prompt {
            system_parts.push(prompt);
        }
        let mut chat_messages = Vec::new();
        for msg in messages {
            if msg.role == "system" {
                system_parts.push(&msg.content);
            } else {
                chat_messages.push(json!({"role": msg.role, "content": msg.content}));
            }
        }

        let model = options.model.as_deref().unwrap_or(DEFAULT_MODEL);
        let mut body = json!({
            "model": model,
            "max_tokens": options.max_output_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": chat_messages,
        });
        if !system_parts.is_empty() {
            body["system"] = json!(system_parts.join("\n\n"));
        }

        let resp = self
            .client
            .post(API_URL)
            .header("x-api-key", api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: self.name().to_string(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = retry_after_header(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(self.name(), status, retry_after, &body));
        }

        let parsed: serde_json::Value =
            resp.json().await.map_err(|e| LlmError::InvalidResponse {
                provider: self.name().to_string(),
                reason: e.to_string(),
            })?;

        // Concatenate all text blocks from the content array.
        let text = parsed["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: self.name().to_string(),
                reason: "response contained no text content".to_string(),
            });
        }

        Ok(text)
    }
}
