//! OpenAI provider — Chat Completions API over HTTP.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;

use crate::error::LlmError;
use crate::llm::{ChatMessage, ChatOptions, ChatProvider, classify_status, retry_after_header};

const API_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// OpenAI Chat Completions provider.
pub struct OpenAiProvider {
    api_key: Option<SecretString>,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(api_key: Option<SecretString>) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
        }
    }

    /// Read the API key from `OPENAI_API_KEY`. A missing key leaves the
    /// provider unconfigured rather than failing.
    pub fn from_env() -> Self {
        let api_key = std::env::var("OPENAI_API_KEY").ok().map(SecretString::from);
        Self::new(api_key)
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
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

        let mut chat_messages = Vec::new();
        if let Some(ref prompt) = options.system_prompt {
            chat_messages.push(json!({"role": "system", "content": prompt}));
        }
        for msg in messages {
            chat_messages.push(json!({"role": msg.role, "content": msg.content}));
        }

        let model = options.model.as_deref().unwrap_or(DEFAULT_MODEL);
        let mut body = json!({
            "model": model,
            "messages": chat_messages,
        });
        if let Some(max) = options.max_output_tokens {
            body["max_completion_tokens"] = json!(max);
        }

        let resp = self
            .client
            .post(API_URL)
            .bearer_auth(api_key.expose_secret())
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

            // OpenAI reports exhausted credit as a 429 with a structured
            // error code. Reclassify from the code field, not message text.
            if status.as_u16() == 429
                && serde_json::from_str::<serde_json::Value>(&body)
                    .ok()
                    .and_then(|v| v["error"]["code"].as_str().map(String::from))
                    .as_deref()
                    == Some("insufficient_quota")
            {
                return Err(LlmError::QuotaExceeded {
                    provider: self.name().to_string(),
                    reason: "insufficient_quota".to_string(),
                });
            }

            return Err(classify_status(self.name(), status, retry_after, &body));
        }

        let parsed: serde_json::Value =
            resp.json().await.map_err(|e| LlmError::InvalidResponse {
                provider: self.name().to_string(),
                reason: e.to_string(),
            })?;

        parsed["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: self.name().to_string(),
                reason: "response contained no message content".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_without_key() {
        let provider = OpenAiProvider::new(None);
        assert!(!provider.is_configured());
        assert_eq!(provider.name(), "openai");
    }

    #[tokio::test]
    async fn chat_without_key_is_unconfigured_error() {
        let provider = OpenAiProvider::new(None);
        let err = provider
            .chat(&[ChatMessage::user("hi")], &ChatOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Unconfigured { .. }));
    }
}
