use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use supportbot_common::models::event::{ChatMessage, ChatRole};

use crate::models::ProviderConfig;

/// A chat-completion backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Returns the content of the first choice. With `json_mode` the model
    /// is asked for a JSON object.
    async fn chat(&self, messages: &[ChatMessage], max_tokens: u32, json_mode: bool) -> anyhow::Result<String>;
}

/// OpenAI provider implementation
pub struct OpenAIProvider {
    config: ProviderConfig,
    client: Client,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider with the given configuration
    pub fn new(config: ProviderConfig) -> Self {
        let client = Client::new();
        Self { config, client }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

#[async_trait]
impl ModelProvider for OpenAIProvider {
    fn name(&self) -> &str {
        &self.config.provider_type
    }

    async fn chat(&self, messages: &[ChatMessage], max_tokens: u32, json_mode: bool) -> anyhow::Result<String> {
        let api_base = self.config.api_base();

        let has_system_message = messages.iter().any(|m| m.role == ChatRole::System);
        let mut all_messages = Vec::new();
        if !has_system_message {
            if let Some(system_prompt) = self.config.options.get("system_prompt") {
                all_messages.push(json!({ "role": "system", "content": system_prompt }));
            }
        }
        all_messages.extend(messages.iter().map(|m| json!({ "role": m.role, "content": m.content })));

        let mut request_payload = json!({
            "model": self.config.default_model,
            "messages": all_messages,
            "max_tokens": max_tokens,
            "temperature": 0.2,
        });
        if json_mode {
            request_payload["response_format"] = json!({ "type": "json_object" });
        }

        tracing::debug!("POST {}/chat/completions (model={}, json={})", api_base, self.config.default_model, json_mode);
        let response = self
            .client
            .post(format!("{}/chat/completions", api_base))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&request_payload)
            .send()
            .await?;

        // Raw text first for better error reporting
        let status = response.status();
        let response_text = response.text().await?;
        tracing::trace!("Raw API response ({}): {}", status, response_text);

        let data = match serde_json::from_str::<serde_json::Value>(&response_text) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("Failed to parse API response as JSON: {:?}", e);
                return Err(anyhow::anyhow!("API returned non-JSON response ({}): {}", status, e));
            }
        };
        extract_content(&data)
    }
}

/// Pulls `choices[0].message.content` out of a chat-completion response.
pub fn extract_content(data: &serde_json::Value) -> anyhow::Result<String> {
    if let Some(error) = data.get("error") {
        let error_message = error.get("message").and_then(|m| m.as_str()).unwrap_or("Unknown error");
        tracing::error!("API returned error: {}", error_message);
        return Err(anyhow::anyhow!("API error: {}", error_message));
    }

    let choice = data
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| anyhow::anyhow!("Response missing 'choices'"))?;

    let content = choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow::anyhow!("Response choice missing message content"))?;
    Ok(content.to_string())
}
