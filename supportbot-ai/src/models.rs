use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Configuration for an OpenAI-compatible provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// The type of provider (openai, or anything speaking the same API)
    pub provider_type: String,

    /// Base URL for API requests
    pub api_base: Option<String>,

    /// API key for authentication
    pub api_key: String,

    /// Model used for both classification and answers
    pub default_model: String,

    /// Additional provider-specific options (`system_prompt`, `max_tokens`)
    #[serde(default)]
    pub options: HashMap<String, String>,
}

impl ProviderConfig {
    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider_type: "openai".to_string(),
            api_base: None,
            api_key: api_key.into(),
            default_model: model.into(),
            options: HashMap::new(),
        }
    }

    pub fn api_base(&self) -> String {
        self.api_base
            .clone()
            .map(|b| b.trim_end_matches('/').to_string())
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
    }

    pub fn max_tokens(&self) -> u32 {
        self.options
            .get("max_tokens")
            .and_then(|v| v.parse().ok())
            .unwrap_or(1000)
    }
}
