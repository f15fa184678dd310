use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use supportbot_common::error::Error;
use supportbot_common::models::event::{ChatMessage, GeneratedAnswer};
use supportbot_common::traits::api::AssistantClient;

use crate::provider::ModelProvider;

const ANSWER_FORMAT: &str = "Respond with a JSON object: {\"is_valid\": bool, \"answer\": string, \
\"confidence\": number between 0 and 1}. Set is_valid to false when you cannot answer from what you know.";

#[derive(Debug, Deserialize)]
struct AnswerPayload {
    #[serde(default)]
    is_valid: bool,
    #[serde(default)]
    answer: String,
    #[serde(default)]
    confidence: f32,
}

/// [`AssistantClient`] on top of a chat-completion provider.
pub struct SupportAssistant {
    provider: Arc<dyn ModelProvider>,
    max_tokens: u32,
    json_object: Regex,
}

impl SupportAssistant {
    pub fn new(provider: Arc<dyn ModelProvider>, max_tokens: u32) -> Result<Self, Error> {
        let json_object = Regex::new(r"(?s)\{.*\}").map_err(|e| Error::Config(e.to_string()))?;
        Ok(Self { provider, max_tokens, json_object })
    }

    /// First non-empty line, trimmed. Whether it is exactly `ESCALATE` is
    /// the caller's call.
    pub fn parse_verdict(raw: &str) -> String {
        raw.lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or_default()
            .to_string()
    }

    /// Tolerates code fences and chatter around the object; anything
    /// unparseable becomes an invalid answer.
    pub fn parse_answer(&self, raw: &str) -> GeneratedAnswer {
        let Some(found) = self.json_object.find(raw) else {
            warn!("Answer without a JSON object, discarding");
            return GeneratedAnswer::invalid();
        };
        match serde_json::from_str::<AnswerPayload>(found.as_str()) {
            Ok(p) => GeneratedAnswer {
                is_valid: p.is_valid && !p.answer.trim().is_empty(),
                text: p.answer,
                confidence: p.confidence.clamp(0.0, 1.0),
            },
            Err(e) => {
                warn!("Malformed answer JSON: {}", e);
                GeneratedAnswer::invalid()
            }
        }
    }
}

#[async_trait]
impl AssistantClient for SupportAssistant {
    async fn classify(&self, messages: &[ChatMessage]) -> Result<String, Error> {
        let raw = self
            .provider
            .chat(messages, 5, false)
            .await
            .map_err(|e| Error::ExternalService(format!("{} classify failed: {}", self.provider.name(), e)))?;
        let verdict = Self::parse_verdict(&raw);
        debug!("Classifier returned '{}'", verdict);
        Ok(verdict)
    }

    async fn generate(&self, messages: &[ChatMessage]) -> Result<GeneratedAnswer, Error> {
        let mut request = messages.to_vec();
        request.insert(0, ChatMessage::system(ANSWER_FORMAT));
        let raw = self
            .provider
            .chat(&request, self.max_tokens, true)
            .await
            .map_err(|e| Error::ExternalService(format!("{} generate failed: {}", self.provider.name(), e)))?;
        Ok(self.parse_answer(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockModelProvider;

    fn assistant(provider: MockModelProvider) -> SupportAssistant {
        SupportAssistant::new(Arc::new(provider), 500).unwrap()
    }

    #[test]
    fn test_parse_verdict_takes_first_line() {
        assert_eq!(SupportAssistant::parse_verdict("\n  ESCALATE \nbecause"), "ESCALATE");
        assert_eq!(SupportAssistant::parse_verdict(""), "");
    }

    #[test]
    fn test_parse_answer_variants() {
        let a = assistant(MockModelProvider::new());

        let fenced = "```json\n{\"is_valid\": true, \"answer\": \"Reinstall it.\", \"confidence\": 0.8}\n```";
        let parsed = a.parse_answer(fenced);
        assert!(parsed.is_valid);
        assert_eq!(parsed.text, "Reinstall it.");
        assert!((parsed.confidence - 0.8).abs() < f32::EPSILON);

        assert!(!a.parse_answer("I think you should reinstall").is_valid);
        assert!(!a.parse_answer("{\"is_valid\": true, \"answer\": \"\"}").is_valid);
        assert_eq!(a.parse_answer("{\"is_valid\": true, \"answer\": \"x\", \"confidence\": 7}").confidence, 1.0);
    }

    #[tokio::test]
    async fn test_classify_maps_provider_errors() {
        let mut provider = MockModelProvider::new();
        provider.expect_name().return_const("openai".to_string());
        provider
            .expect_chat()
            .returning(|_, _, _| Err(anyhow::anyhow!("connection refused")));

        let result = assistant(provider).classify(&[ChatMessage::user("hi")]).await;
        assert!(matches!(result, Err(Error::ExternalService(msg)) if msg.contains("connection refused")));
    }

    #[tokio::test]
    async fn test_generate_requests_json_with_format_prompt() {
        let mut provider = MockModelProvider::new();
        provider
            .expect_chat()
            .withf(|messages, _, json_mode| *json_mode && messages[0].content.contains("JSON object"))
            .returning(|_, _, _| Ok("{\"is_valid\": true, \"answer\": \"Yes.\", \"confidence\": 0.9}".into()));

        let answer = assistant(provider).generate(&[ChatMessage::user("Do you ship abroad?")]).await.unwrap();
        assert!(answer.is_valid);
        assert_eq!(answer.text, "Yes.");
    }
}
