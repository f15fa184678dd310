// File: supportbot-common/src/models/event.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::session::SessionKey;

/// Enough of a platform interaction to answer it ephemerally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionRef {
    pub application_id: String,
    pub interaction_id: String,
    pub token: String,
}

/// Platform-neutral inbound event. `channel_id` is always the parent
/// channel; `thread_id` is set when the event happened inside a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub guild_id: String,
    pub channel_id: String,
    pub thread_id: Option<String>,
    pub user_id: String,
    pub user_roles: Vec<String>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub mentions_bot: bool,
    #[serde(default)]
    pub interaction: Option<InteractionRef>,
}

impl InboundEvent {
    pub fn new(guild_id: &str, channel_id: &str, thread_id: Option<&str>, user_id: &str, content: &str) -> Self {
        Self {
            guild_id: guild_id.to_string(),
            channel_id: channel_id.to_string(),
            thread_id: thread_id.map(|t| t.to_string()),
            user_id: user_id.to_string(),
            user_roles: Vec::new(),
            content: content.to_string(),
            timestamp: Utc::now(),
            mentions_bot: false,
            interaction: None,
        }
    }

    pub fn with_roles(mut self, roles: &[&str]) -> Self {
        self.user_roles = roles.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn mentioning_bot(mut self) -> Self {
        self.mentions_bot = true;
        self
    }

    pub fn session_key(&self) -> SessionKey {
        SessionKey::new(&self.guild_id, &self.channel_id, self.thread_id.as_deref())
    }

    /// Where replies for this event should be written.
    pub fn conversation_id(&self) -> &str {
        self.thread_id.as_deref().unwrap_or(&self.channel_id)
    }

    /// The same event relocated into a freshly created thread.
    pub fn in_thread(&self, thread_id: &str) -> Self {
        let mut moved = self.clone();
        moved.thread_id = Some(thread_id.to_string());
        moved
    }
}

/// A component (button / select) interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ButtonInteraction {
    pub event: InboundEvent,
    pub custom_id: String,
    #[serde(default)]
    pub values: Vec<String>,
}

impl ButtonInteraction {
    /// Splits `category:general` into `("category", "general")`. Select menus
    /// carry the chosen value in `values` instead of the custom id.
    pub fn selection(&self) -> Option<(&str, &str)> {
        match self.custom_id.split_once(':') {
            Some((kind, value)) if !value.is_empty() => Some((kind, value)),
            _ => self.values.first().map(|v| (self.custom_id.as_str(), v.as_str())),
        }
    }
}

/// Returned by the reply sink after creating a thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadHandle {
    pub thread_id: String,
    pub name: String,
}

/// One message of a conversation transcript, as the transcript source sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptMessage {
    pub author_id: String,
    pub author_roles: Vec<String>,
    pub is_bot: bool,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

/// Result of a generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedAnswer {
    pub is_valid: bool,
    pub text: String,
    pub confidence: f32,
}

impl GeneratedAnswer {
    pub fn invalid() -> Self {
        Self { is_valid: false, text: String::new(), confidence: 0.0 }
    }
}
