// File: supportbot-common/src/models/session.rs

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix under which sessions live in the key-value store.
pub const SESSION_PREFIX: &str = "session:";

/// Composite identifier of one conversation: the guild, the parent channel
/// and, for ticket or per-user threads, the thread itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey {
    pub guild_id: String,
    pub channel_id: String,
    pub thread_id: Option<String>,
}

impl SessionKey {
    pub fn new(guild_id: &str, channel_id: &str, thread_id: Option<&str>) -> Self {
        Self {
            guild_id: guild_id.to_string(),
            channel_id: channel_id.to_string(),
            thread_id: thread_id.map(|t| t.to_string()),
        }
    }

    pub fn channel(guild_id: &str, channel_id: &str) -> Self {
        Self::new(guild_id, channel_id, None)
    }

    pub fn thread(guild_id: &str, channel_id: &str, thread_id: &str) -> Self {
        Self::new(guild_id, channel_id, Some(thread_id))
    }

    /// The id of the conversation surface the bot actually writes into.
    pub fn conversation_id(&self) -> &str {
        self.thread_id.as_deref().unwrap_or(&self.channel_id)
    }

    pub fn storage_key(&self) -> String {
        format!("{}{}", SESSION_PREFIX, self)
    }

    pub fn from_storage_key(raw: &str) -> Option<Self> {
        raw.strip_prefix(SESSION_PREFIX)?.parse().ok()
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.thread_id {
            Some(thread) => write!(f, "{}:{}:{}", self.guild_id, self.channel_id, thread),
            None => write!(f, "{}:{}", self.guild_id, self.channel_id),
        }
    }
}

impl FromStr for SessionKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [guild, channel] if !guild.is_empty() && !channel.is_empty() => {
                Ok(SessionKey::channel(guild, channel))
            }
            [guild, channel, thread]
                if !guild.is_empty() && !channel.is_empty() && !thread.is_empty() =>
            {
                Ok(SessionKey::thread(guild, channel, thread))
            }
            _ => Err(format!("Malformed session key: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketState {
    Created,
    CategorySelected,
    ProductSelected,
    Escalated,
    Closed,
}

impl TicketState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TicketState::Closed)
    }
}

impl fmt::Display for TicketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TicketState::Created => write!(f, "CREATED"),
            TicketState::CategorySelected => write!(f, "CATEGORY_SELECTED"),
            TicketState::ProductSelected => write!(f, "PRODUCT_SELECTED"),
            TicketState::Escalated => write!(f, "ESCALATED"),
            TicketState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Persisted control state of one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub key: SessionKey,
    pub product: Option<String>,
    pub category: Option<String>,
    /// Sticky: once set, the assistant stays silent until a staff resume.
    pub human_help: bool,
    pub questions_answered: bool,
    pub state: TicketState,
    /// `None` until the transcript has been scanned once.
    #[serde(default)]
    pub staff_detected: Option<bool>,
    pub escalation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    /// The template a missing store entry is materialized from.
    pub fn new_default(key: SessionKey, now: DateTime<Utc>) -> Self {
        Self {
            key,
            product: None,
            category: None,
            human_help: false,
            questions_answered: false,
            state: TicketState::Created,
            staff_detected: None,
            escalation_reason: None,
            created_at: now,
            last_updated: now,
            last_activity: now,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn staff_present(&self) -> bool {
        self.staff_detected == Some(true)
    }

    /// The session-level half of the "may the assistant answer" predicate.
    /// Rate limits and ticket gating are applied on top by the orchestrator.
    pub fn ai_may_respond(&self) -> bool {
        !self.human_help && !self.is_closed() && !self.staff_present()
    }
}

/// A partial write for [`Session`]. `None` leaves a field untouched; the
/// nested options on nullable fields allow clearing them explicitly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionUpdate {
    pub product: Option<Option<String>>,
    pub category: Option<Option<String>>,
    pub human_help: Option<bool>,
    pub questions_answered: Option<bool>,
    pub state: Option<TicketState>,
    pub staff_detected: Option<Option<bool>>,
    pub escalation_reason: Option<Option<String>>,
    pub last_activity: Option<DateTime<Utc>>,
}

impl SessionUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn product(mut self, product: impl Into<String>) -> Self {
        self.product = Some(Some(product.into()));
        self
    }

    pub fn clear_product(mut self) -> Self {
        self.product = Some(None);
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(Some(category.into()));
        self
    }

    pub fn clear_category(mut self) -> Self {
        self.category = Some(None);
        self
    }

    pub fn human_help(mut self, value: bool) -> Self {
        self.human_help = Some(value);
        self
    }

    pub fn questions_answered(mut self, value: bool) -> Self {
        self.questions_answered = Some(value);
        self
    }

    pub fn state(mut self, state: TicketState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn staff_detected(mut self, value: Option<bool>) -> Self {
        self.staff_detected = Some(value);
        self
    }

    pub fn escalation_reason(mut self, reason: Option<String>) -> Self {
        self.escalation_reason = Some(reason);
        self
    }

    pub fn last_activity(mut self, at: DateTime<Utc>) -> Self {
        self.last_activity = Some(at);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == SessionUpdate::default()
    }

    /// Returns a copy of `session` with this update applied. No validation
    /// happens here; the registry validates the result before persisting.
    pub fn merged_onto(&self, session: &Session) -> Session {
        let mut next = session.clone();
        if let Some(product) = &self.product {
            next.product = product.clone();
        }
        if let Some(category) = &self.category {
            next.category = category.clone();
        }
        if let Some(value) = self.human_help {
            next.human_help = value;
        }
        if let Some(value) = self.questions_answered {
            next.questions_answered = value;
        }
        if let Some(state) = self.state {
            next.state = state;
        }
        if let Some(value) = self.staff_detected {
            next.staff_detected = value;
        }
        if let Some(reason) = &self.escalation_reason {
            next.escalation_reason = reason.clone();
        }
        if let Some(at) = self.last_activity {
            next.last_activity = at;
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_key_round_trip() {
        let key = SessionKey::thread("100", "200", "300");
        assert_eq!(key.storage_key(), "session:100:200:300");
        assert_eq!(SessionKey::from_storage_key(&key.storage_key()), Some(key));

        let channel_key = SessionKey::channel("100", "200");
        assert_eq!(channel_key.conversation_id(), "200");
        assert_eq!(SessionKey::from_storage_key("session:100:200"), Some(channel_key));
    }

    #[test]
    fn test_malformed_keys_are_rejected() {
        assert!(SessionKey::from_storage_key("ratelimit:1:2").is_none());
        assert!("only-one".parse::<SessionKey>().is_err());
        assert!("a::c".parse::<SessionKey>().is_err());
    }

    #[test]
    fn test_update_merges_only_set_fields() {
        let now = Utc::now();
        let mut session = Session::new_default(SessionKey::thread("g", "c", "t"), now);
        session.product = Some("desktop".into());

        let merged = SessionUpdate::new()
            .category("general")
            .state(TicketState::CategorySelected)
            .merged_onto(&session);

        assert_eq!(merged.category.as_deref(), Some("general"));
        assert_eq!(merged.product.as_deref(), Some("desktop"));
        assert_eq!(merged.state, TicketState::CategorySelected);

        let cleared = SessionUpdate::new().clear_product().merged_onto(&merged);
        assert!(cleared.product.is_none());
    }

    #[test]
    fn test_ai_may_respond_predicate() {
        let mut session = Session::new_default(SessionKey::channel("g", "c"), Utc::now());
        assert!(session.ai_may_respond());

        session.staff_detected = Some(false);
        assert!(session.ai_may_respond());

        session.staff_detected = Some(true);
        assert!(!session.ai_may_respond());

        session.staff_detected = None;
        session.human_help = true;
        assert!(!session.ai_may_respond());
    }

    #[test]
    fn test_state_serializes_screaming_snake() {
        let json = serde_json::to_string(&TicketState::CategorySelected).unwrap();
        assert_eq!(json, "\"CATEGORY_SELECTED\"");
    }
}
