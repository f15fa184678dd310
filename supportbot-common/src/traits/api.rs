// File: supportbot-common/src/traits/api.rs
//
// Seams to everything outside the orchestrator: the chat platform, the
// language model, and the guild configuration.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Error;
use crate::models::catalog::GuildCatalog;
use crate::models::event::{ChatMessage, GeneratedAnswer, InboundEvent, ThreadHandle, TranscriptMessage};

/// Outbound side of the chat platform.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn reply(&self, evt: &InboundEvent, text: &str) -> Result<(), Error>;

    /// Visible only to the caller where the platform supports it.
    async fn reply_ephemeral(&self, evt: &InboundEvent, text: &str) -> Result<(), Error> {
        self.reply(evt, text).await
    }

    async fn create_thread(&self, evt: &InboundEvent, name: &str) -> Result<ThreadHandle, Error>;

    async fn send_typing_indicator(&self, evt: &InboundEvent) -> Result<(), Error>;
}

/// The language model. Failures are ordinary errors; callers wrap calls in
/// a timeout.
#[async_trait]
pub trait AssistantClient: Send + Sync {
    /// Returns the raw verdict; only an exact `ESCALATE` counts as positive.
    async fn classify(&self, messages: &[ChatMessage]) -> Result<String, Error>;

    async fn generate(&self, messages: &[ChatMessage]) -> Result<GeneratedAnswer, Error>;
}

/// Single home for staff checks and guild catalogs.
#[async_trait]
pub trait PermissionProvider: Send + Sync {
    async fn is_staff(&self, user_id: &str, user_roles: &[String], guild_id: &str) -> bool;

    async fn get_catalog(&self, guild_id: &str) -> Arc<GuildCatalog>;
}

/// Read access to recent conversation history, newest first.
#[async_trait]
pub trait TranscriptSource: Send + Sync {
    async fn recent_messages(
        &self,
        guild_id: &str,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<TranscriptMessage>, Error>;
}
