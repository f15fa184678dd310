use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace};
use twilight_http::Client as HttpClient;
use twilight_model::channel::message::MessageFlags;
use twilight_model::channel::ChannelType;
use twilight_model::http::interaction::{InteractionResponse, InteractionResponseType};
use twilight_model::id::marker::{ApplicationMarker, InteractionMarker};
use twilight_util::builder::InteractionResponseDataBuilder;

use supportbot_common::models::event::{InboundEvent, InteractionRef, ThreadHandle};
use supportbot_common::models::outcome::InteractionReply;
use supportbot_common::traits::api::ReplySink;
use supportbot_core::Error;

use super::{parse_id, truncate_chars, MAX_MESSAGE_CHARS, MAX_THREAD_NAME_CHARS};

/// Outbound side of the Discord adapter.
pub struct DiscordSink {
    http: Arc<HttpClient>,
}

impl DiscordSink {
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self { http }
    }

    /// Answers a component interaction in place.
    pub async fn respond_interaction(
        &self,
        interaction: &InteractionRef,
        reply: &InteractionReply,
    ) -> Result<(), Error> {
        let application_id = parse_id::<ApplicationMarker>(&interaction.application_id)?;
        let interaction_id = parse_id::<InteractionMarker>(&interaction.interaction_id)?;

        let mut data = InteractionResponseDataBuilder::new()
            .content(truncate_chars(&reply.text, MAX_MESSAGE_CHARS));
        if reply.ephemeral {
            data = data.flags(MessageFlags::EPHEMERAL);
        }
        let response = InteractionResponse {
            kind: InteractionResponseType::ChannelMessageWithSource,
            data: Some(data.build()),
        };

        self.http
            .interaction(application_id)
            .create_response(interaction_id, &interaction.token, &response)
            .await
            .map_err(|e| Error::Platform(format!("Error responding to interaction: {e:?}")))?;
        trace!("Interaction {} answered (ephemeral={})", interaction.interaction_id, reply.ephemeral);
        Ok(())
    }

    /// Routes an orchestrator reply to an interaction response when there is
    /// one, otherwise to a plain message.
    pub async fn deliver(&self, evt: &InboundEvent, reply: &InteractionReply) -> Result<(), Error> {
        match &evt.interaction {
            Some(interaction) => self.respond_interaction(interaction, reply).await,
            None => self.reply(evt, &reply.text).await,
        }
    }
}

#[async_trait]
impl ReplySink for DiscordSink {
    async fn reply(&self, evt: &InboundEvent, text: &str) -> Result<(), Error> {
        let channel_id = parse_id(evt.conversation_id())?;
        self.http
            .create_message(channel_id)
            .content(&truncate_chars(text, MAX_MESSAGE_CHARS))
            .await
            .map_err(|e| Error::Platform(format!("Error sending Discord message: {e:?}")))?;
        Ok(())
    }

    async fn reply_ephemeral(&self, evt: &InboundEvent, text: &str) -> Result<(), Error> {
        match &evt.interaction {
            Some(interaction) => {
                self.respond_interaction(interaction, &InteractionReply::ephemeral(text)).await
            }
            // Plain messages have no ephemeral form.
            None => self.reply(evt, text).await,
        }
    }

    async fn create_thread(&self, evt: &InboundEvent, name: &str) -> Result<ThreadHandle, Error> {
        let channel_id = parse_id(&evt.channel_id)?;
        let name = truncate_chars(name, MAX_THREAD_NAME_CHARS);
        let thread = self
            .http
            .create_thread(channel_id, &name, ChannelType::PublicThread)
            .await
            .map_err(|e| Error::Platform(format!("Error creating thread: {e:?}")))?
            .model()
            .await
            .map_err(|e| Error::Platform(format!("Error parsing created thread: {e:?}")))?;
        debug!("Created thread {} in channel {}", thread.id, channel_id);

        Ok(ThreadHandle {
            thread_id: thread.id.to_string(),
            name: thread.name.unwrap_or(name),
        })
    }

    async fn send_typing_indicator(&self, evt: &InboundEvent) -> Result<(), Error> {
        let channel_id = parse_id(evt.conversation_id())?;
        self.http
            .create_typing_trigger(channel_id)
            .await
            .map_err(|e| Error::Platform(format!("Error triggering typing: {e:?}")))?;
        Ok(())
    }
}
