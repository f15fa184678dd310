use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use twilight_cache_inmemory::InMemoryCache;
use twilight_gateway::{
    self as gateway,
    CloseFrame,
    Config,
    Event,
    EventTypeFlags,
    Intents,
    Shard,
    StreamExt,
};
use twilight_http::Client as HttpClient;
use twilight_model::application::interaction::{Interaction, InteractionData};
use twilight_model::channel::{Channel, Message};
use twilight_model::id::marker::{ChannelMarker, UserMarker};
use twilight_model::id::Id;

use supportbot_common::models::event::{ButtonInteraction, InboundEvent, InteractionRef};
use supportbot_common::models::outcome::InteractionReply;
use supportbot_core::services::Orchestrator;
use supportbot_core::Error;

use super::{parse_command, strip_bot_mention, DiscordSink};

/// Turns gateway events into orchestrator calls.
pub struct DiscordHandler {
    pub orchestrator: Arc<Orchestrator>,
    pub sink: Arc<DiscordSink>,
    pub http: Arc<HttpClient>,
    pub cache: Arc<InMemoryCache>,
    pub bot_user_id: Id<UserMarker>,
    pub command_prefix: String,
}

impl DiscordHandler {
    pub async fn handle(&self, event: Event) {
        let result = match event {
            Event::MessageCreate(msg) => self.on_message(&msg.0).await,
            Event::ThreadCreate(thread) => self.on_thread_created(&thread.0).await,
            Event::ThreadDelete(thread) => {
                let evt = InboundEvent::new(
                    &thread.guild_id.to_string(),
                    &thread.parent_id.to_string(),
                    Some(&thread.id.to_string()),
                    "",
                    "",
                );
                self.on_deleted(evt).await
            }
            Event::ChannelDelete(channel) => {
                let Some(guild_id) = channel.guild_id else {
                    return;
                };
                let evt = InboundEvent::new(&guild_id.to_string(), &channel.id.to_string(), None, "", "");
                self.on_deleted(evt).await
            }
            Event::InteractionCreate(interaction) => self.on_interaction(&interaction.0).await,
            other => {
                trace!("Unhandled event: {:?}", other.kind());
                Ok(())
            }
        };
        if let Err(e) = result {
            error!("Discord event handling failed: {}", e);
        }
    }

    /// Parent channel and thread for a channel id. Threads are resolved
    /// through the cache first.
    async fn locate(&self, channel_id: Id<ChannelMarker>) -> Result<(String, Option<String>), Error> {
        let cached = self
            .cache
            .channel(channel_id)
            .map(|c| (c.kind, c.parent_id));
        let (kind, parent_id) = match cached {
            Some(found) => found,
            None => {
                let channel = self
                    .http
                    .channel(channel_id)
                    .await
                    .map_err(|e| Error::Platform(format!("Error fetching channel: {e:?}")))?
                    .model()
                    .await
                    .map_err(|e| Error::Platform(format!("Error parsing channel: {e:?}")))?;
                (channel.kind, channel.parent_id)
            }
        };
        match (kind.is_thread(), parent_id) {
            (true, Some(parent)) => Ok((parent.to_string(), Some(channel_id.to_string()))),
            _ => Ok((channel_id.to_string(), None)),
        }
    }

    async fn on_message(&self, msg: &Message) -> Result<(), Error> {
        if msg.author.bot {
            debug!("Ignoring bot message from {}", msg.author.name);
            return Ok(());
        }
        let Some(guild_id) = msg.guild_id else {
            return Ok(());
        };

        let (channel_id, thread_id) = self.locate(msg.channel_id).await?;
        let bot_id = self.bot_user_id.to_string();
        let mut evt = InboundEvent::new(
            &guild_id.to_string(),
            &channel_id,
            thread_id.as_deref(),
            &msg.author.id.to_string(),
            &strip_bot_mention(&msg.content, &bot_id),
        );
        evt.user_roles = msg
            .member
            .as_ref()
            .map(|m| m.roles.iter().map(|r| r.to_string()).collect())
            .unwrap_or_default();
        if msg.mentions.iter().any(|m| m.id == self.bot_user_id) {
            evt = evt.mentioning_bot();
        }

        if let Some(name) = parse_command(&msg.content, &self.command_prefix) {
            let reply = self.orchestrator.on_command(name, &evt).await?;
            return self.sink.deliver(&evt, &reply).await;
        }

        let outcome = self.orchestrator.handle_message(&evt).await;
        debug!("Message {} in {} => {:?}", msg.id, evt.conversation_id(), outcome);
        Ok(())
    }

    async fn on_thread_created(&self, thread: &Channel) -> Result<(), Error> {
        if thread.newly_created == Some(false) {
            // Joined an existing thread, not a creation.
            return Ok(());
        }
        let (Some(guild_id), Some(parent_id)) = (thread.guild_id, thread.parent_id) else {
            return Ok(());
        };
        let owner = thread.owner_id.map(|o| o.to_string()).unwrap_or_default();
        let evt = InboundEvent::new(
            &guild_id.to_string(),
            &parent_id.to_string(),
            Some(&thread.id.to_string()),
            &owner,
            "",
        );
        let outcome = self.orchestrator.on_resource_created(&evt).await?;
        debug!("Thread {} created => {:?}", thread.id, outcome);
        Ok(())
    }

    async fn on_deleted(&self, evt: InboundEvent) -> Result<(), Error> {
        let removed = self.orchestrator.on_resource_deleted(&evt).await?;
        if removed > 0 {
            info!("Removed {} session(s) for deleted {}", removed, evt.conversation_id());
        }
        Ok(())
    }

    async fn on_interaction(&self, interaction: &Interaction) -> Result<(), Error> {
        let Some(InteractionData::MessageComponent(data)) = &interaction.data else {
            return Ok(());
        };
        let (Some(guild_id), Some(channel), Some(user_id)) =
            (interaction.guild_id, interaction.channel.as_ref(), interaction.author_id())
        else {
            return Ok(());
        };

        let (channel_id, thread_id) = match (channel.kind.is_thread(), channel.parent_id) {
            (true, Some(parent)) => (parent.to_string(), Some(channel.id.to_string())),
            _ => (channel.id.to_string(), None),
        };
        let mut evt = InboundEvent::new(
            &guild_id.to_string(),
            &channel_id,
            thread_id.as_deref(),
            &user_id.to_string(),
            "",
        );
        evt.user_roles = interaction
            .member
            .as_ref()
            .map(|m| m.roles.iter().map(|r| r.to_string()).collect())
            .unwrap_or_default();
        evt.interaction = Some(InteractionRef {
            application_id: interaction.application_id.to_string(),
            interaction_id: interaction.id.to_string(),
            token: interaction.token.clone(),
        });

        let button = ButtonInteraction {
            event: evt,
            custom_id: data.custom_id.clone(),
            values: data.values.clone(),
        };
        let reply = match self.orchestrator.on_button(&button).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Button {} failed: {}", button.custom_id, e);
                let config = self.orchestrator.config();
                let catalog = config.guilds.get(&button.event.guild_id).unwrap_or(&config.default_catalog);
                InteractionReply::ephemeral(catalog.fallback_message_template.clone())
            }
        };
        self.sink.deliver(&button.event, &reply).await
    }
}

/// Reads one shard until it closes or `shutdown` flips.
async fn shard_runner(
    mut shard: Shard,
    handler: Arc<DiscordHandler>,
    mut shutdown: watch::Receiver<bool>,
) {
    let shard_id = shard.id().number();
    info!("(ShardRunner) Shard {shard_id} started. Listening for events.");

    loop {
        tokio::select! {
            item = shard.next_event(EventTypeFlags::all()) => {
                let Some(item) = item else { break };
                match item {
                    Ok(event) => {
                        handler.cache.update(&event);
                        if let Event::Ready(ready) = &event {
                            info!("Shard {shard_id} => READY as {} (ID={})", ready.user.name, ready.user.id);
                            continue;
                        }
                        // Each event runs on its own task; the orchestrator
                        // serializes per session.
                        let handler = handler.clone();
                        tokio::spawn(async move { handler.handle(event).await });
                    }
                    Err(err) => {
                        error!("Shard {shard_id} => error receiving event: {err:?}");
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    shard.close(CloseFrame::NORMAL);
                    break;
                }
            }
        }
    }

    warn!("(ShardRunner) Shard {shard_id} event loop ended.");
}

/// Connects the recommended number of shards and spawns a runner for each.
pub async fn run_gateway(
    token: String,
    handler: Arc<DiscordHandler>,
    shutdown: watch::Receiver<bool>,
) -> Result<Vec<JoinHandle<()>>, Error> {
    let config = Config::new(
        token,
        Intents::GUILDS | Intents::GUILD_MESSAGES | Intents::MESSAGE_CONTENT,
    );
    let shards = gateway::create_recommended(&handler.http, config, |_, b| b.build())
        .await
        .map_err(|e| Error::Platform(format!("create_recommended error: {e}")))?;

    let mut tasks = Vec::new();
    for shard in shards {
        let handler = handler.clone();
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(shard_runner(shard, handler, shutdown)));
    }
    info!("Discord gateway started with {} shard(s)", tasks.len());
    Ok(tasks)
}
