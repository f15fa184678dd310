use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;
use twilight_cache_inmemory::InMemoryCache;
use twilight_http::Client as HttpClient;
use twilight_model::id::marker::{GuildMarker, UserMarker};
use twilight_model::id::Id;

use supportbot_common::models::event::TranscriptMessage;
use supportbot_common::traits::api::TranscriptSource;
use supportbot_core::Error;

use super::parse_id;

/// Discord caps one page of channel history at 100 messages.
const MAX_PAGE: usize = 100;

/// Reads recent history through the REST API. History messages carry no
/// member data, so author roles come from the cache or a member lookup.
pub struct DiscordTranscripts {
    http: Arc<HttpClient>,
    cache: Arc<InMemoryCache>,
}

impl DiscordTranscripts {
    pub fn new(http: Arc<HttpClient>, cache: Arc<InMemoryCache>) -> Self {
        Self { http, cache }
    }

    async fn member_roles(&self, guild_id: Id<GuildMarker>, user_id: Id<UserMarker>) -> Vec<String> {
        if let Some(member) = self.cache.member(guild_id, user_id) {
            return member.roles().iter().map(|r| r.to_string()).collect();
        }
        let fetched = match self.http.guild_member(guild_id, user_id).await {
            Ok(resp) => resp.model().await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match fetched {
            Ok(member) => member.roles.iter().map(|r| r.to_string()).collect(),
            Err(e) => {
                // Departed members just count as non-staff.
                warn!("Could not resolve roles for user {} in guild {}: {}", user_id, guild_id, e);
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl TranscriptSource for DiscordTranscripts {
    async fn recent_messages(
        &self,
        guild_id: &str,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<TranscriptMessage>, Error> {
        let guild_id = parse_id::<GuildMarker>(guild_id)?;
        let channel_id = parse_id(conversation_id)?;
        let page = limit.clamp(1, MAX_PAGE) as u16;

        let messages = self
            .http
            .channel_messages(channel_id)
            .limit(page)
            .await
            .map_err(|e| Error::Platform(format!("Error fetching messages: {e:?}")))?
            .models()
            .await
            .map_err(|e| Error::Platform(format!("Error parsing messages: {e:?}")))?;

        let mut roles_by_author: HashMap<Id<UserMarker>, Vec<String>> = HashMap::new();
        let mut transcript = Vec::with_capacity(messages.len());
        for msg in messages {
            let author_roles = if msg.author.bot {
                Vec::new()
            } else if let Some(member) = &msg.member {
                member.roles.iter().map(|r| r.to_string()).collect()
            } else if let Some(roles) = roles_by_author.get(&msg.author.id) {
                roles.clone()
            } else {
                let roles = self.member_roles(guild_id, msg.author.id).await;
                roles_by_author.insert(msg.author.id, roles.clone());
                roles
            };

            transcript.push(TranscriptMessage {
                author_id: msg.author.id.to_string(),
                author_roles,
                is_bot: msg.author.bot,
                content: msg.content,
                timestamp: DateTime::<Utc>::from_timestamp_micros(msg.timestamp.as_micros())
                    .unwrap_or_else(Utc::now),
            });
        }
        Ok(transcript)
    }
}
