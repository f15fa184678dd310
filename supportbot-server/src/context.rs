//! supportbot-server/src/context.rs
//!
//! Builds everything the server runs: store, orchestrator, Discord clients.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use twilight_cache_inmemory::{InMemoryCache, ResourceType};
use twilight_http::Client as HttpClient;
use twilight_http::client::ClientBuilder;

use supportbot_ai::{OpenAIProvider, ProviderConfig, SupportAssistant};
use supportbot_common::traits::store::KeyValueStore;
use supportbot_core::repositories::{InMemoryKeyValueStore, PostgresKeyValueStore, RetryingStore};
use supportbot_core::services::{Collaborators, Orchestrator, StaticPermissionProvider};
use supportbot_core::tasks::maintenance::{ExpiringBackend, MaintenanceTargets};
use supportbot_core::{Database, Error, SupportConfig};

use crate::discord::{DiscordHandler, DiscordSink, DiscordTranscripts};
use crate::{Args, StoreKind};

/// Settings read from the environment (`.env` is honoured).
pub struct Secrets {
    pub discord_token: String,
    pub ai_api_key: String,
    pub ai_api_base: Option<String>,
    pub ai_model: String,
}

impl Secrets {
    pub fn from_env() -> Result<Self, Error> {
        let required = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| Error::Config(format!("{name} is not set")))
        };
        Ok(Self {
            discord_token: required("DISCORD_TOKEN")?,
            ai_api_key: required("AI_API_KEY")?,
            ai_api_base: std::env::var("AI_API_BASE").ok(),
            ai_model: std::env::var("AI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
        })
    }
}

/// The global server context.
pub struct ServerContext {
    pub config: Arc<SupportConfig>,
    pub store: Arc<dyn KeyValueStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub handler: Arc<DiscordHandler>,
    pub discord_token: String,
    backend: ExpiringBackend,
}

impl ServerContext {
    pub async fn new(args: &Args, secrets: Secrets) -> Result<Self, Error> {
        let config = match &args.config {
            Some(path) => SupportConfig::load(path)?,
            None => {
                info!("No --config given; using built-in defaults");
                SupportConfig::default()
            }
        };
        let config = Arc::new(config);

        // 1) Store
        let (raw_store, backend): (Arc<dyn KeyValueStore>, ExpiringBackend) = match args.store {
            StoreKind::Memory => {
                let store = Arc::new(InMemoryKeyValueStore::new());
                (store.clone() as Arc<dyn KeyValueStore>, ExpiringBackend::Memory(store))
            }
            StoreKind::Postgres => {
                let url = args
                    .database_url
                    .as_deref()
                    .ok_or_else(|| Error::Config("--store postgres needs --database-url".into()))?;
                info!("Using Postgres store");
                let db = Database::new(url).await?;
                db.migrate().await?;
                let store = Arc::new(PostgresKeyValueStore::new(db.pool().clone()));
                (store.clone() as Arc<dyn KeyValueStore>, ExpiringBackend::Postgres(store))
            }
        };
        let store: Arc<dyn KeyValueStore> = Arc::new(RetryingStore::new(raw_store, &config.store_retry));

        // 2) Discord clients
        let http = Arc::new(
            ClientBuilder::new()
                .token(secrets.discord_token.clone())
                .timeout(Duration::from_secs(30))
                .build(),
        );
        let cache = Arc::new(
            InMemoryCache::builder()
                .resource_types(ResourceType::GUILD | ResourceType::CHANNEL | ResourceType::MEMBER)
                .build(),
        );
        let bot_user_id = current_user_id(&http).await?;

        // 3) Assistant
        let mut provider_config = ProviderConfig::openai(secrets.ai_api_key, secrets.ai_model);
        provider_config.api_base = secrets.ai_api_base;
        let assistant = Arc::new(SupportAssistant::new(
            Arc::new(OpenAIProvider::new(provider_config)),
            1000,
        )?);

        // 4) Orchestrator
        let sink = Arc::new(DiscordSink::new(http.clone()));
        let orchestrator = Arc::new(Orchestrator::new(
            config.clone(),
            store.clone(),
            Collaborators {
                permissions: Arc::new(StaticPermissionProvider::from_config(&config)),
                assistant,
                transcripts: Arc::new(DiscordTranscripts::new(http.clone(), cache.clone())),
                sink: sink.clone(),
            },
        )?);

        let restored = orchestrator.rate_limiter().restore(&store).await?;
        info!("Restored {} rate limit record(s)", restored);

        let handler = Arc::new(DiscordHandler {
            orchestrator: orchestrator.clone(),
            sink,
            http,
            cache,
            bot_user_id,
            command_prefix: args.command_prefix.clone(),
        });

        Ok(Self {
            config,
            store,
            orchestrator,
            handler,
            discord_token: secrets.discord_token,
            backend,
        })
    }

    pub fn maintenance_targets(&self) -> MaintenanceTargets {
        MaintenanceTargets {
            sessions: self.orchestrator.sessions().clone(),
            rate_limiter: self.orchestrator.rate_limiter().clone(),
            dedup: self.orchestrator.dedup().clone(),
            store: self.store.clone(),
            backend: self.backend.clone(),
        }
    }
}

async fn current_user_id(
    http: &HttpClient,
) -> Result<twilight_model::id::Id<twilight_model::id::marker::UserMarker>, Error> {
    let user = http
        .current_user()
        .await
        .map_err(|e| Error::Platform(format!("Error fetching current user: {e:?}")))?
        .model()
        .await
        .map_err(|e| Error::Platform(format!("Error parsing current user: {e:?}")))?;
    info!("Authenticated as {} (ID={})", user.name, user.id);
    Ok(user.id)
}
