// File: supportbot-core/src/services/permissions.rs

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use supportbot_common::models::catalog::GuildCatalog;
use supportbot_common::traits::api::PermissionProvider;

use crate::config::SupportConfig;

/// Staff checks and catalogs from the loaded config. Guilds without their
/// own entry share the default catalog.
pub struct StaticPermissionProvider {
    catalogs: HashMap<String, Arc<GuildCatalog>>,
    default_catalog: Arc<GuildCatalog>,
}

impl StaticPermissionProvider {
    pub fn new(guilds: HashMap<String, GuildCatalog>, default_catalog: GuildCatalog) -> Self {
        Self {
            catalogs: guilds.into_iter().map(|(id, c)| (id, Arc::new(c))).collect(),
            default_catalog: Arc::new(default_catalog),
        }
    }

    pub fn from_config(config: &SupportConfig) -> Self {
        Self::new(config.guilds.clone(), config.default_catalog.clone())
    }

    pub fn catalog(&self, guild_id: &str) -> Arc<GuildCatalog> {
        self.catalogs
            .get(guild_id)
            .cloned()
            .unwrap_or_else(|| self.default_catalog.clone())
    }
}

#[async_trait]
impl PermissionProvider for StaticPermissionProvider {
    async fn is_staff(&self, user_id: &str, user_roles: &[String], guild_id: &str) -> bool {
        let catalog = self.catalog(guild_id);
        catalog.staff_user_ids.iter().any(|u| u == user_id) || catalog.has_staff_role(user_roles)
    }

    async fn get_catalog(&self, guild_id: &str) -> Arc<GuildCatalog> {
        self.catalog(guild_id)
    }
}
