// File: supportbot-common/src/models/catalog.rs

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryEntry {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductEntry {
    pub id: String,
    pub label: String,
}

/// Guild-specific catalog: ticket categories, products, staff roles and the
/// channels the bot manages. Loaded once and handed around by reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuildCatalog {
    #[serde(default = "default_categories")]
    pub categories: Vec<CategoryEntry>,
    #[serde(default = "default_products")]
    pub products: Vec<ProductEntry>,
    /// Categories that always need a human; selecting one escalates at once.
    #[serde(default = "default_immediate_escalation")]
    pub immediate_escalation_categories: Vec<String>,
    #[serde(default)]
    pub staff_role_ids: Vec<String>,
    #[serde(default)]
    pub staff_user_ids: Vec<String>,
    /// Role pinged when a conversation is handed to staff.
    #[serde(default)]
    pub escalation_role_id: Option<String>,
    /// Parent channels whose threads are tickets.
    #[serde(default)]
    pub ticket_parent_channel_ids: Vec<String>,
    /// Public channels where a mention opens a per-user thread.
    #[serde(default)]
    pub support_channel_ids: Vec<String>,
    #[serde(default = "default_fallback_message")]
    pub fallback_message_template: String,
}

fn default_categories() -> Vec<CategoryEntry> {
    [
        ("general", "General Question"),
        ("software", "Software Issue"),
        ("hardware", "Hardware Issue"),
        ("bug", "Bug Report"),
        ("billing", "Billing"),
        ("other", "Other"),
    ]
    .into_iter()
    .map(|(id, label)| CategoryEntry { id: id.to_string(), label: label.to_string() })
    .collect()
}

fn default_products() -> Vec<ProductEntry> {
    [("desktop", "Desktop App"), ("mobile", "Mobile App"), ("web", "Web App")]
        .into_iter()
        .map(|(id, label)| ProductEntry { id: id.to_string(), label: label.to_string() })
        .collect()
}

fn default_immediate_escalation() -> Vec<String> {
    vec!["hardware".into(), "bug".into(), "billing".into(), "other".into()]
}

fn default_fallback_message() -> String {
    "Sorry, I couldn't process that right now. You can ask to talk to team and a staff member will help you."
        .to_string()
}

impl Default for GuildCatalog {
    fn default() -> Self {
        Self {
            categories: default_categories(),
            products: default_products(),
            immediate_escalation_categories: default_immediate_escalation(),
            staff_role_ids: Vec::new(),
            staff_user_ids: Vec::new(),
            escalation_role_id: None,
            ticket_parent_channel_ids: Vec::new(),
            support_channel_ids: Vec::new(),
            fallback_message_template: default_fallback_message(),
        }
    }
}

impl GuildCatalog {
    pub fn category(&self, id: &str) -> Option<&CategoryEntry> {
        self.categories.iter().find(|c| c.id == id)
    }

    pub fn product(&self, id: &str) -> Option<&ProductEntry> {
        self.products.iter().find(|p| p.id == id)
    }

    pub fn is_immediate_escalation(&self, category_id: &str) -> bool {
        self.immediate_escalation_categories.iter().any(|c| c == category_id)
    }

    /// Display name of a category, falling back to its id.
    pub fn category_label(&self, id: &str) -> String {
        self.category(id)
            .map(|c| c.label.clone())
            .unwrap_or_else(|| id.to_string())
    }

    pub fn is_ticket_parent(&self, channel_id: &str) -> bool {
        self.ticket_parent_channel_ids.iter().any(|c| c == channel_id)
    }

    pub fn is_support_channel(&self, channel_id: &str) -> bool {
        self.support_channel_ids.iter().any(|c| c == channel_id)
    }

    pub fn has_staff_role(&self, roles: &[String]) -> bool {
        roles.iter().any(|r| self.staff_role_ids.contains(r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_escalation_split() {
        let catalog = GuildCatalog::default();
        for id in ["hardware", "bug", "billing", "other"] {
            assert!(catalog.is_immediate_escalation(id), "{id} should escalate immediately");
        }
        for id in ["general", "software"] {
            assert!(!catalog.is_immediate_escalation(id));
            assert!(catalog.category(id).is_some());
        }
        assert_eq!(catalog.category_label("hardware"), "Hardware Issue");
    }

    #[test]
    fn test_partial_json_gets_defaults() {
        let catalog: GuildCatalog =
            serde_json::from_str(r#"{ "staff_role_ids": ["42"] }"#).unwrap();
        assert!(catalog.has_staff_role(&["42".to_string()]));
        assert!(!catalog.has_staff_role(&["7".to_string()]));
        assert_eq!(catalog.categories.len(), 6);
        assert!(!catalog.fallback_message_template.is_empty());
    }
}
