// File: supportbot-core/src/config.rs
//
// Runtime configuration. Every field has a default so a partial JSON file
// (or none at all) yields a usable config.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use supportbot_common::models::catalog::GuildCatalog;
use supportbot_common::models::rate_limit::RateLimitContext;

use crate::Error;

// Upper bounds enforced by `SupportConfig::validate`. They keep every
// derived duration and backoff well inside chrono and tokio ranges.
const MAX_WINDOW_SECONDS: u64 = 7 * 24 * 3600;
const MAX_DECISION_ATTEMPTS: usize = 10;
const MAX_CLASSIFIER_TIMEOUT_MS: u64 = 120_000;
const MAX_DEDUP_STALE_SECONDS: u64 = 24 * 3600;
const MAX_CLOSED_RETENTION_HOURS: i64 = 24 * 365;
const MAX_SESSION_TTL_DAYS: u64 = 3650;
const MAX_MAINTENANCE_INTERVAL_SECONDS: u64 = 24 * 3600;
const MAX_STORE_RETRY_ATTEMPTS: u32 = 10;
const MAX_STORE_RETRY_BASE_DELAY_MS: u64 = 60_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_public_cooldown")]
    pub cooldown_seconds: u64,
    #[serde(default = "default_public_per_minute")]
    pub max_per_minute: usize,
    #[serde(default = "default_public_per_hour")]
    pub max_per_hour: usize,
    #[serde(default = "default_minute_window")]
    pub minute_window_seconds: u64,
    #[serde(default = "default_hour_window")]
    pub hour_window_seconds: u64,
}

fn default_public_cooldown() -> u64 {
    10
}

fn default_public_per_minute() -> usize {
    5
}

fn default_public_per_hour() -> usize {
    30
}

fn default_minute_window() -> u64 {
    60
}

fn default_hour_window() -> u64 {
    3600
}

impl RateLimitConfig {
    pub fn public_defaults() -> Self {
        Self {
            cooldown_seconds: default_public_cooldown(),
            max_per_minute: default_public_per_minute(),
            max_per_hour: default_public_per_hour(),
            minute_window_seconds: default_minute_window(),
            hour_window_seconds: default_hour_window(),
        }
    }

    pub fn ticket_defaults() -> Self {
        Self {
            cooldown_seconds: 3,
            max_per_minute: 10,
            max_per_hour: 100,
            minute_window_seconds: default_minute_window(),
            hour_window_seconds: default_hour_window(),
        }
    }

    /// The largest window; timestamps older than this are never consulted.
    pub fn retention_seconds(&self) -> u64 {
        self.hour_window_seconds.max(self.minute_window_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "RateLimitConfig::public_defaults")]
    pub public: RateLimitConfig,
    #[serde(default = "RateLimitConfig::ticket_defaults")]
    pub ticket: RateLimitConfig,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            public: RateLimitConfig::public_defaults(),
            ticket: RateLimitConfig::ticket_defaults(),
        }
    }
}

impl RateLimitSettings {
    pub fn for_context(&self, context: RateLimitContext) -> &RateLimitConfig {
        match context {
            RateLimitContext::Public => &self.public,
            RateLimitContext::Ticket => &self.ticket,
        }
    }
}

/// What to do when the classifier fails or times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    /// Treat the failure as an escalation.
    Open,
    /// Keep answering automatically.
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailPolicy {
    #[serde(default = "default_ticket_fail_mode")]
    pub ticket: FailMode,
    #[serde(default = "default_public_fail_mode")]
    pub public: FailMode,
}

fn default_ticket_fail_mode() -> FailMode {
    FailMode::Open
}

fn default_public_fail_mode() -> FailMode {
    FailMode::Closed
}

impl Default for FailPolicy {
    fn default() -> Self {
        Self { ticket: default_ticket_fail_mode(), public: default_public_fail_mode() }
    }
}

impl FailPolicy {
    pub fn for_context(&self, context: RateLimitContext) -> FailMode {
        match context {
            RateLimitContext::Ticket => self.ticket,
            RateLimitContext::Public => self.public,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationConfig {
    #[serde(default = "default_explicit_phrases")]
    pub explicit_phrases: Vec<String>,
    #[serde(default = "default_classifier_timeout_ms")]
    pub classifier_timeout_ms: u64,
    #[serde(default = "default_transcript_scan_limit")]
    pub transcript_scan_limit: usize,
    #[serde(default)]
    pub fail_policy: FailPolicy,
    /// Lets needs-product categories get generic answers before a product
    /// is chosen. Off unless explicitly enabled.
    #[serde(default)]
    pub allow_generic_without_product: bool,
    #[serde(default = "default_min_answer_confidence")]
    pub min_answer_confidence: f32,
    #[serde(default = "default_max_decision_attempts")]
    pub max_decision_attempts: usize,
}

fn default_explicit_phrases() -> Vec<String> {
    [
        "talk to team",
        "talk to a human",
        "talk to human",
        "human please",
        "real person",
        "speak to staff",
        "talk to support",
        "contact support",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_classifier_timeout_ms() -> u64 {
    8000
}

fn default_transcript_scan_limit() -> usize {
    100
}

fn default_min_answer_confidence() -> f32 {
    0.5
}

fn default_max_decision_attempts() -> usize {
    3
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            explicit_phrases: default_explicit_phrases(),
            classifier_timeout_ms: default_classifier_timeout_ms(),
            transcript_scan_limit: default_transcript_scan_limit(),
            fail_policy: FailPolicy::default(),
            allow_generic_without_product: false,
            min_answer_confidence: default_min_answer_confidence(),
            max_decision_attempts: default_max_decision_attempts(),
        }
    }
}

impl EscalationConfig {
    pub fn classifier_timeout(&self) -> Duration {
        Duration::from_millis(self.classifier_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_stale_after_seconds")]
    pub stale_after_seconds: u64,
}

fn default_stale_after_seconds() -> u64 {
    30
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { stale_after_seconds: default_stale_after_seconds() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_closed_retention_hours")]
    pub closed_retention_hours: i64,
    /// Optional TTL applied to every session write.
    #[serde(default)]
    pub ttl_days: Option<u64>,
}

fn default_closed_retention_hours() -> i64 {
    72
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { closed_retention_hours: default_closed_retention_hours(), ttl_days: None }
    }
}

impl SessionConfig {
    pub fn ttl_seconds(&self) -> Option<u64> {
        self.ttl_days.map(|d| d.saturating_mul(24 * 3600))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    #[serde(default = "default_rate_limit_sweep_seconds")]
    pub rate_limit_sweep_seconds: u64,
    #[serde(default = "default_dedup_eviction_seconds")]
    pub dedup_eviction_seconds: u64,
    #[serde(default = "default_session_cleanup_seconds")]
    pub session_cleanup_seconds: u64,
}

fn default_rate_limit_sweep_seconds() -> u64 {
    300
}

fn default_dedup_eviction_seconds() -> u64 {
    30
}

fn default_session_cleanup_seconds() -> u64 {
    3600
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            rate_limit_sweep_seconds: default_rate_limit_sweep_seconds(),
            dedup_eviction_seconds: default_dedup_eviction_seconds(),
            session_cleanup_seconds: default_session_cleanup_seconds(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    100
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: default_max_attempts(), base_delay_ms: default_base_delay_ms() }
    }
}

/// User-facing texts. Placeholders: `{user}`, `{retry}`, `{reason}`,
/// `{role}`, `{category}`, `{product}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageTemplates {
    #[serde(default = "default_ticket_welcome")]
    pub ticket_welcome: String,
    #[serde(default = "default_public_welcome")]
    pub public_welcome: String,
    #[serde(default = "default_public_thread_name")]
    pub public_thread_name: String,
    #[serde(default = "default_handoff")]
    pub handoff: String,
    #[serde(default = "default_rate_limited")]
    pub rate_limited: String,
    #[serde(default = "default_awaiting_category")]
    pub awaiting_category: String,
    #[serde(default = "default_awaiting_product")]
    pub awaiting_product: String,
    #[serde(default = "default_category_selected")]
    pub category_selected: String,
    #[serde(default = "default_product_selected")]
    pub product_selected: String,
    #[serde(default = "default_invalid_selection")]
    pub invalid_selection: String,
    #[serde(default = "default_resumed")]
    pub resumed: String,
    #[serde(default = "default_closed")]
    pub closed: String,
    #[serde(default = "default_permission_denied")]
    pub permission_denied: String,
}

fn default_ticket_welcome() -> String {
    "Thanks for opening a ticket! Please choose a category below so we can route your request.".into()
}

fn default_public_welcome() -> String {
    "Hi <@{user}>! I opened this thread for your question and will answer here. Ask to talk to team at any time to reach a human.".into()
}

fn default_public_thread_name() -> String {
    "support-{user}".into()
}

fn default_handoff() -> String {
    "I'm handing this conversation to our support team{role}. Reason: {reason}. A staff member will reply here soon.".into()
}

fn default_rate_limited() -> String {
    "You're sending messages a little fast. Please wait {retry} and try again, or ask to talk to team.".into()
}

fn default_awaiting_category() -> String {
    "Please choose a category using the buttons above so I can help.".into()
}

fn default_awaiting_product() -> String {
    "Please pick the product this is about so I can help.".into()
}

fn default_category_selected() -> String {
    "Got it: {category}. Which product is this about?".into()
}

fn default_product_selected() -> String {
    "Thanks! Tell me what's going on with {product} and I'll do my best to help.".into()
}

fn default_invalid_selection() -> String {
    "That option isn't available here. Please pick one of the listed options.".into()
}

fn default_resumed() -> String {
    "The assistant is back on for this conversation.".into()
}

fn default_closed() -> String {
    "This ticket is now closed.".into()
}

fn default_permission_denied() -> String {
    "Only support staff can use this command. If you need help, ask to talk to team.".into()
}

impl Default for MessageTemplates {
    fn default() -> Self {
        Self {
            ticket_welcome: default_ticket_welcome(),
            public_welcome: default_public_welcome(),
            public_thread_name: default_public_thread_name(),
            handoff: default_handoff(),
            rate_limited: default_rate_limited(),
            awaiting_category: default_awaiting_category(),
            awaiting_product: default_awaiting_product(),
            category_selected: default_category_selected(),
            product_selected: default_product_selected(),
            invalid_selection: default_invalid_selection(),
            resumed: default_resumed(),
            closed: default_closed(),
            permission_denied: default_permission_denied(),
        }
    }
}

/// Replaces `{name}` placeholders in `template`.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (name, value)| {
        acc.replace(&format!("{{{}}}", name), value)
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SupportConfig {
    #[serde(default)]
    pub rate_limits: RateLimitSettings,
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    #[serde(default)]
    pub store_retry: RetryConfig,
    #[serde(default)]
    pub guilds: HashMap<String, GuildCatalog>,
    #[serde(default)]
    pub default_catalog: GuildCatalog,
    #[serde(default)]
    pub messages: MessageTemplates,
}

impl SupportConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, Error> {
        let config: SupportConfig = serde_json::from_str(raw)
            .map_err(|e| Error::Config(format!("Invalid support config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        debug!("Loading support config from {}", path.display());
        let raw = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&raw)?;
        info!(
            "Loaded support config: {} guild catalog(s), fail policy ticket={:?} public={:?}",
            config.guilds.len(),
            config.escalation.fail_policy.ticket,
            config.escalation.fail_policy.public
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        for (name, limits) in [("public", &self.rate_limits.public), ("ticket", &self.rate_limits.ticket)] {
            if limits.minute_window_seconds == 0 || limits.hour_window_seconds == 0 {
                return Err(Error::Config(format!("{} rate limit windows must be non-zero", name)));
            }
            let longest = limits.cooldown_seconds.max(limits.retention_seconds());
            if longest > MAX_WINDOW_SECONDS {
                return Err(Error::Config(format!(
                    "{} rate limit windows and cooldown must not exceed {} seconds",
                    name, MAX_WINDOW_SECONDS
                )));
            }
        }
        let escalation = &self.escalation;
        if !(1..=MAX_DECISION_ATTEMPTS).contains(&escalation.max_decision_attempts) {
            return Err(Error::Config(format!(
                "escalation.max_decision_attempts must be between 1 and {}",
                MAX_DECISION_ATTEMPTS
            )));
        }
        if escalation.classifier_timeout_ms == 0 || escalation.classifier_timeout_ms > MAX_CLASSIFIER_TIMEOUT_MS {
            return Err(Error::Config(format!(
                "escalation.classifier_timeout_ms must be between 1 and {}",
                MAX_CLASSIFIER_TIMEOUT_MS
            )));
        }
        if self.dedup.stale_after_seconds == 0 || self.dedup.stale_after_seconds > MAX_DEDUP_STALE_SECONDS {
            return Err(Error::Config(format!(
                "dedup.stale_after_seconds must be between 1 and {}",
                MAX_DEDUP_STALE_SECONDS
            )));
        }
        if !(0..=MAX_CLOSED_RETENTION_HOURS).contains(&self.sessions.closed_retention_hours) {
            return Err(Error::Config(format!(
                "sessions.closed_retention_hours must be between 0 and {}",
                MAX_CLOSED_RETENTION_HOURS
            )));
        }
        if self.sessions.ttl_days.is_some_and(|d| d == 0 || d > MAX_SESSION_TTL_DAYS) {
            return Err(Error::Config(format!(
                "sessions.ttl_days must be between 1 and {}",
                MAX_SESSION_TTL_DAYS
            )));
        }
        let m = &self.maintenance;
        for (name, every) in [
            ("rate_limit_sweep_seconds", m.rate_limit_sweep_seconds),
            ("dedup_eviction_seconds", m.dedup_eviction_seconds),
            ("session_cleanup_seconds", m.session_cleanup_seconds),
        ] {
            if every == 0 || every > MAX_MAINTENANCE_INTERVAL_SECONDS {
                return Err(Error::Config(format!(
                    "maintenance.{} must be between 1 and {}",
                    name, MAX_MAINTENANCE_INTERVAL_SECONDS
                )));
            }
        }
        if !(1..=MAX_STORE_RETRY_ATTEMPTS).contains(&self.store_retry.max_attempts) {
            return Err(Error::Config(format!(
                "store_retry.max_attempts must be between 1 and {}",
                MAX_STORE_RETRY_ATTEMPTS
            )));
        }
        if self.store_retry.base_delay_ms > MAX_STORE_RETRY_BASE_DELAY_MS {
            return Err(Error::Config(format!(
                "store_retry.base_delay_ms must not exceed {}",
                MAX_STORE_RETRY_BASE_DELAY_MS
            )));
        }
        let catalogs = std::iter::once(("default", &self.default_catalog))
            .chain(self.guilds.iter().map(|(id, c)| (id.as_str(), c)));
        for (guild, catalog) in catalogs {
            for id in &catalog.immediate_escalation_categories {
                if catalog.category(id).is_none() {
                    return Err(Error::Config(format!(
                        "guild {}: immediate escalation category '{}' is not in the catalog",
                        guild, id
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_yields_defaults() {
        let config = SupportConfig::from_json_str("{}").unwrap();
        assert_eq!(config, SupportConfig::default());
        assert_eq!(config.escalation.fail_policy.ticket, FailMode::Open);
        assert_eq!(config.escalation.fail_policy.public, FailMode::Closed);
        assert!(!config.escalation.allow_generic_without_product);
        assert_eq!(config.rate_limits.public.cooldown_seconds, 10);
    }

    #[test]
    fn test_partial_override() {
        let config = SupportConfig::from_json_str(
            r#"{
                "rate_limits": { "public": { "max_per_minute": 2 } },
                "escalation": { "fail_policy": { "public": "open" } },
                "guilds": { "123": { "staff_role_ids": ["9"] } }
            }"#,
        )
        .unwrap();
        assert_eq!(config.rate_limits.public.max_per_minute, 2);
        assert_eq!(config.rate_limits.public.cooldown_seconds, 10);
        assert_eq!(config.escalation.fail_policy.public, FailMode::Open);
        assert_eq!(config.escalation.fail_policy.ticket, FailMode::Open);
        assert_eq!(config.guilds["123"].staff_role_ids, vec!["9".to_string()]);
    }

    #[test]
    fn test_unknown_immediate_category_is_rejected() {
        let result = SupportConfig::from_json_str(
            r#"{ "default_catalog": { "immediate_escalation_categories": ["warranty"] } }"#,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_out_of_range_values_are_rejected() {
        for raw in [
            r#"{ "store_retry": { "max_attempts": 4000000000 } }"#,
            r#"{ "store_retry": { "max_attempts": 0 } }"#,
            r#"{ "store_retry": { "base_delay_ms": 18446744073709551615 } }"#,
            r#"{ "rate_limits": { "public": { "cooldown_seconds": 18446744073709551615 } } }"#,
            r#"{ "rate_limits": { "ticket": { "hour_window_seconds": 9223372036854775807 } } }"#,
            r#"{ "dedup": { "stale_after_seconds": 18446744073709551615 } }"#,
            r#"{ "sessions": { "ttl_days": 18446744073709551615 } }"#,
            r#"{ "sessions": { "closed_retention_hours": -1 } }"#,
            r#"{ "maintenance": { "session_cleanup_seconds": 0 } }"#,
            r#"{ "escalation": { "max_decision_attempts": 1000000 } }"#,
            r#"{ "escalation": { "classifier_timeout_ms": 0 } }"#,
        ] {
            let result = SupportConfig::from_json_str(raw);
            assert!(matches!(result, Err(Error::Config(_))), "accepted {}", raw);
        }
    }

    #[test]
    fn test_values_at_the_bounds_are_accepted() {
        let config = SupportConfig::from_json_str(
            r#"{
                "store_retry": { "max_attempts": 10, "base_delay_ms": 60000 },
                "rate_limits": { "public": { "cooldown_seconds": 604800, "hour_window_seconds": 604800 } },
                "sessions": { "ttl_days": 3650, "closed_retention_hours": 0 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.sessions.ttl_seconds(), Some(3650 * 24 * 3600));
    }

    #[test]
    fn test_render_placeholders() {
        let text = render("wait {retry} please, {user}", &[("retry", "7 seconds"), ("user", "ana")]);
        assert_eq!(text, "wait 7 seconds please, ana");
    }
}
