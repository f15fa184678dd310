// File: supportbot-core/src/services/escalation.rs

use std::fmt;
use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use tracing::{debug, info, warn};

use supportbot_common::models::event::{ChatMessage, InboundEvent};
use supportbot_common::models::rate_limit::RateLimitContext;
use supportbot_common::models::session::Session;
use supportbot_common::traits::api::{AssistantClient, PermissionProvider, TranscriptSource};

use crate::Error;
use crate::config::{EscalationConfig, FailMode};

const CLASSIFIER_PROMPT: &str = "You route customer support conversations. Reply with exactly one word: \
ESCALATE if the user needs a human (angry, asks for a person, account or payment problems the assistant cannot solve), \
otherwise CONTINUE.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationReason {
    /// A staff member is already active; the assistant stays silent.
    SupportHandled,
    ExplicitPhrase,
    Classifier,
    /// The classifier failed or timed out and the fail policy said escalate.
    ClassifierUnavailable,
    /// Nothing asked for a human.
    Continue,
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EscalationReason::SupportHandled => "support_handled",
            EscalationReason::ExplicitPhrase => "explicit_phrase",
            EscalationReason::Classifier => "classifier",
            EscalationReason::ClassifierUnavailable => "classifier_unavailable",
            EscalationReason::Continue => "continue",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationDecision {
    pub escalate: bool,
    pub reason: EscalationReason,
    /// Result of a fresh transcript scan the caller should cache on the
    /// session. `None` when the cached flag was used or the scan failed.
    pub staff_scan: Option<bool>,
}

impl EscalationDecision {
    fn new(escalate: bool, reason: EscalationReason, staff_scan: Option<bool>) -> Self {
        Self { escalate, reason, staff_scan }
    }

    pub fn support_handled(&self) -> bool {
        self.reason == EscalationReason::SupportHandled
    }
}

/// Decides whether a message needs a human. Checks run cheapest first and
/// stop at the first positive.
pub struct EscalationEngine {
    config: EscalationConfig,
    phrases: Option<Regex>,
    assistant: Arc<dyn AssistantClient>,
    transcripts: Arc<dyn TranscriptSource>,
    permissions: Arc<dyn PermissionProvider>,
}

impl EscalationEngine {
    pub fn new(
        config: EscalationConfig,
        assistant: Arc<dyn AssistantClient>,
        transcripts: Arc<dyn TranscriptSource>,
        permissions: Arc<dyn PermissionProvider>,
    ) -> Result<Self, Error> {
        let phrases = build_phrase_matcher(&config.explicit_phrases)?;
        Ok(Self { config, phrases, assistant, transcripts, permissions })
    }

    pub fn config(&self) -> &EscalationConfig {
        &self.config
    }

    pub fn matches_explicit_phrase(&self, content: &str) -> bool {
        self.phrases.as_ref().is_some_and(|re| re.is_match(content))
    }

    /// Scans recent history once for a message written by staff.
    pub async fn scan_for_staff(&self, guild_id: &str, conversation_id: &str) -> Result<bool, Error> {
        let messages = self
            .transcripts
            .recent_messages(guild_id, conversation_id, self.config.transcript_scan_limit)
            .await?;
        for msg in messages.iter().filter(|m| !m.is_bot) {
            if self.permissions.is_staff(&msg.author_id, &msg.author_roles, guild_id).await {
                debug!("Staff message from {} found in {}", msg.author_id, conversation_id);
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Only an exact `ESCALATE` verdict counts. Errors and timeouts go to the
    /// fail policy of `context`.
    pub async fn classify(&self, content: &str, context: RateLimitContext) -> EscalationDecision {
        let messages = [ChatMessage::system(CLASSIFIER_PROMPT), ChatMessage::user(content)];
        let verdict = tokio::time::timeout(
            self.config.classifier_timeout(),
            self.assistant.classify(&messages),
        )
        .await;

        let failure = match verdict {
            Ok(Ok(raw)) => {
                let escalate = raw.trim() == "ESCALATE";
                debug!("Classifier verdict '{}' -> escalate={}", raw.trim(), escalate);
                return if escalate {
                    EscalationDecision::new(true, EscalationReason::Classifier, None)
                } else {
                    EscalationDecision::new(false, EscalationReason::Continue, None)
                };
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {:?}", self.config.classifier_timeout()),
        };

        match self.config.fail_policy.for_context(context) {
            FailMode::Open => {
                warn!("Classifier failed ({}); {} fail policy is open, escalating", failure, context);
                EscalationDecision::new(true, EscalationReason::ClassifierUnavailable, None)
            }
            FailMode::Closed => {
                warn!("Classifier failed ({}); {} fail policy is closed, continuing", failure, context);
                EscalationDecision::new(false, EscalationReason::Continue, None)
            }
        }
    }

    /// Staff presence, then explicit phrases, then the classifier.
    pub async fn decide(
        &self,
        session: &Session,
        evt: &InboundEvent,
        context: RateLimitContext,
    ) -> EscalationDecision {
        let mut staff_scan = None;
        let staff_present = match session.staff_detected {
            Some(cached) => cached,
            None => match self.scan_for_staff(&evt.guild_id, session.key.conversation_id()).await {
                Ok(found) => {
                    staff_scan = Some(found);
                    found
                }
                Err(e) => {
                    warn!("Transcript scan for {} failed, not caching: {}", session.key, e);
                    false
                }
            },
        };
        if staff_present {
            return EscalationDecision::new(false, EscalationReason::SupportHandled, staff_scan);
        }

        if self.matches_explicit_phrase(&evt.content) {
            info!("Explicit escalation phrase from {} in {}", evt.user_id, session.key);
            return EscalationDecision::new(true, EscalationReason::ExplicitPhrase, staff_scan);
        }

        let mut decision = self.classify(&evt.content, context).await;
        decision.staff_scan = staff_scan;
        decision
    }
}

fn build_phrase_matcher(phrases: &[String]) -> Result<Option<Regex>, Error> {
    let alternatives: Vec<String> = phrases
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(regex::escape)
        .collect();
    if alternatives.is_empty() {
        return Ok(None);
    }
    RegexBuilder::new(&alternatives.join("|"))
        .case_insensitive(true)
        .build()
        .map(Some)
        .map_err(|e| Error::Config(format!("Invalid escalation phrase list: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use mockall::mock;
    use supportbot_common::models::catalog::GuildCatalog;
    use supportbot_common::models::event::{GeneratedAnswer, TranscriptMessage};
    use supportbot_common::models::session::SessionKey;

    mock! {
        Assistant {}
        #[async_trait]
        impl AssistantClient for Assistant {
            async fn classify(&self, messages: &[ChatMessage]) -> Result<String, Error>;
            async fn generate(&self, messages: &[ChatMessage]) -> Result<GeneratedAnswer, Error>;
        }
    }

    mock! {
        Transcripts {}
        #[async_trait]
        impl TranscriptSource for Transcripts {
            async fn recent_messages(&self, guild_id: &str, conversation_id: &str, limit: usize) -> Result<Vec<TranscriptMessage>, Error>;
        }
    }

    struct StaffRole;

    #[async_trait]
    impl PermissionProvider for StaffRole {
        async fn is_staff(&self, _user_id: &str, roles: &[String], _guild_id: &str) -> bool {
            roles.iter().any(|r| r == "staff")
        }

        async fn get_catalog(&self, _guild_id: &str) -> Arc<GuildCatalog> {
            Arc::new(GuildCatalog::default())
        }
    }

    /// Never answers within any sane timeout.
    struct SlowAssistant;

    #[async_trait]
    impl AssistantClient for SlowAssistant {
        async fn classify(&self, _messages: &[ChatMessage]) -> Result<String, Error> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("CONTINUE".into())
        }

        async fn generate(&self, _messages: &[ChatMessage]) -> Result<GeneratedAnswer, Error> {
            Ok(GeneratedAnswer::invalid())
        }
    }

    fn quiet_transcripts() -> MockTranscripts {
        let mut t = MockTranscripts::new();
        t.expect_recent_messages().returning(|_, _, _| Ok(vec![]));
        t
    }

    fn engine(assistant: Arc<dyn AssistantClient>, transcripts: MockTranscripts) -> EscalationEngine {
        let config = EscalationConfig { classifier_timeout_ms: 50, ..EscalationConfig::default() };
        EscalationEngine::new(config, assistant, Arc::new(transcripts), Arc::new(StaffRole)).unwrap()
    }

    fn session() -> Session {
        Session::new_default(SessionKey::thread("g", "tickets", "t1"), Utc::now())
    }

    fn message(content: &str) -> InboundEvent {
        InboundEvent::new("g", "tickets", Some("t1"), "u1", content)
    }

    #[tokio::test]
    async fn test_explicit_phrase_skips_classifier() {
        let mut assistant = MockAssistant::new();
        assistant.expect_classify().never();
        let engine = engine(Arc::new(assistant), quiet_transcripts());

        let decision = engine
            .decide(&session(), &message("Can I TALK TO TEAM please?"), RateLimitContext::Ticket)
            .await;
        assert!(decision.escalate);
        assert_eq!(decision.reason, EscalationReason::ExplicitPhrase);
        assert_eq!(decision.staff_scan, Some(false));
    }

    #[tokio::test]
    async fn test_only_exact_escalate_token_counts() {
        let mut assistant = MockAssistant::new();
        let mut verdicts = vec!["ESCALATE\n", "escalate", "ESCALATE because angry"].into_iter();
        assistant
            .expect_classify()
            .times(3)
            .returning(move |_| Ok(verdicts.next().unwrap_or_default().to_string()));
        let engine = engine(Arc::new(assistant), quiet_transcripts());

        assert!(engine.classify("x", RateLimitContext::Public).await.escalate);
        assert!(!engine.classify("x", RateLimitContext::Public).await.escalate);
        assert!(!engine.classify("x", RateLimitContext::Public).await.escalate);
    }

    #[tokio::test]
    async fn test_classifier_timeout_fails_open_in_tickets() {
        let engine = engine(Arc::new(SlowAssistant), quiet_transcripts());
        let decision = engine.decide(&session(), &message("my order is wrong"), RateLimitContext::Ticket).await;
        assert!(decision.escalate);
        assert_eq!(decision.reason, EscalationReason::ClassifierUnavailable);
    }

    #[tokio::test]
    async fn test_classifier_error_fails_closed_in_public() {
        let mut assistant = MockAssistant::new();
        assistant
            .expect_classify()
            .returning(|_| Err(Error::ExternalService("503".into())));
        let engine = engine(Arc::new(assistant), quiet_transcripts());

        let decision = engine.classify("hello", RateLimitContext::Public).await;
        assert!(!decision.escalate);
        assert_eq!(decision.reason, EscalationReason::Continue);
    }

    #[tokio::test]
    async fn test_staff_in_transcript_silences_and_is_reported_for_caching() {
        let mut transcripts = MockTranscripts::new();
        transcripts.expect_recent_messages().times(1).returning(|_, _, _| {
            Ok(vec![TranscriptMessage {
                author_id: "mod".into(),
                author_roles: vec!["staff".into()],
                is_bot: false,
                content: "I'll take this one".into(),
                timestamp: Utc::now(),
            }])
        });
        let mut assistant = MockAssistant::new();
        assistant.expect_classify().never();
        let engine = engine(Arc::new(assistant), transcripts);

        let decision = engine.decide(&session(), &message("hello?"), RateLimitContext::Ticket).await;
        assert!(!decision.escalate);
        assert!(decision.support_handled());
        assert_eq!(decision.staff_scan, Some(true));
    }

    #[tokio::test]
    async fn test_cached_staff_flag_skips_scan() {
        let mut transcripts = MockTranscripts::new();
        transcripts.expect_recent_messages().never();
        let mut assistant = MockAssistant::new();
        assistant.expect_classify().returning(|_| Ok("CONTINUE".into()));
        let engine = engine(Arc::new(assistant), transcripts);

        let mut cached = session();
        cached.staff_detected = Some(false);
        let decision = engine.decide(&cached, &message("how do I reset?"), RateLimitContext::Ticket).await;
        assert!(!decision.escalate);
        assert_eq!(decision.staff_scan, None);

        cached.staff_detected = Some(true);
        assert!(engine.decide(&cached, &message("hi"), RateLimitContext::Ticket).await.support_handled());
    }

    #[test]
    fn test_phrases_are_escaped() {
        let matcher = build_phrase_matcher(&["help (now)".to_string(), " ".to_string()]).unwrap().unwrap();
        assert!(matcher.is_match("please HELP (NOW)"));
        assert!(!matcher.is_match("help now"));
        assert!(build_phrase_matcher(&[]).unwrap().is_none());
    }
}
