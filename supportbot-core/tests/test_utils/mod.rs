// File: supportbot-core/tests/test_utils/mod.rs
#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use supportbot_common::models::catalog::GuildCatalog;
use supportbot_common::models::event::{
    ChatMessage, GeneratedAnswer, InboundEvent, ThreadHandle, TranscriptMessage,
};
use supportbot_common::traits::api::{AssistantClient, ReplySink, TranscriptSource};
use supportbot_common::traits::store::KeyValueStore;
use supportbot_core::config::{RateLimitConfig, SupportConfig};
use supportbot_core::repositories::InMemoryKeyValueStore;
use supportbot_core::services::{Collaborators, Orchestrator, StaticPermissionProvider};
use supportbot_core::Error;

pub const GUILD: &str = "g1";
pub const TICKETS: &str = "tickets";
pub const HELP: &str = "help";
pub const STAFF_ROLE: &str = "staff";
pub const ESCALATION_ROLE: &str = "support-team";

/// One message the orchestrator sent, with the conversation it went to.
#[derive(Debug, Clone, PartialEq)]
pub struct SentReply {
    pub conversation_id: String,
    pub text: String,
}

#[derive(Default)]
pub struct RecordingSink {
    pub replies: Mutex<Vec<SentReply>>,
    pub threads_created: AtomicUsize,
    pub typing: AtomicUsize,
}

impl RecordingSink {
    pub fn replies(&self) -> Vec<SentReply> {
        self.replies.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.replies().into_iter().map(|r| r.text).collect()
    }

    pub fn count_containing(&self, needle: &str) -> usize {
        self.texts().iter().filter(|t| t.contains(needle)).count()
    }
}

#[async_trait]
impl ReplySink for RecordingSink {
    async fn reply(&self, evt: &InboundEvent, text: &str) -> Result<(), Error> {
        // Widens the window for concurrent handlers to overlap.
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.replies.lock().unwrap().push(SentReply {
            conversation_id: evt.conversation_id().to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn create_thread(&self, _evt: &InboundEvent, name: &str) -> Result<ThreadHandle, Error> {
        let n = self.threads_created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ThreadHandle { thread_id: format!("thread-{}", n), name: name.to_string() })
    }

    async fn send_typing_indicator(&self, _evt: &InboundEvent) -> Result<(), Error> {
        self.typing.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Runs inside `classify`, after the call is counted. Lets a test change
/// the store while a decision is in flight.
pub type ClassifyHook = Arc<dyn Fn(usize) -> BoxFuture<'static, ()> + Send + Sync>;

/// Assistant with a fixed verdict and answer. A delay longer than the
/// configured timeout simulates an outage.
pub struct ScriptedAssistant {
    pub verdict: Mutex<Result<String, String>>,
    pub answer: Mutex<GeneratedAnswer>,
    pub delay: Mutex<Duration>,
    pub on_classify: Mutex<Option<ClassifyHook>>,
    pub classify_calls: AtomicUsize,
    pub generate_calls: AtomicUsize,
}

impl Default for ScriptedAssistant {
    fn default() -> Self {
        Self {
            verdict: Mutex::new(Ok("CONTINUE".into())),
            answer: Mutex::new(GeneratedAnswer {
                is_valid: true,
                text: "Try restarting the app.".into(),
                confidence: 0.9,
            }),
            delay: Mutex::new(Duration::ZERO),
            on_classify: Mutex::new(None),
            classify_calls: AtomicUsize::new(0),
            generate_calls: AtomicUsize::new(0),
        }
    }
}

impl ScriptedAssistant {
    pub fn set_verdict(&self, verdict: &str) {
        *self.verdict.lock().unwrap() = Ok(verdict.to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn set_answer(&self, answer: GeneratedAnswer) {
        *self.answer.lock().unwrap() = answer;
    }

    /// `hook` receives the 1-based number of the classify call.
    pub fn set_on_classify<F, Fut>(&self, hook: F)
    where
        F: Fn(usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let hook: ClassifyHook = Arc::new(move |call| Box::pin(hook(call)) as BoxFuture<'static, ()>);
        *self.on_classify.lock().unwrap() = Some(hook);
    }

    pub fn classify_calls(&self) -> usize {
        self.classify_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssistantClient for ScriptedAssistant {
    async fn classify(&self, _messages: &[ChatMessage]) -> Result<String, Error> {
        let call = self.classify_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let hook = self.on_classify.lock().unwrap().clone();
        if let Some(hook) = hook {
            hook(call).await;
        }
        let delay = *self.delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        self.verdict.lock().unwrap().clone().map_err(Error::ExternalService)
    }

    async fn generate(&self, _messages: &[ChatMessage]) -> Result<GeneratedAnswer, Error> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        Ok(self.answer.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct FakeTranscripts {
    pub messages: Mutex<Vec<TranscriptMessage>>,
    pub scans: AtomicUsize,
}

#[async_trait]
impl TranscriptSource for FakeTranscripts {
    async fn recent_messages(
        &self,
        _guild_id: &str,
        _conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<TranscriptMessage>, Error> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        Ok(self.messages.lock().unwrap().iter().take(limit).cloned().collect())
    }
}

/// Every call fails as if the database were gone.
pub struct FailingStore;

#[async_trait]
impl KeyValueStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, Error> {
        Err(Error::ExternalService("store unavailable".into()))
    }
    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Option<u64>) -> Result<(), Error> {
        Err(Error::ExternalService("store unavailable".into()))
    }
    async fn del(&self, _key: &str) -> Result<(), Error> {
        Err(Error::ExternalService("store unavailable".into()))
    }
    async fn scan(&self, _prefix: &str) -> Result<Vec<String>, Error> {
        Err(Error::ExternalService("store unavailable".into()))
    }
}

pub fn test_catalog() -> GuildCatalog {
    GuildCatalog {
        staff_role_ids: vec![STAFF_ROLE.into()],
        escalation_role_id: Some(ESCALATION_ROLE.into()),
        ticket_parent_channel_ids: vec![TICKETS.into()],
        support_channel_ids: vec![HELP.into()],
        ..GuildCatalog::default()
    }
}

/// Lenient limits so only tests about rate limiting ever hit them.
pub fn test_config() -> SupportConfig {
    let mut config = SupportConfig::default();
    config.default_catalog = test_catalog();
    config.escalation.classifier_timeout_ms = 200;
    let lenient = RateLimitConfig {
        cooldown_seconds: 0,
        max_per_minute: 1000,
        max_per_hour: 1000,
        ..RateLimitConfig::public_defaults()
    };
    config.rate_limits.public = lenient.clone();
    config.rate_limits.ticket = lenient;
    config
}

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub sink: Arc<RecordingSink>,
    pub assistant: Arc<ScriptedAssistant>,
    pub transcripts: Arc<FakeTranscripts>,
    pub store: Arc<dyn KeyValueStore>,
}

pub fn harness(config: SupportConfig) -> Harness {
    harness_with_store(config, Arc::new(InMemoryKeyValueStore::new()))
}

pub fn harness_with_store(config: SupportConfig, store: Arc<dyn KeyValueStore>) -> Harness {
    let sink = Arc::new(RecordingSink::default());
    let assistant = Arc::new(ScriptedAssistant::default());
    let transcripts = Arc::new(FakeTranscripts::default());
    let permissions = Arc::new(StaticPermissionProvider::from_config(&config));
    let orchestrator = Orchestrator::new(
        Arc::new(config),
        store.clone(),
        Collaborators {
            permissions,
            assistant: assistant.clone(),
            transcripts: transcripts.clone(),
            sink: sink.clone(),
        },
    )
    .expect("orchestrator");
    Harness { orchestrator: Arc::new(orchestrator), sink, assistant, transcripts, store }
}

pub fn ticket_msg(thread: &str, user: &str, content: &str) -> InboundEvent {
    InboundEvent::new(GUILD, TICKETS, Some(thread), user, content)
}

pub fn staff_msg(thread: &str, content: &str) -> InboundEvent {
    ticket_msg(thread, "mod-1", content).with_roles(&[STAFF_ROLE])
}

pub fn thread_created(thread: &str) -> InboundEvent {
    InboundEvent::new(GUILD, TICKETS, Some(thread), "opener", "")
}
