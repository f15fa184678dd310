// File: supportbot-core/src/services/orchestrator.rs
//
// Composition root. Turns inbound platform events into decisions and the
// few replies the control plane itself is responsible for (welcome,
// hand-off, gating prompts, rate-limit notices, fallbacks).

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use supportbot_common::models::catalog::GuildCatalog;
use supportbot_common::models::event::{ButtonInteraction, ChatMessage, InboundEvent};
use supportbot_common::models::outcome::{BlockReason, CreationOutcome, InteractionReply, Outcome};
use supportbot_common::models::rate_limit::RateLimitContext;
use supportbot_common::models::session::{Session, SessionKey, SessionUpdate, TicketState};
use supportbot_common::traits::api::{AssistantClient, PermissionProvider, ReplySink, TranscriptSource};
use supportbot_common::traits::store::KeyValueStore;

use crate::Error;
use crate::config::{SupportConfig, render};
use crate::services::dedup_guard::DedupGuard;
use crate::services::escalation::{EscalationDecision, EscalationEngine};
use crate::services::rate_limiter::RateLimiter;
use crate::services::session_registry::SessionRegistry;
use crate::services::ticket_state::TicketStateMachine;

/// External collaborators the orchestrator talks to.
pub struct Collaborators {
    pub permissions: Arc<dyn PermissionProvider>,
    pub assistant: Arc<dyn AssistantClient>,
    pub transcripts: Arc<dyn TranscriptSource>,
    pub sink: Arc<dyn ReplySink>,
}

/// Where a message was posted, as far as the control plane cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Surface {
    /// A thread under a ticket parent channel.
    Ticket,
    /// A per-user thread under a public support channel.
    PublicThread,
    /// The public support channel itself.
    SupportChannel,
    Unmanaged,
}

impl Surface {
    fn of(catalog: &GuildCatalog, evt: &InboundEvent) -> Self {
        match (&evt.thread_id, catalog.is_ticket_parent(&evt.channel_id), catalog.is_support_channel(&evt.channel_id)) {
            (Some(_), true, _) => Surface::Ticket,
            (Some(_), false, true) => Surface::PublicThread,
            (None, _, true) => Surface::SupportChannel,
            _ => Surface::Unmanaged,
        }
    }

    fn context(self) -> RateLimitContext {
        match self {
            Surface::Ticket => RateLimitContext::Ticket,
            _ => RateLimitContext::Public,
        }
    }
}

/// Outcome of the locked re-validation step.
enum Applied {
    Decided(Outcome),
    /// The session changed while the escalation decision was in flight.
    Stale,
}

/// The session fields a decision depends on. Staff presence is left out:
/// a positive flag is caught by [`session_block`] instead.
type Fingerprint = (TicketState, bool, Option<String>, Option<String>);

fn fingerprint(session: &Session) -> Fingerprint {
    (
        session.state,
        session.human_help,
        session.category.clone(),
        session.product.clone(),
    )
}

/// Session-level reasons to stay silent, strongest first.
fn session_block(session: &Session) -> Option<BlockReason> {
    if session.is_closed() {
        Some(BlockReason::Closed)
    } else if session.human_help {
        Some(BlockReason::HumanHelp)
    } else if session.staff_present() {
        Some(BlockReason::SupportHandled)
    } else {
        None
    }
}

/// Ticket gating: no answers before a category, and none before a product
/// unless generic answers are allowed.
fn gate(session: &Session, surface: Surface, allow_generic_without_product: bool) -> Outcome {
    if surface != Surface::Ticket {
        return Outcome::AllowAi;
    }
    match session.state {
        TicketState::Created => Outcome::Block(BlockReason::AwaitingCategory),
        TicketState::CategorySelected if !allow_generic_without_product => {
            Outcome::Block(BlockReason::AwaitingProduct)
        }
        _ => Outcome::AllowAi,
    }
}

/// The user a command names after its own word: `<@id>`, `<@!id>` or a bare id.
fn command_target<'a>(content: &'a str, name: &str) -> Option<&'a str> {
    let arg = content.split_whitespace().skip_while(|t| !t.ends_with(name)).nth(1)?;
    let id = match arg.strip_prefix("<@").and_then(|a| a.strip_suffix('>')) {
        Some(mention) => mention.strip_prefix('!').unwrap_or(mention),
        None => arg,
    };
    (!id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')).then_some(id)
}

pub struct Orchestrator {
    config: Arc<SupportConfig>,
    sessions: Arc<SessionRegistry>,
    rate_limiter: Arc<RateLimiter>,
    dedup: Arc<DedupGuard>,
    escalation: EscalationEngine,
    permissions: Arc<dyn PermissionProvider>,
    assistant: Arc<dyn AssistantClient>,
    sink: Arc<dyn ReplySink>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<SupportConfig>,
        store: Arc<dyn KeyValueStore>,
        collaborators: Collaborators,
    ) -> Result<Self, Error> {
        config.validate()?;
        let Collaborators { permissions, assistant, transcripts, sink } = collaborators;
        let sessions = Arc::new(SessionRegistry::new(store, permissions.clone(), &config.sessions));
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limits.clone()));
        let dedup = Arc::new(DedupGuard::new(config.dedup.stale_after_seconds));
        let escalation = EscalationEngine::new(
            config.escalation.clone(),
            assistant.clone(),
            transcripts,
            permissions.clone(),
        )?;
        Ok(Self {
            config,
            sessions,
            rate_limiter,
            dedup,
            escalation,
            permissions,
            assistant,
            sink,
        })
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn dedup(&self) -> &Arc<DedupGuard> {
        &self.dedup
    }

    pub fn config(&self) -> &SupportConfig {
        &self.config
    }

    // ---------------------------------------------------------------
    // Messages
    // ---------------------------------------------------------------

    /// Decides what happens to `evt` without generating an answer.
    pub async fn on_message(&self, evt: &InboundEvent) -> Outcome {
        self.route(evt).await.0
    }

    /// Full handling: decide, then answer when the assistant may.
    pub async fn handle_message(&self, evt: &InboundEvent) -> Outcome {
        let (outcome, routed) = self.route(evt).await;
        debug!("Message from {} in {} -> {:?}", evt.user_id, routed.conversation_id(), outcome);
        if outcome.is_allow() {
            if let Err(e) = self.respond(&routed).await {
                error!("Failed to answer in {}: {}", routed.conversation_id(), e);
            }
        }
        outcome
    }

    /// Returns the outcome together with the event as it should be answered,
    /// which differs from `evt` when a public thread was just opened.
    async fn route(&self, evt: &InboundEvent) -> (Outcome, InboundEvent) {
        let catalog = self.permissions.get_catalog(&evt.guild_id).await;
        let surface = Surface::of(&catalog, evt);
        match surface {
            Surface::Unmanaged => (Outcome::Block(BlockReason::Unmanaged), evt.clone()),
            Surface::SupportChannel => self.route_support_channel(evt, &catalog).await,
            Surface::Ticket | Surface::PublicThread => {
                let outcome = self.decide_managed(evt, &catalog, surface, true).await;
                (outcome, evt.clone())
            }
        }
    }

    async fn route_support_channel(&self, evt: &InboundEvent, catalog: &GuildCatalog) -> (Outcome, InboundEvent) {
        if !evt.mentions_bot {
            return (Outcome::Block(BlockReason::Unmanaged), evt.clone());
        }
        if self.permissions.is_staff(&evt.user_id, &evt.user_roles, &evt.guild_id).await {
            return (Outcome::Block(BlockReason::StaffMessage), evt.clone());
        }
        if evt.content.trim().is_empty() {
            return (Outcome::Block(BlockReason::EmptyMessage), evt.clone());
        }
        if let Some(limited) = self.check_rate_limit(evt, RateLimitContext::Public).await {
            return (limited, evt.clone());
        }

        let moved = match self.open_public_thread(evt).await {
            Ok(Some(moved)) => moved,
            Ok(None) => return (Outcome::Block(BlockReason::Unmanaged), evt.clone()),
            Err(e) => return (self.fail_with_fallback(evt, catalog, e).await, evt.clone()),
        };
        let outcome = self.decide_managed(&moved, catalog, Surface::PublicThread, false).await;
        (outcome, moved)
    }

    /// Opens a per-user thread for a mention in a support channel. `None`
    /// when a duplicate delivery of the same mention is already doing it.
    async fn open_public_thread(&self, evt: &InboundEvent) -> Result<Option<InboundEvent>, Error> {
        let dedup_key = format!("public:{}:{}:{}", evt.guild_id, evt.channel_id, evt.user_id);
        let Some(_permit) = self.dedup.acquire_scoped(&dedup_key) else {
            debug!("Duplicate public mention from {} ignored", evt.user_id);
            return Ok(None);
        };

        let name = render(&self.config.messages.public_thread_name, &[("user", &evt.user_id)]);
        let handle = self.sink.create_thread(evt, &name).await?;
        let moved = evt.in_thread(&handle.thread_id);
        self.sessions.create(&moved.session_key()).await?;
        info!("Opened support thread {} for user {}", handle.thread_id, evt.user_id);

        let welcome = render(&self.config.messages.public_welcome, &[("user", &evt.user_id)]);
        self.send(&moved, &welcome).await;
        Ok(Some(moved))
    }

    async fn check_rate_limit(&self, evt: &InboundEvent, context: RateLimitContext) -> Option<Outcome> {
        let decision = self.rate_limiter.check_and_record(&evt.user_id, context, evt.timestamp);
        if decision.allowed {
            return None;
        }
        let text = render(&self.config.messages.rate_limited, &[("retry", &decision.human_wait())]);
        self.send(evt, &text).await;
        Some(Outcome::RateLimited(decision))
    }

    /// The managed-conversation pipeline: session checks, rate limit,
    /// escalation decision outside any lock, then a locked re-validation
    /// that applies the decision or retries it if the session moved.
    async fn decide_managed(
        &self,
        evt: &InboundEvent,
        catalog: &GuildCatalog,
        surface: Surface,
        rate_limit: bool,
    ) -> Outcome {
        let key = evt.session_key();
        match self.sessions.has(&key).await {
            Ok(true) => {}
            Ok(false) => return Outcome::Block(BlockReason::Unmanaged),
            Err(e) => return self.fail_with_fallback(evt, catalog, e).await,
        }

        if self.permissions.is_staff(&evt.user_id, &evt.user_roles, &evt.guild_id).await {
            if let Err(e) = self.sessions.record_staff_detected(&key, true).await {
                warn!("Could not record staff presence in {}: {}", key, e);
            }
            return Outcome::Block(BlockReason::StaffMessage);
        }

        let context = surface.context();
        let max_attempts = self.config.escalation.max_decision_attempts.max(1);
        for attempt in 1..=max_attempts {
            let snapshot = match self.sessions.get(&key).await {
                Ok(s) => s,
                Err(e) => return self.fail_with_fallback(evt, catalog, e).await,
            };
            if let Some(reason) = session_block(&snapshot) {
                return Outcome::Block(reason);
            }

            if attempt == 1 {
                if evt.content.trim().is_empty() {
                    return Outcome::Block(BlockReason::EmptyMessage);
                }
                if rate_limit {
                    if let Some(limited) = self.check_rate_limit(evt, context).await {
                        return limited;
                    }
                }
            }

            let decision = self.escalation.decide(&snapshot, evt, context).await;
            if let Some(found) = decision.staff_scan {
                if let Err(e) = self.sessions.record_staff_detected(&key, found).await {
                    warn!("Could not cache staff scan for {}: {}", key, e);
                }
            }
            if decision.support_handled() {
                return Outcome::Block(BlockReason::SupportHandled);
            }

            match self.apply_decision(&key, &snapshot, decision, evt, surface).await {
                Ok((session, Applied::Decided(outcome))) => {
                    self.announce(evt, catalog, &session, &outcome).await;
                    return outcome;
                }
                Ok((_, Applied::Stale)) => {
                    debug!("Session {} changed during decision (attempt {}/{})", key, attempt, max_attempts);
                }
                Err(Error::NotFound(_)) => {
                    debug!("Session {} was removed during decision", key);
                    return Outcome::Block(BlockReason::Unmanaged);
                }
                Err(Error::Validation(e)) => {
                    warn!("Rejected decision for {}: {}", key, e);
                    return Outcome::Block(BlockReason::Conflict);
                }
                Err(e) => return self.fail_with_fallback(evt, catalog, e).await,
            }
        }

        warn!("Giving up on {} after {} conflicting attempts", key, max_attempts);
        Outcome::Block(BlockReason::Conflict)
    }

    async fn apply_decision(
        &self,
        key: &SessionKey,
        snapshot: &Session,
        decision: EscalationDecision,
        evt: &InboundEvent,
        surface: Surface,
    ) -> Result<(Session, Applied), Error> {
        let expected = fingerprint(snapshot);
        let allow_generic = self.config.escalation.allow_generic_without_product;
        let at = evt.timestamp;

        self.sessions
            .transact_existing(key, move |current| {
                if let Some(reason) = session_block(current) {
                    return Ok((SessionUpdate::new(), Applied::Decided(Outcome::Block(reason))));
                }
                if fingerprint(current) != expected {
                    return Ok((SessionUpdate::new(), Applied::Stale));
                }
                if decision.escalate {
                    let reason = decision.reason.to_string();
                    let update = TicketStateMachine::escalate(current, &reason)?.last_activity(at);
                    return Ok((update, Applied::Decided(Outcome::Escalate { reason })));
                }
                let outcome = gate(current, surface, allow_generic);
                Ok((SessionUpdate::new().last_activity(at), Applied::Decided(outcome)))
            })
            .await
    }

    /// Replies the control plane owes the user for a decision.
    async fn announce(&self, evt: &InboundEvent, catalog: &GuildCatalog, session: &Session, outcome: &Outcome) {
        let messages = &self.config.messages;
        match outcome {
            Outcome::Escalate { reason } => {
                info!("Escalated {} ({})", session.key, reason);
                self.send(evt, &self.handoff_text(catalog, reason)).await;
            }
            Outcome::Block(BlockReason::AwaitingCategory) => self.send(evt, &messages.awaiting_category).await,
            Outcome::Block(BlockReason::AwaitingProduct) => self.send(evt, &messages.awaiting_product).await,
            _ => {}
        }
    }

    fn handoff_text(&self, catalog: &GuildCatalog, reason: &str) -> String {
        let role = catalog
            .escalation_role_id
            .as_ref()
            .map(|id| format!(" (<@&{}>)", id))
            .unwrap_or_default();
        render(&self.config.messages.handoff, &[("role", &role), ("reason", reason)])
    }

    /// Store failures end the event: the user gets the guild's fallback text.
    async fn fail_with_fallback(&self, evt: &InboundEvent, catalog: &GuildCatalog, e: Error) -> Outcome {
        error!("Dropping event in {}: {}", evt.conversation_id(), e);
        self.send(evt, &catalog.fallback_message_template).await;
        Outcome::Block(BlockReason::StoreFailure)
    }

    /// Best-effort reply; platform errors are logged, never propagated.
    async fn send(&self, evt: &InboundEvent, text: &str) {
        if let Err(e) = self.sink.reply(evt, text).await {
            warn!("Reply to {} failed: {}", evt.conversation_id(), e);
        }
    }

    /// Produces the assistant's answer for an `AllowAi` message. Returns
    /// whether a generated answer (rather than the fallback) was sent.
    pub async fn respond(&self, evt: &InboundEvent) -> Result<bool, Error> {
        let catalog = self.permissions.get_catalog(&evt.guild_id).await;
        if let Err(e) = self.sink.send_typing_indicator(evt).await {
            debug!("Typing indicator failed in {}: {}", evt.conversation_id(), e);
        }

        let session = match self.sessions.get(&evt.session_key()).await {
            Ok(s) => s,
            Err(e) => {
                self.fail_with_fallback(evt, &catalog, e).await;
                return Ok(false);
            }
        };

        let messages = [
            ChatMessage::system(answer_prompt(&session, &catalog)),
            ChatMessage::user(evt.content.clone()),
        ];
        let generated = tokio::time::timeout(
            self.config.escalation.classifier_timeout(),
            self.assistant.generate(&messages),
        )
        .await;

        let min_confidence = self.config.escalation.min_answer_confidence;
        match generated {
            Ok(Ok(answer)) if answer.is_valid && answer.confidence >= min_confidence && !answer.text.trim().is_empty() => {
                self.sink.reply(evt, &answer.text).await?;
                Ok(true)
            }
            Ok(Ok(answer)) => {
                debug!(
                    "Discarding answer in {} (valid={}, confidence={:.2})",
                    evt.conversation_id(),
                    answer.is_valid,
                    answer.confidence
                );
                self.sink.reply(evt, &catalog.fallback_message_template).await?;
                Ok(false)
            }
            Ok(Err(e)) => {
                warn!("Generation failed in {}: {}", evt.conversation_id(), e);
                self.sink.reply(evt, &catalog.fallback_message_template).await?;
                Ok(false)
            }
            Err(_) => {
                warn!("Generation timed out in {}", evt.conversation_id());
                self.sink.reply(evt, &catalog.fallback_message_template).await?;
                Ok(false)
            }
        }
    }

    // ---------------------------------------------------------------
    // Resource lifecycle
    // ---------------------------------------------------------------

    /// A thread was created. Ticket threads get a session and a welcome,
    /// exactly once no matter how often the platform repeats the event.
    pub async fn on_resource_created(&self, evt: &InboundEvent) -> Result<CreationOutcome, Error> {
        let catalog = self.permissions.get_catalog(&evt.guild_id).await;
        if Surface::of(&catalog, evt) != Surface::Ticket {
            return Ok(CreationOutcome::NotManaged);
        }
        let key = evt.session_key();
        let Some(_permit) = self.dedup.acquire_scoped(&key.storage_key()) else {
            debug!("Duplicate creation event for {} absorbed", key);
            return Ok(CreationOutcome::Duplicate);
        };

        if self.sessions.has(&key).await? {
            debug!("Session {} already exists, skipping welcome", key);
            return Ok(CreationOutcome::AlreadyExists);
        }
        let (_, created) = self.sessions.create(&key).await?;
        if !created {
            return Ok(CreationOutcome::AlreadyExists);
        }
        self.send(evt, &self.config.messages.ticket_welcome).await;
        info!("Ticket {} opened", key);
        Ok(CreationOutcome::Created)
    }

    /// A thread or channel was deleted. Returns how many sessions went away.
    pub async fn on_resource_deleted(&self, evt: &InboundEvent) -> Result<usize, Error> {
        if evt.thread_id.is_some() {
            let key = evt.session_key();
            if !self.sessions.has(&key).await? {
                return Ok(0);
            }
            self.sessions.delete(&key).await?;
            info!("Session {} removed with its thread", key);
            return Ok(1);
        }

        let mut removed = 0;
        for key in self.sessions.list_keys().await? {
            if key.guild_id == evt.guild_id && key.channel_id == evt.channel_id {
                self.sessions.delete(&key).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!("Channel {} deleted, removed {} session(s)", evt.channel_id, removed);
        }
        Ok(removed)
    }

    // ---------------------------------------------------------------
    // Interactions
    // ---------------------------------------------------------------

    /// Category and product buttons in ticket threads.
    pub async fn on_button(&self, interaction: &ButtonInteraction) -> Result<InteractionReply, Error> {
        let evt = &interaction.event;
        let messages = &self.config.messages;
        let catalog = self.permissions.get_catalog(&evt.guild_id).await;
        let key = evt.session_key();

        if Surface::of(&catalog, evt) != Surface::Ticket || !self.sessions.has(&key).await? {
            return Ok(InteractionReply::ephemeral(messages.invalid_selection.clone()));
        }
        let Some((kind, value)) = interaction.selection() else {
            return Ok(InteractionReply::ephemeral(messages.invalid_selection.clone()));
        };

        let picker_catalog = catalog.clone();
        let update = match kind {
            "category" => {
                let id = value.to_string();
                self.sessions
                    .update(&key, move |current| {
                        Ok(TicketStateMachine::select_category(current, &picker_catalog, &id)?)
                    })
                    .await
            }
            "product" => {
                let id = value.to_string();
                self.sessions
                    .update(&key, move |current| {
                        Ok(TicketStateMachine::select_product(current, &picker_catalog, &id)?)
                    })
                    .await
            }
            other => {
                debug!("Unknown component '{}' in {}", other, key);
                return Ok(InteractionReply::ephemeral(messages.invalid_selection.clone()));
            }
        };

        let session = match update {
            Ok(session) => session,
            Err(Error::Validation(e)) => {
                info!("Selection '{}' rejected in {}: {}", interaction.custom_id, key, e);
                return Ok(InteractionReply::ephemeral(messages.invalid_selection.clone()));
            }
            Err(Error::NotFound(_)) => {
                return Ok(InteractionReply::ephemeral(messages.invalid_selection.clone()));
            }
            Err(e) => return Err(e),
        };

        let text = match session.state {
            TicketState::Escalated => {
                let reason = session.escalation_reason.clone().unwrap_or_default();
                info!("Ticket {} escalated by category '{}'", key, reason);
                self.handoff_text(&catalog, &reason)
            }
            TicketState::ProductSelected => {
                let label = session
                    .product
                    .as_deref()
                    .and_then(|p| catalog.product(p))
                    .map(|p| p.label.clone())
                    .unwrap_or_default();
                render(&messages.product_selected, &[("product", &label)])
            }
            _ => {
                let label = session
                    .category
                    .as_deref()
                    .map(|c| catalog.category_label(c))
                    .unwrap_or_default();
                render(&messages.category_selected, &[("category", &label)])
            }
        };
        Ok(InteractionReply::public(text))
    }

    /// Staff-only admin commands: `resume`, `reset`, `close`, `status`.
    pub async fn on_command(&self, name: &str, evt: &InboundEvent) -> Result<InteractionReply, Error> {
        let messages = &self.config.messages;
        if !self.permissions.is_staff(&evt.user_id, &evt.user_roles, &evt.guild_id).await {
            let denied = Error::PermissionDenied(format!("{} may not run '{}'", evt.user_id, name));
            info!("{}", denied);
            return Ok(InteractionReply::ephemeral(messages.permission_denied.clone()));
        }

        let key = evt.session_key();
        match name {
            "resume" => match self.sessions.resume(&key).await {
                Ok(session) => {
                    info!("{} resumed {} into {}", evt.user_id, key, session.state);
                    Ok(InteractionReply::public(messages.resumed.clone()))
                }
                Err(Error::NotFound(_)) => Ok(InteractionReply::ephemeral("There is no session here to resume.")),
                Err(Error::Validation(e)) => Ok(InteractionReply::ephemeral(format!("Cannot resume: {}", e))),
                Err(e) => Err(e),
            },
            "reset" => {
                self.sessions.delete(&key).await?;
                info!("{} reset {}", evt.user_id, key);
                match command_target(&evt.content, name) {
                    Some(user) => {
                        self.rate_limiter.reset(user, RateLimitContext::Ticket);
                        self.rate_limiter.reset(user, RateLimitContext::Public);
                        info!("{} cleared rate limits of {}", evt.user_id, user);
                        Ok(InteractionReply::ephemeral(format!("Session reset. Rate limits cleared for <@{}>.", user)))
                    }
                    None => Ok(InteractionReply::ephemeral("Session reset.")),
                }
            }
            "close" => {
                if !self.sessions.has(&key).await? {
                    return Ok(InteractionReply::ephemeral("There is no session here to close."));
                }
                match self.sessions.update(&key, |current| Ok(TicketStateMachine::close(current)?)).await {
                    Ok(_) => {
                        info!("{} closed {}", evt.user_id, key);
                        Ok(InteractionReply::public(messages.closed.clone()))
                    }
                    Err(Error::NotFound(_)) => Ok(InteractionReply::ephemeral("There is no session here to close.")),
                    Err(Error::Validation(e)) => Ok(InteractionReply::ephemeral(format!("Cannot close: {}", e))),
                    Err(e) => Err(e),
                }
            }
            "status" => {
                if !self.sessions.has(&key).await? {
                    return Ok(InteractionReply::ephemeral("This conversation is not managed by the bot."));
                }
                let session = self.sessions.get(&key).await?;
                Ok(InteractionReply::ephemeral(describe(&session)))
            }
            other => Ok(InteractionReply::ephemeral(format!("Unknown command '{}'.", other))),
        }
    }
}

fn answer_prompt(session: &Session, catalog: &GuildCatalog) -> String {
    let mut prompt = String::from(
        "You are a support assistant. Answer briefly and accurately. If you are unsure, say so \
         and suggest asking to talk to team.",
    );
    if let Some(category) = &session.category {
        prompt.push_str(&format!(" Ticket category: {}.", catalog.category_label(category)));
    }
    if let Some(product) = session.product.as_deref().and_then(|p| catalog.product(p)) {
        prompt.push_str(&format!(" Product: {}.", product.label));
    }
    prompt
}

fn describe(session: &Session) -> String {
    format!(
        "state={} category={} product={} human_help={} staff_detected={} reason={} last_activity={}",
        session.state,
        session.category.as_deref().unwrap_or("-"),
        session.product.as_deref().unwrap_or("-"),
        session.human_help,
        session.staff_detected.map_or("unknown".to_string(), |b| b.to_string()),
        session.escalation_reason.as_deref().unwrap_or("-"),
        session.last_activity.format("%Y-%m-%d %H:%M:%S"),
    )
}
