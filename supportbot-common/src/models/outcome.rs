// File: supportbot-common/src/models/outcome.rs

use std::fmt;

use crate::models::rate_limit::RateLimitDecision;

/// Why the orchestrator kept the assistant silent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// The conversation was never touched by the bot.
    Unmanaged,
    Closed,
    /// Sticky human hand-off.
    HumanHelp,
    /// A staff member is already active in the thread.
    SupportHandled,
    /// The message itself came from staff.
    StaffMessage,
    AwaitingCategory,
    AwaitingProduct,
    EmptyMessage,
    /// The session kept changing under the decision.
    Conflict,
    /// The store failed after retries; the user got the fallback message.
    StoreFailure,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BlockReason::Unmanaged => "unmanaged",
            BlockReason::Closed => "closed",
            BlockReason::HumanHelp => "human_help",
            BlockReason::SupportHandled => "support_handled",
            BlockReason::StaffMessage => "staff_message",
            BlockReason::AwaitingCategory => "awaiting_category",
            BlockReason::AwaitingProduct => "awaiting_product",
            BlockReason::EmptyMessage => "empty_message",
            BlockReason::Conflict => "conflict",
            BlockReason::StoreFailure => "store_failure",
        };
        write!(f, "{}", s)
    }
}

/// The decision for one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    AllowAi,
    Block(BlockReason),
    Escalate { reason: String },
    RateLimited(RateLimitDecision),
}

impl Outcome {
    pub fn is_allow(&self) -> bool {
        matches!(self, Outcome::AllowAi)
    }
}

/// Result of a "resource created" event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationOutcome {
    Created,
    /// Another handler is creating the same resource right now.
    Duplicate,
    /// A session already exists (e.g. a redelivery after restart).
    AlreadyExists,
    NotManaged,
}

/// Response to a button or command; ephemeral replies go only to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionReply {
    pub text: String,
    pub ephemeral: bool,
}

impl InteractionReply {
    pub fn public(text: impl Into<String>) -> Self {
        Self { text: text.into(), ephemeral: false }
    }

    pub fn ephemeral(text: impl Into<String>) -> Self {
        Self { text: text.into(), ephemeral: true }
    }
}
