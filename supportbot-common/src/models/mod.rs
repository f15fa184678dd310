// File: supportbot-common/src/models/mod.rs
pub mod catalog;
pub mod event;
pub mod outcome;
pub mod rate_limit;
pub mod session;

pub use catalog::{CategoryEntry, GuildCatalog, ProductEntry};
pub use event::{
    ButtonInteraction, ChatMessage, ChatRole, GeneratedAnswer, InboundEvent, InteractionRef,
    ThreadHandle, TranscriptMessage,
};
pub use outcome::{BlockReason, CreationOutcome, InteractionReply, Outcome};
pub use rate_limit::{RateLimitContext, RateLimitDecision, RateLimitReason, RateLimitRecord};
pub use session::{Session, SessionKey, SessionUpdate, TicketState};
