// File: supportbot-core/src/services/mod.rs

pub mod dedup_guard;
pub mod escalation;
pub mod orchestrator;
pub mod permissions;
pub mod rate_limiter;
pub mod session_registry;
pub mod ticket_state;

pub use dedup_guard::{DedupGuard, DedupPermit};
pub use escalation::{EscalationDecision, EscalationEngine, EscalationReason};
pub use orchestrator::{Collaborators, Orchestrator};
pub use permissions::StaticPermissionProvider;
pub use rate_limiter::RateLimiter;
pub use session_registry::SessionRegistry;
pub use ticket_state::TicketStateMachine;
