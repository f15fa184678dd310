// File: supportbot-core/src/services/ticket_state.rs
//
// Lifecycle rules for ticket-style sessions. Everything here is pure: the
// functions inspect a session and return the update to apply, and the
// session registry persists it.

use supportbot_common::ValidationError;
use supportbot_common::models::catalog::GuildCatalog;
use supportbot_common::models::session::{Session, SessionUpdate, TicketState};

pub struct TicketStateMachine;

impl TicketStateMachine {
    /// The only permitted outward edges of each state.
    pub fn allowed_targets(from: TicketState) -> &'static [TicketState] {
        use TicketState::*;
        match from {
            Created => &[CategorySelected, Escalated, Closed],
            CategorySelected => &[ProductSelected, Escalated, Closed],
            ProductSelected => &[Escalated, Closed],
            Escalated => &[Closed],
            Closed => &[],
        }
    }

    pub fn can_transition(from: TicketState, to: TicketState) -> bool {
        Self::allowed_targets(from).contains(&to)
    }

    /// Staying in the same (non-terminal) state is not a transition.
    pub fn validate_transition(from: TicketState, to: TicketState) -> Result<(), ValidationError> {
        if from == to && !from.is_terminal() {
            return Ok(());
        }
        if Self::can_transition(from, to) {
            Ok(())
        } else {
            Err(ValidationError::IllegalTransition { from, to })
        }
    }

    /// Invariants every persisted session must satisfy.
    pub fn validate_session(session: &Session, catalog: &GuildCatalog) -> Result<(), ValidationError> {
        if let Some(category) = &session.category {
            if catalog.category(category).is_none() {
                return Err(ValidationError::UnknownCategory(category.clone()));
            }
        }
        if let Some(product) = &session.product {
            if catalog.product(product).is_none() {
                return Err(ValidationError::UnknownProduct(product.clone()));
            }
        }
        let handed_over = matches!(session.state, TicketState::Escalated | TicketState::Closed);
        if session.human_help && !handed_over {
            return Err(ValidationError::InvariantViolated(format!(
                "humanHelp requires ESCALATED or CLOSED, found {}",
                session.state
            )));
        }
        if session.escalation_reason.is_some() && !handed_over {
            return Err(ValidationError::InvariantViolated(format!(
                "escalationReason is only set on escalated sessions, found {}",
                session.state
            )));
        }
        Ok(())
    }

    fn ensure_open(session: &Session) -> Result<(), ValidationError> {
        if session.is_closed() {
            Err(ValidationError::SessionClosed(session.key.to_string()))
        } else {
            Ok(())
        }
    }

    /// Category selection. Immediate-escalation categories jump straight to
    /// ESCALATED in one step; the rest wait for a product.
    pub fn select_category(
        session: &Session,
        catalog: &GuildCatalog,
        category_id: &str,
    ) -> Result<SessionUpdate, ValidationError> {
        Self::ensure_open(session)?;
        let entry = catalog
            .category(category_id)
            .ok_or_else(|| ValidationError::UnknownCategory(category_id.to_string()))?;

        if catalog.is_immediate_escalation(category_id) {
            Self::validate_transition(session.state, TicketState::Escalated)?;
            if !matches!(session.state, TicketState::Created | TicketState::CategorySelected) {
                return Err(ValidationError::IllegalTransition {
                    from: session.state,
                    to: TicketState::Escalated,
                });
            }
            return Ok(SessionUpdate::new()
                .category(entry.id.clone())
                .state(TicketState::Escalated)
                .questions_answered(true)
                .human_help(true)
                .escalation_reason(Some(entry.label.clone())));
        }

        Self::validate_transition(session.state, TicketState::CategorySelected)?;
        let mut update = SessionUpdate::new()
            .category(entry.id.clone())
            .state(TicketState::CategorySelected);
        if session.category.as_deref() != Some(category_id) {
            update = update.clear_product();
        }
        Ok(update)
    }

    pub fn select_product(
        session: &Session,
        catalog: &GuildCatalog,
        product_id: &str,
    ) -> Result<SessionUpdate, ValidationError> {
        Self::ensure_open(session)?;
        let entry = catalog
            .product(product_id)
            .ok_or_else(|| ValidationError::UnknownProduct(product_id.to_string()))?;
        Self::validate_transition(session.state, TicketState::ProductSelected)?;
        Ok(SessionUpdate::new()
            .product(entry.id.clone())
            .state(TicketState::ProductSelected))
    }

    /// Sticky hand-off to staff. Escalating an escalated session changes
    /// nothing.
    pub fn escalate(session: &Session, reason: &str) -> Result<SessionUpdate, ValidationError> {
        Self::ensure_open(session)?;
        if session.state == TicketState::Escalated {
            return Ok(SessionUpdate::new().human_help(true));
        }
        Self::validate_transition(session.state, TicketState::Escalated)?;
        Ok(SessionUpdate::new()
            .state(TicketState::Escalated)
            .human_help(true)
            .escalation_reason(Some(reason.to_string())))
    }

    pub fn close(session: &Session) -> Result<SessionUpdate, ValidationError> {
        Self::ensure_open(session)?;
        Self::validate_transition(session.state, TicketState::Closed)?;
        Ok(SessionUpdate::new().state(TicketState::Closed))
    }

    /// Staff override of the sticky escalation. Deliberately outside the
    /// transition table: only ESCALATED sessions can be resumed, and they go
    /// back to PRODUCT_SELECTED when a product is known, else to CREATED.
    pub fn resume(session: &Session) -> Result<SessionUpdate, ValidationError> {
        Self::ensure_open(session)?;
        if session.state != TicketState::Escalated {
            return Err(ValidationError::IllegalTransition {
                from: session.state,
                to: TicketState::Created,
            });
        }
        let update = SessionUpdate::new()
            .human_help(false)
            .escalation_reason(None)
            .staff_detected(Some(false));
        if session.product.is_some() {
            Ok(update.state(TicketState::ProductSelected))
        } else {
            Ok(update
                .state(TicketState::Created)
                .clear_category()
                .questions_answered(false))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use supportbot_common::models::session::SessionKey;

    fn session_in(state: TicketState) -> Session {
        let mut s = Session::new_default(SessionKey::thread("g", "tickets", "t1"), Utc::now());
        s.state = state;
        s
    }

    #[test]
    fn test_transition_table() {
        use TicketState::*;
        let all = [Created, CategorySelected, ProductSelected, Escalated, Closed];
        let expected: &[(TicketState, &[TicketState])] = &[
            (Created, &[CategorySelected, Escalated, Closed]),
            (CategorySelected, &[ProductSelected, Escalated, Closed]),
            (ProductSelected, &[Escalated, Closed]),
            (Escalated, &[Closed]),
            (Closed, &[]),
        ];
        for (from, targets) in expected {
            for to in all {
                assert_eq!(
                    TicketStateMachine::can_transition(*from, to),
                    targets.contains(&to),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_self_transition_is_noop_except_closed() {
        assert!(TicketStateMachine::validate_transition(TicketState::Escalated, TicketState::Escalated).is_ok());
        assert!(TicketStateMachine::validate_transition(TicketState::Closed, TicketState::Closed).is_err());
    }

    #[test]
    fn test_immediate_category_escalates_in_one_step() {
        let catalog = GuildCatalog::default();
        let session = session_in(TicketState::Created);
        let update = TicketStateMachine::select_category(&session, &catalog, "hardware").unwrap();
        let next = update.merged_onto(&session);

        assert_eq!(next.state, TicketState::Escalated);
        assert!(next.questions_answered);
        assert!(next.human_help);
        assert_eq!(next.escalation_reason.as_deref(), Some("Hardware Issue"));
        assert!(TicketStateMachine::validate_session(&next, &catalog).is_ok());
    }

    #[test]
    fn test_needs_product_category_waits_for_product() {
        let catalog = GuildCatalog::default();
        let session = session_in(TicketState::Created);
        let next = TicketStateMachine::select_category(&session, &catalog, "software")
            .unwrap()
            .merged_onto(&session);
        assert_eq!(next.state, TicketState::CategorySelected);
        assert!(!next.human_help);

        let next = TicketStateMachine::select_product(&next, &catalog, "web")
            .unwrap()
            .merged_onto(&next);
        assert_eq!(next.state, TicketState::ProductSelected);
        assert_eq!(next.product.as_deref(), Some("web"));
    }

    #[test]
    fn test_product_before_category_is_rejected() {
        let catalog = GuildCatalog::default();
        let err = TicketStateMachine::select_product(&session_in(TicketState::Created), &catalog, "web")
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::IllegalTransition { from: TicketState::Created, to: TicketState::ProductSelected }
        );
    }

    #[test]
    fn test_unknown_values_are_rejected() {
        let catalog = GuildCatalog::default();
        let session = session_in(TicketState::Created);
        assert_eq!(
            TicketStateMachine::select_category(&session, &catalog, "warranty").unwrap_err(),
            ValidationError::UnknownCategory("warranty".into())
        );
        let session = session_in(TicketState::CategorySelected);
        assert_eq!(
            TicketStateMachine::select_product(&session, &catalog, "toaster").unwrap_err(),
            ValidationError::UnknownProduct("toaster".into())
        );
    }

    #[test]
    fn test_category_after_product_is_rejected() {
        let catalog = GuildCatalog::default();
        let session = session_in(TicketState::ProductSelected);
        assert!(TicketStateMachine::select_category(&session, &catalog, "hardware").is_err());
        assert!(TicketStateMachine::select_category(&session, &catalog, "general").is_err());
    }

    #[test]
    fn test_closed_session_rejects_everything() {
        let catalog = GuildCatalog::default();
        let session = session_in(TicketState::Closed);
        assert!(matches!(
            TicketStateMachine::select_category(&session, &catalog, "general"),
            Err(ValidationError::SessionClosed(_))
        ));
        assert!(TicketStateMachine::escalate(&session, "x").is_err());
        assert!(TicketStateMachine::close(&session).is_err());
        assert!(TicketStateMachine::resume(&session).is_err());
    }

    #[test]
    fn test_human_help_invariant() {
        let catalog = GuildCatalog::default();
        let mut session = session_in(TicketState::ProductSelected);
        session.human_help = true;
        assert!(matches!(
            TicketStateMachine::validate_session(&session, &catalog),
            Err(ValidationError::InvariantViolated(_))
        ));
    }

    #[test]
    fn test_resume_targets() {
        let mut with_product = session_in(TicketState::Escalated);
        with_product.human_help = true;
        with_product.product = Some("web".into());
        with_product.staff_detected = Some(true);
        let next = TicketStateMachine::resume(&with_product).unwrap().merged_onto(&with_product);
        assert_eq!(next.state, TicketState::ProductSelected);
        assert!(!next.human_help);
        assert_eq!(next.staff_detected, Some(false));

        let mut without_product = session_in(TicketState::Escalated);
        without_product.human_help = true;
        without_product.category = Some("billing".into());
        without_product.questions_answered = true;
        let next = TicketStateMachine::resume(&without_product).unwrap().merged_onto(&without_product);
        assert_eq!(next.state, TicketState::Created);
        assert!(next.category.is_none());
        assert!(!next.questions_answered);

        assert!(TicketStateMachine::resume(&session_in(TicketState::Created)).is_err());
    }
}
