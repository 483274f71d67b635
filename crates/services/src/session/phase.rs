use std::sync::Arc;

use proctor_core::model::{
    AttemptReceipt, SessionId, SessionStatus, StatusError, ViolationChannel,
};
use tokio::sync::{broadcast, watch};

const EVENT_CAPACITY: usize = 64;

/// Operator-visible notices broadcast by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    PhaseChanged {
        from: SessionStatus,
        to: SessionStatus,
    },
    Warning {
        channel: ViolationChannel,
        count: u32,
        threshold: u32,
        reason: &'static str,
    },
    FullscreenExited,
    FullscreenRestored,
    Submitted {
        receipt: AttemptReceipt,
    },
    SubmissionFailed {
        message: String,
    },
    Failed {
        message: String,
    },
}

/// The single authoritative phase of a session, plus its event feed.
///
/// Transitions are validated and applied under the watch channel's lock, so
/// concurrent writers can never interleave a read-check-write.
#[derive(Clone)]
pub(crate) struct PhaseCell {
    session_id: SessionId,
    tx: Arc<watch::Sender<SessionStatus>>,
    events: broadcast::Sender<SessionEvent>,
}

impl PhaseCell {
    pub(crate) fn new(session_id: SessionId) -> Self {
        let (tx, _rx) = watch::channel(SessionStatus::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            session_id,
            tx: Arc::new(tx),
            events,
        }
    }

    pub(crate) fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub(crate) fn get(&self) -> SessionStatus {
        *self.tx.borrow()
    }

    pub(crate) fn is(&self, status: SessionStatus) -> bool {
        self.get() == status
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.tx.subscribe()
    }

    pub(crate) fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Send an event. Having no subscribers is fine.
    pub(crate) fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Move to `next` from whatever the current phase is, if legal.
    pub(crate) fn transition(&self, next: SessionStatus) -> Result<SessionStatus, StatusError> {
        let mut outcome = Err(StatusError::InvalidTransition {
            from: self.get(),
            to: next,
        });
        self.tx.send_if_modified(|current| match current.transition(next) {
            Ok(applied) => {
                outcome = Ok(*current);
                *current = applied;
                true
            }
            Err(err) => {
                outcome = Err(err);
                false
            }
        });

        if let Ok(from) = outcome {
            tracing::info!(
                session_id = %self.session_id,
                from = %from,
                to = %next,
                "session phase changed"
            );
            self.emit(SessionEvent::PhaseChanged { from, to: next });
        }
        outcome
    }

    /// Move to `next` only if the phase is currently `expected`.
    pub(crate) fn transition_from(&self, expected: SessionStatus, next: SessionStatus) -> bool {
        let mut applied = false;
        self.tx.send_if_modified(|current| {
            if *current == expected && current.can_transition_to(next) {
                *current = next;
                applied = true;
            }
            applied
        });

        if applied {
            tracing::info!(
                session_id = %self.session_id,
                from = %expected,
                to = %next,
                "session phase changed"
            );
            self.emit(SessionEvent::PhaseChanged {
                from: expected,
                to: next,
            });
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_are_validated() {
        let cell = PhaseCell::new(SessionId::generate());
        let mut events = cell.subscribe_events();

        assert_eq!(cell.transition(SessionStatus::Initializing), Ok(SessionStatus::Idle));
        assert!(cell.transition(SessionStatus::Active).is_err());
        assert!(cell.is(SessionStatus::Initializing));

        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::PhaseChanged {
                from: SessionStatus::Idle,
                to: SessionStatus::Initializing,
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn conditional_transition_requires_expected_phase() {
        let cell = PhaseCell::new(SessionId::generate());
        assert!(!cell.transition_from(SessionStatus::Ready, SessionStatus::Active));
        assert!(cell.transition_from(SessionStatus::Idle, SessionStatus::Initializing));
        assert!(cell.transition_from(SessionStatus::Initializing, SessionStatus::Failed));
        assert!(!cell.transition_from(SessionStatus::Failed, SessionStatus::Failed));
    }

    #[tokio::test]
    async fn subscribers_observe_changes() {
        let cell = PhaseCell::new(SessionId::generate());
        let mut rx = cell.subscribe();
        cell.transition(SessionStatus::Initializing).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), SessionStatus::Initializing);
    }
}
