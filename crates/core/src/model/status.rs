use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum StatusError {
    #[error("invalid session transition: {from} -> {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },
}

/// Lifecycle phase of a proctored session.
///
/// Transitions only move forward, with one exception: a failed submission
/// drops `Submitting` back to `Active`. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Initializing,
    Ready,
    Active,
    Submitting,
    Completed,
    Failed,
}

impl SessionStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `self -> next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use SessionStatus::{Active, Completed, Failed, Idle, Initializing, Ready, Submitting};

        match (self, next) {
            (Idle, Initializing)
            | (Initializing, Ready)
            | (Ready, Active)
            | (Active, Submitting)
            | (Submitting, Completed | Active) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Validate a transition.
    ///
    /// # Errors
    ///
    /// Returns `StatusError::InvalidTransition` if the move is not allowed.
    pub fn transition(self, next: Self) -> Result<Self, StatusError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(StatusError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Active => "active",
            Self::Submitting => "submitting",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::SessionStatus::*;
    use super::*;

    const ALL: [SessionStatus; 7] = [
        Idle,
        Initializing,
        Ready,
        Active,
        Submitting,
        Completed,
        Failed,
    ];

    #[test]
    fn happy_path_is_allowed() {
        let path = [Idle, Initializing, Ready, Active, Submitting, Completed];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn submission_failure_bounces_to_active() {
        assert!(Submitting.can_transition_to(Active));
    }

    #[test]
    fn active_never_returns_to_ready() {
        for from in [Active, Submitting, Completed, Failed] {
            assert!(!from.can_transition_to(Ready));
        }
    }

    #[test]
    fn terminal_states_are_sticky() {
        for from in [Completed, Failed] {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn every_live_state_may_fail() {
        for from in [Idle, Initializing, Ready, Active, Submitting] {
            assert_eq!(from.transition(Failed), Ok(Failed));
        }
    }

    #[test]
    fn skipping_ahead_is_rejected() {
        assert_eq!(
            Ready.transition(Submitting),
            Err(StatusError::InvalidTransition {
                from: Ready,
                to: Submitting
            })
        );
    }
}
