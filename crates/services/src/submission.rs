use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use proctor_core::Clock;
use proctor_core::model::{
    AnswerVector, AttemptReceipt, AttemptSubmission, LearnerId, SessionStatus, SubmitReason,
};
use storage::repository::AttemptRepository;

use crate::behavior::ActiveListenerSet;
use crate::error::SubmissionError;
use crate::fullscreen::FullscreenControl;
use crate::ledger::ProctoringLog;
use crate::resources::ResourceAcquisitionManager;
use crate::session::phase::{PhaseCell, SessionEvent};

/// Single-assignment latch. Once claimed it stays claimed.
#[derive(Debug, Default)]
pub struct SubmissionGuard {
    claimed: AtomicBool,
}

impl SubmissionGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` for exactly one caller over the guard's lifetime.
    pub fn try_claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[must_use]
    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }
}

/// Outcome of a `submit` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// This caller won the guard and the attempt was scored.
    Accepted(AttemptReceipt),
    /// Another trigger already claimed the submission.
    Ignored,
}

impl Submission {
    #[must_use]
    pub fn receipt(&self) -> Option<&AttemptReceipt> {
        match self {
            Self::Accepted(receipt) => Some(receipt),
            Self::Ignored => None,
        }
    }
}

/// Everything the coordinator tears down before transmitting.
pub(crate) struct Teardown {
    pub(crate) resources: Arc<ResourceAcquisitionManager>,
    pub(crate) listeners: Arc<ActiveListenerSet>,
    pub(crate) fullscreen: Arc<dyn FullscreenControl>,
}

impl Teardown {
    /// Stop the stream, detach listeners and leave fullscreen.
    ///
    /// The visual detector exits on its own once the phase leaves `Active`.
    pub(crate) async fn run(&self, phase: &PhaseCell) {
        let detached = self.listeners.detach_all();
        let released = self.resources.release();
        tracing::debug!(
            session_id = %phase.session_id(),
            detached,
            released,
            "proctoring resources torn down"
        );

        if self.fullscreen.is_active() {
            if let Err(err) = self.fullscreen.exit().await {
                tracing::warn!(
                    session_id = %phase.session_id(),
                    error = %err,
                    "could not leave fullscreen"
                );
            }
        }
    }
}

/// The single path from `Active` to `Completed`.
pub struct SubmissionCoordinator {
    phase: PhaseCell,
    guard: SubmissionGuard,
    clock: Clock,
    learner_id: Option<LearnerId>,
    answers: Arc<Mutex<AnswerVector>>,
    log: ProctoringLog,
    attempts: Arc<dyn AttemptRepository>,
    teardown: Teardown,
}

impl SubmissionCoordinator {
    pub(crate) fn new(
        phase: PhaseCell,
        clock: Clock,
        learner_id: Option<LearnerId>,
        answers: Arc<Mutex<AnswerVector>>,
        log: ProctoringLog,
        attempts: Arc<dyn AttemptRepository>,
        teardown: Teardown,
    ) -> Self {
        Self {
            phase,
            guard: SubmissionGuard::new(),
            clock,
            learner_id,
            answers,
            log,
            attempts,
            teardown,
        }
    }

    #[must_use]
    pub fn is_claimed(&self) -> bool {
        self.guard.is_claimed()
    }

    /// Submit the attempt once.
    ///
    /// The first caller while `Active` claims the guard, tears down proctoring,
    /// and transmits the answer snapshot. Every later caller gets
    /// `Submission::Ignored` and never reaches the scoring collaborator.
    ///
    /// # Errors
    ///
    /// Returns `SubmissionError::NotActive` if nothing has claimed the guard and
    /// the session is not `Active`; the guard stays unclaimed. Returns
    /// `SubmissionError::Scoring` if the collaborator rejects the attempt; the
    /// session drops back to `Active` and the guard stays claimed.
    pub async fn submit(&self, reason: SubmitReason) -> Result<Submission, SubmissionError> {
        let phase = self.phase.get();
        if phase != SessionStatus::Active {
            return if self.guard.is_claimed() {
                Ok(Submission::Ignored)
            } else {
                Err(SubmissionError::NotActive(phase))
            };
        }
        if !self.guard.try_claim() {
            return Ok(Submission::Ignored);
        }
        if !self
            .phase
            .transition_from(SessionStatus::Active, SessionStatus::Submitting)
        {
            return Err(SubmissionError::NotActive(self.phase.get()));
        }

        let session_id = self.phase.session_id();
        tracing::info!(session_id = %session_id, reason = %reason, "submitting attempt");

        let snapshot = self
            .answers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot();
        self.teardown.run(&self.phase).await;

        let submission = AttemptSubmission {
            assessment_id: snapshot.assessment_id(),
            learner_id: self.learner_id,
            answers: snapshot,
            reason,
            proctoring_log: self.log.entries(),
            submitted_at: self.clock.now(),
        };

        match self.attempts.submit_attempt(&submission).await {
            Ok(receipt) => {
                self.phase
                    .transition_from(SessionStatus::Submitting, SessionStatus::Completed);
                tracing::info!(
                    session_id = %session_id,
                    attempt_id = %receipt.attempt_id,
                    score = receipt.score,
                    total_marks = receipt.total_marks,
                    "attempt submitted"
                );
                self.phase.emit(SessionEvent::Submitted {
                    receipt: receipt.clone(),
                });
                Ok(Submission::Accepted(receipt))
            }
            Err(err) => {
                self.phase
                    .transition_from(SessionStatus::Submitting, SessionStatus::Active);
                tracing::error!(
                    session_id = %session_id,
                    error = %err,
                    "attempt submission failed"
                );
                self.phase.emit(SessionEvent::SubmissionFailed {
                    message: err.to_string(),
                });
                Err(SubmissionError::Scoring(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_claims_once() {
        let guard = SubmissionGuard::new();
        assert!(!guard.is_claimed());
        assert!(guard.try_claim());
        assert!(!guard.try_claim());
        assert!(guard.is_claimed());
    }

    #[test]
    fn guard_has_one_winner_across_threads() {
        let guard = Arc::new(SubmissionGuard::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let guard = Arc::clone(&guard);
                std::thread::spawn(move || guard.try_claim())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
