use std::sync::{Arc, Mutex, PoisonError};

use proctor_core::Clock;
use proctor_core::model::{
    Escalation, ProctoringLogEntry, SessionStatus, SubmitReason, ViolationChannel,
    ViolationCounts, ViolationLedger,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::session::phase::{PhaseCell, SessionEvent};
use crate::submission::{Submission, SubmissionCoordinator};

/// Sending half used by detectors to report violations to the ledger task.
pub(crate) type SignalSender = mpsc::UnboundedSender<ViolationChannel>;
pub(crate) type SignalReceiver = mpsc::UnboundedReceiver<ViolationChannel>;

/// Append-only record of every violation the ledger accepted.
#[derive(Debug, Clone, Default)]
pub struct ProctoringLog {
    entries: Arc<Mutex<Vec<ProctoringLogEntry>>>,
}

impl ProctoringLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: ProctoringLogEntry) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    #[must_use]
    pub fn entries(&self) -> Vec<ProctoringLogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sole writer of the session's violation counts.
pub(crate) struct LedgerTask {
    ledger: ViolationLedger,
    signals: SignalReceiver,
    phase: PhaseCell,
    counts: Arc<watch::Sender<ViolationCounts>>,
    log: ProctoringLog,
    clock: Clock,
    coordinator: Arc<SubmissionCoordinator>,
}

impl LedgerTask {
    pub(crate) fn new(
        ledger: ViolationLedger,
        signals: SignalReceiver,
        phase: PhaseCell,
        counts: Arc<watch::Sender<ViolationCounts>>,
        log: ProctoringLog,
        clock: Clock,
        coordinator: Arc<SubmissionCoordinator>,
    ) -> Self {
        Self {
            ledger,
            signals,
            phase,
            counts,
            log,
            clock,
            coordinator,
        }
    }

    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let mut phase_rx = self.phase.subscribe();
        loop {
            tokio::select! {
                signal = self.signals.recv() => {
                    let Some(channel) = signal else { break };
                    self.handle(channel).await;
                }
                _ = async { phase_rx.wait_for(|p| p.is_terminal()).await.is_ok() } => break,
            }
        }
        tracing::debug!(session_id = %self.phase.session_id(), "violation ledger stopped");
    }

    async fn handle(&mut self, channel: ViolationChannel) {
        let session_id = self.phase.session_id();
        if !self.phase.is(SessionStatus::Active) {
            tracing::debug!(
                session_id = %session_id,
                channel = %channel,
                "dropping violation outside active phase"
            );
            return;
        }

        let escalation = self.ledger.record(channel);
        self.counts.send_replace(self.ledger.counts());

        match escalation {
            Escalation::Warn {
                channel,
                count,
                threshold,
            } => {
                self.log.push(ProctoringLogEntry {
                    at: self.clock.now(),
                    channel,
                    count,
                    escalated: false,
                });
                tracing::warn!(
                    session_id = %session_id,
                    channel = %channel,
                    count,
                    threshold,
                    reason = channel.warning_reason(),
                    "proctoring violation"
                );
                self.phase.emit(SessionEvent::Warning {
                    channel,
                    count,
                    threshold,
                    reason: channel.warning_reason(),
                });
            }
            Escalation::AutoSubmit { channel, count } => {
                self.log.push(ProctoringLogEntry {
                    at: self.clock.now(),
                    channel,
                    count,
                    escalated: true,
                });
                tracing::warn!(
                    session_id = %session_id,
                    channel = %channel,
                    count,
                    reason = channel.escalation_reason(),
                    "violation threshold reached, forcing submission"
                );
                match self
                    .coordinator
                    .submit(SubmitReason::Escalation { channel })
                    .await
                {
                    Ok(Submission::Accepted(_)) => {}
                    Ok(Submission::Ignored) => {
                        tracing::debug!(
                            session_id = %session_id,
                            "forced submission ignored, another trigger won"
                        );
                    }
                    Err(err) => {
                        tracing::warn!(
                            session_id = %session_id,
                            error = %err,
                            "forced submission did not complete"
                        );
                    }
                }
            }
        }
    }
}
