use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use proctor_core::model::{
    AnswerSnapshot, AnswerVector, AssessmentDefinition, AssessmentId, LearnerId,
    ProctoringLogEntry, QuestionIndex, SessionId, SessionStatus, StatusError, SubmitReason,
    ViolationCounts, ViolationLedger,
};
use proctor_core::{Clock, ProctoringSettings};
use storage::repository::{AssessmentRepository, AttemptRepository};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use super::phase::{PhaseCell, SessionEvent};
use crate::behavior::{
    ActiveListenerSet, ClipboardListener, DocumentEvent, FullscreenListener, VisibilityListener,
};
use crate::detector::{DetectorCounters, DetectorStats, VisualAnomalyDetector};
use crate::error::{SessionError, SubmissionError};
use crate::fullscreen::FullscreenControl;
use crate::ledger::{LedgerTask, ProctoringLog};
use crate::resources::{CameraProvider, ModelLoader, ResourceAcquisitionManager};
use crate::submission::{Submission, SubmissionCoordinator, Teardown};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

//
// ─── SERVICE ───────────────────────────────────────────────────────────────────
//

/// Opens proctored sessions against the configured collaborators.
#[derive(Clone)]
pub struct ProctoringService {
    settings: ProctoringSettings,
    clock: Clock,
    assessments: Arc<dyn AssessmentRepository>,
    attempts: Arc<dyn AttemptRepository>,
    model_loader: Arc<dyn ModelLoader>,
    camera: Arc<dyn CameraProvider>,
    fullscreen: Arc<dyn FullscreenControl>,
}

impl ProctoringService {
    #[must_use]
    pub fn new(
        assessments: Arc<dyn AssessmentRepository>,
        attempts: Arc<dyn AttemptRepository>,
        model_loader: Arc<dyn ModelLoader>,
        camera: Arc<dyn CameraProvider>,
        fullscreen: Arc<dyn FullscreenControl>,
    ) -> Self {
        Self {
            settings: ProctoringSettings::default(),
            clock: Clock::default(),
            assessments,
            attempts,
            model_loader,
            camera,
            fullscreen,
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: ProctoringSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn settings(&self) -> &ProctoringSettings {
        &self.settings
    }

    /// Fetch the assessment and open a session in `Initializing`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Storage` if the definition cannot be loaded.
    pub async fn open_session(
        &self,
        assessment_id: AssessmentId,
        learner_id: Option<LearnerId>,
    ) -> Result<ProctoredSession, SessionError> {
        let session_id = SessionId::generate();
        let phase = PhaseCell::new(session_id);

        let definition = self
            .assessments
            .get_assessment(assessment_id)
            .await
            .inspect_err(|err| {
                tracing::warn!(
                    session_id = %session_id,
                    assessment_id = %assessment_id,
                    error = %err,
                    "could not load assessment"
                );
            })?;
        phase.transition(SessionStatus::Initializing)?;

        let answers = AnswerVector::for_assessment(&definition);
        let (counts, _) = watch::channel(ViolationCounts::default());
        let listeners = ActiveListenerSet::new(phase.subscribe());

        Ok(ProctoredSession {
            inner: Arc::new(SessionInner {
                phase,
                definition,
                learner_id,
                settings: self.settings.clone(),
                clock: self.clock,
                answers: Arc::new(Mutex::new(answers)),
                log: ProctoringLog::new(),
                counts: Arc::new(counts),
                resources: Arc::new(ResourceAcquisitionManager::new(
                    Arc::clone(&self.model_loader),
                    Arc::clone(&self.camera),
                )),
                listeners: Arc::new(listeners),
                fullscreen: Arc::clone(&self.fullscreen),
                attempts: Arc::clone(&self.attempts),
                coordinator: OnceLock::new(),
                pending_ledger: Mutex::new(None),
                detector: OnceLock::new(),
                deadline: OnceLock::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        })
    }
}

//
// ─── SESSION ───────────────────────────────────────────────────────────────────
//

struct SessionInner {
    phase: PhaseCell,
    definition: AssessmentDefinition,
    learner_id: Option<LearnerId>,
    settings: ProctoringSettings,
    clock: Clock,
    answers: Arc<Mutex<AnswerVector>>,
    log: ProctoringLog,
    counts: Arc<watch::Sender<ViolationCounts>>,
    resources: Arc<ResourceAcquisitionManager>,
    listeners: Arc<ActiveListenerSet>,
    fullscreen: Arc<dyn FullscreenControl>,
    attempts: Arc<dyn AttemptRepository>,
    coordinator: OnceLock<Arc<SubmissionCoordinator>>,
    pending_ledger: Mutex<Option<ViolationLedger>>,
    detector: OnceLock<Arc<DetectorCounters>>,
    deadline: OnceLock<DateTime<Utc>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionInner {
    fn stop_background(&self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        self.listeners.detach_all();
        self.resources.release();
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.stop_background();
    }
}

/// One proctored attempt at an assessment.
///
/// Clones share the same session. Dropping the last clone stops background
/// work and releases the camera.
#[derive(Clone)]
pub struct ProctoredSession {
    inner: Arc<SessionInner>,
}

impl ProctoredSession {
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.inner.phase.session_id()
    }

    #[must_use]
    pub fn definition(&self) -> &AssessmentDefinition {
        &self.inner.definition
    }

    #[must_use]
    pub fn phase(&self) -> SessionStatus {
        self.inner.phase.get()
    }

    #[must_use]
    pub fn subscribe_phase(&self) -> watch::Receiver<SessionStatus> {
        self.inner.phase.subscribe()
    }

    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.phase.subscribe_events()
    }

    #[must_use]
    pub fn violation_counts(&self) -> ViolationCounts {
        *self.inner.counts.borrow()
    }

    #[must_use]
    pub fn subscribe_violations(&self) -> watch::Receiver<ViolationCounts> {
        self.inner.counts.subscribe()
    }

    #[must_use]
    pub fn proctoring_log(&self) -> Vec<ProctoringLogEntry> {
        self.inner.log.entries()
    }

    /// Detector tick counters, once proctoring has started.
    #[must_use]
    pub fn detector_stats(&self) -> Option<DetectorStats> {
        self.inner.detector.get().map(|counters| counters.snapshot())
    }

    /// Whether camera and model are currently held.
    #[must_use]
    pub fn holds_resources(&self) -> bool {
        self.inner.resources.is_held()
    }

    #[must_use]
    pub fn attached_listeners(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Time left before the attempt is submitted automatically.
    #[must_use]
    pub fn remaining_time(&self) -> Option<chrono::Duration> {
        self.inner
            .deadline
            .get()
            .map(|deadline| self.inner.clock.remaining_until(*deadline))
    }

    #[must_use]
    pub fn answers(&self) -> AnswerSnapshot {
        lock(&self.inner.answers).snapshot()
    }

    /// Record the learner's choice for one question.
    ///
    /// Returns the previously selected option.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::AnswersLocked` outside `Active`, or
    /// `SessionError::Answer` for an index from another assessment or an
    /// option out of range.
    pub fn select_answer(
        &self,
        index: QuestionIndex,
        option: usize,
    ) -> Result<Option<usize>, SessionError> {
        let mut answers = lock(&self.inner.answers);
        self.ensure_active()?;
        Ok(answers.select(index, option)?)
    }

    /// Clear the learner's choice for one question.
    ///
    /// # Errors
    ///
    /// Same conditions as [`ProctoredSession::select_answer`].
    pub fn clear_answer(&self, index: QuestionIndex) -> Result<Option<usize>, SessionError> {
        let mut answers = lock(&self.inner.answers);
        self.ensure_active()?;
        Ok(answers.clear(index)?)
    }

    fn ensure_active(&self) -> Result<(), SessionError> {
        match self.phase() {
            SessionStatus::Active => Ok(()),
            other => Err(SessionError::AnswersLocked(other)),
        }
    }

    /// Acquire proctoring resources and move to `Ready`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidTransition` unless the session is
    /// `Initializing`. Returns `SessionError::Acquisition` after moving the
    /// session to `Failed` if the model or camera cannot be acquired.
    pub async fn prepare(&self) -> Result<(), SessionError> {
        let inner = &self.inner;
        let current = inner.phase.get();
        if current != SessionStatus::Initializing {
            return Err(StatusError::InvalidTransition {
                from: current,
                to: SessionStatus::Ready,
            }
            .into());
        }

        let proctored = inner.definition.proctoring_required();
        if let Err(err) = inner.resources.acquire(proctored).await {
            inner.resources.release();
            inner
                .phase
                .transition_from(SessionStatus::Initializing, SessionStatus::Failed);
            tracing::error!(
                session_id = %self.id(),
                error = %err,
                "proctoring resources unavailable"
            );
            inner.phase.emit(SessionEvent::Failed {
                message: err.to_string(),
            });
            return Err(err.into());
        }

        let ledger = ViolationLedger::new(*inner.settings.escalation());
        inner.counts.send_replace(ledger.counts());
        *lock(&inner.pending_ledger) = Some(ledger);

        let coordinator = SubmissionCoordinator::new(
            inner.phase.clone(),
            inner.clock,
            inner.learner_id,
            Arc::clone(&inner.answers),
            inner.log.clone(),
            Arc::clone(&inner.attempts),
            Teardown {
                resources: Arc::clone(&inner.resources),
                listeners: Arc::clone(&inner.listeners),
                fullscreen: Arc::clone(&inner.fullscreen),
            },
        );
        if inner.coordinator.set(Arc::new(coordinator)).is_err()
            || !inner
                .phase
                .transition_from(SessionStatus::Initializing, SessionStatus::Ready)
        {
            inner.resources.release();
            return Err(StatusError::InvalidTransition {
                from: inner.phase.get(),
                to: SessionStatus::Ready,
            }
            .into());
        }

        tracing::info!(session_id = %self.id(), proctored, "session ready");
        Ok(())
    }

    /// Enter fullscreen, move to `Active`, and start proctoring and the deadline.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidTransition` unless the session is `Ready`,
    /// or `SessionError::Fullscreen` if the host refuses fullscreen; the
    /// session then stays `Ready`.
    pub async fn start(&self) -> Result<(), SessionError> {
        let inner = &self.inner;
        let current = inner.phase.get();
        let coordinator = match inner.coordinator.get() {
            Some(coordinator) if current == SessionStatus::Ready => Arc::clone(coordinator),
            _ => {
                return Err(StatusError::InvalidTransition {
                    from: current,
                    to: SessionStatus::Active,
                }
                .into());
            }
        };

        inner.fullscreen.enter().await.inspect_err(|err| {
            tracing::warn!(session_id = %self.id(), error = %err, "fullscreen refused");
        })?;
        if !inner
            .phase
            .transition_from(SessionStatus::Ready, SessionStatus::Active)
        {
            return Err(StatusError::InvalidTransition {
                from: inner.phase.get(),
                to: SessionStatus::Active,
            }
            .into());
        }

        let limit = inner.definition.duration();
        let minutes = chrono::Duration::minutes(i64::from(inner.definition.duration_minutes()));
        let _ = inner.deadline.set(inner.clock.now() + minutes);

        let mut tasks = Vec::with_capacity(3);
        if let Some(handles) = inner.resources.handles() {
            let (signals_tx, signals_rx) = mpsc::unbounded_channel();
            let ledger = lock(&inner.pending_ledger)
                .take()
                .unwrap_or_else(|| ViolationLedger::new(*inner.settings.escalation()));
            tasks.push(
                LedgerTask::new(
                    ledger,
                    signals_rx,
                    inner.phase.clone(),
                    Arc::clone(&inner.counts),
                    inner.log.clone(),
                    inner.clock,
                    Arc::clone(&coordinator),
                )
                .spawn(),
            );

            inner
                .listeners
                .register_while_active(Box::new(VisibilityListener::new(signals_tx.clone())));
            inner
                .listeners
                .register_while_active(Box::new(ClipboardListener::new(signals_tx.clone())));
            inner
                .listeners
                .register_while_active(Box::new(FullscreenListener::new(inner.phase.clone())));

            let detector = VisualAnomalyDetector::new(
                self.id(),
                handles,
                inner.settings.detection().clone(),
                inner.settings.tick_interval(),
                inner.phase.subscribe(),
                signals_tx,
            );
            let _ = inner.detector.set(detector.counters());
            tasks.push(detector.spawn());
        }
        tasks.push(tokio::spawn(run_deadline(
            self.id(),
            limit,
            inner.phase.subscribe(),
            coordinator,
        )));
        lock(&inner.tasks).extend(tasks);

        tracing::info!(
            session_id = %self.id(),
            minutes = inner.definition.duration_minutes(),
            listeners = inner.listeners.len(),
            "session started"
        );
        Ok(())
    }

    /// Forward a document event from the host.
    ///
    /// Returns whether the host must suppress the event's default action.
    pub fn dispatch(&self, event: &DocumentEvent) -> bool {
        self.inner.listeners.dispatch(event)
    }

    /// Submit the attempt. Only the first trigger reaches the scoring collaborator.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Submission` if the session is not `Active` or the
    /// collaborator rejects the attempt.
    pub async fn submit(&self, reason: SubmitReason) -> Result<Submission, SessionError> {
        let Some(coordinator) = self.inner.coordinator.get() else {
            return Err(SubmissionError::NotActive(self.phase()).into());
        };
        Ok(coordinator.submit(reason).await?)
    }

    /// Tear everything down. A session that has not finished is marked `Failed`.
    pub async fn close(&self) {
        let inner = &self.inner;
        inner.stop_background();

        if inner.fullscreen.is_active() {
            if let Err(err) = inner.fullscreen.exit().await {
                tracing::warn!(session_id = %self.id(), error = %err, "could not leave fullscreen");
            }
        }

        if !inner.phase.get().is_terminal() && inner.phase.transition(SessionStatus::Failed).is_ok()
        {
            inner.phase.emit(SessionEvent::Failed {
                message: "session abandoned".into(),
            });
        }
    }
}

async fn run_deadline(
    session_id: SessionId,
    limit: Duration,
    mut phase: watch::Receiver<SessionStatus>,
    coordinator: Arc<SubmissionCoordinator>,
) {
    tokio::select! {
        () = tokio::time::sleep(limit) => {
            tracing::info!(session_id = %session_id, "time limit reached");
            match coordinator.submit(SubmitReason::TimeExpired).await {
                Ok(Submission::Accepted(_)) => {}
                Ok(Submission::Ignored) => {
                    tracing::debug!(session_id = %session_id, "time limit submission ignored");
                }
                Err(err) => {
                    tracing::warn!(
                        session_id = %session_id,
                        error = %err,
                        "time limit submission did not complete"
                    );
                }
            }
        }
        // The watch guard must not live into the other arm's await.
        _ = async { phase.wait_for(|p| p.is_terminal()).await.is_ok() } => {}
    }
}
