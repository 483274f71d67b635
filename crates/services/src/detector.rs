use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use proctor_core::model::{DetectionPolicy, FrameVerdict, SessionId, SessionStatus};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::error::{CaptureError, InferenceError};
use crate::ledger::SignalSender;
use crate::resources::ResourceHandles;

/// Tick counters kept by a running detector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectorStats {
    pub ticks_run: u64,
    pub ticks_skipped: u64,
    pub inference_failures: u64,
}

#[derive(Debug, Default)]
pub(crate) struct DetectorCounters {
    ticks_run: AtomicU64,
    ticks_skipped: AtomicU64,
    inference_failures: AtomicU64,
}

impl DetectorCounters {
    pub(crate) fn snapshot(&self) -> DetectorStats {
        DetectorStats {
            ticks_run: self.ticks_run.load(Ordering::Relaxed),
            ticks_skipped: self.ticks_skipped.load(Ordering::Relaxed),
            inference_failures: self.inference_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Error)]
enum TickError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
}

/// Periodic camera inference while the session is `Active`.
pub(crate) struct VisualAnomalyDetector {
    session_id: SessionId,
    handles: ResourceHandles,
    policy: DetectionPolicy,
    tick: Duration,
    phase: watch::Receiver<SessionStatus>,
    signals: SignalSender,
    counters: Arc<DetectorCounters>,
}

impl VisualAnomalyDetector {
    pub(crate) fn new(
        session_id: SessionId,
        handles: ResourceHandles,
        policy: DetectionPolicy,
        tick: Duration,
        phase: watch::Receiver<SessionStatus>,
        signals: SignalSender,
    ) -> Self {
        Self {
            session_id,
            handles,
            policy,
            tick,
            phase,
            signals,
            counters: Arc::new(DetectorCounters::default()),
        }
    }

    pub(crate) fn counters(&self) -> Arc<DetectorCounters> {
        Arc::clone(&self.counters)
    }

    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    fn is_active(&self) -> bool {
        *self.phase.borrow() == SessionStatus::Active
    }

    async fn run(mut self) {
        if !self.is_active() {
            return;
        }
        tracing::debug!(
            session_id = %self.session_id,
            tick = ?self.tick,
            "visual detector started"
        );

        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; the first capture waits one period.
        interval.tick().await;

        let mut in_flight: JoinSet<Result<FrameVerdict, TickError>> = JoinSet::new();

        loop {
            tokio::select! {
                changed = self.phase.changed() => {
                    if changed.is_err() || !self.is_active() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    if !in_flight.is_empty() {
                        self.counters.ticks_skipped.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(
                            session_id = %self.session_id,
                            "previous inference still running, skipping tick"
                        );
                        continue;
                    }
                    self.counters.ticks_run.fetch_add(1, Ordering::Relaxed);
                    let handles = self.handles.clone();
                    let policy = self.policy.clone();
                    in_flight.spawn(async move {
                        let frame = handles.stream.capture_frame().await?;
                        let detections = handles.model.detect(&frame).await?;
                        Ok(policy.evaluate(&detections))
                    });
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    match joined {
                        Ok(Ok(verdict)) => self.report(verdict),
                        Ok(Err(err)) => {
                            self.counters.inference_failures.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(
                                session_id = %self.session_id,
                                error = %err,
                                "frame inference failed, treating as no detection"
                            );
                        }
                        Err(err) => {
                            self.counters.inference_failures.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(
                                session_id = %self.session_id,
                                error = %err,
                                "inference task aborted"
                            );
                        }
                    }
                }
            }
        }

        in_flight.abort_all();
        tracing::debug!(session_id = %self.session_id, "visual detector stopped");
    }

    fn report(&self, verdict: FrameVerdict) {
        if !self.is_active() {
            tracing::debug!(
                session_id = %self.session_id,
                "discarding verdict resolved after leaving active phase"
            );
            return;
        }
        for channel in verdict.violations() {
            let _ = self.signals.send(channel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{CaptureStream, Frame, InferenceModel};
    use async_trait::async_trait;
    use proctor_core::model::{Detection, ViolationChannel};
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    struct Stream;

    #[async_trait]
    impl CaptureStream for Stream {
        fn active_tracks(&self) -> usize {
            1
        }

        fn stop(&self) {}

        async fn capture_frame(&self) -> Result<Frame, CaptureError> {
            Ok(Frame::new(0, 4, 4, vec![0_u8; 16]))
        }
    }

    /// Replays one scripted result per call, then a lone person forever.
    struct ScriptedModel {
        script: Mutex<Vec<Result<Vec<Detection>, InferenceError>>>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl ScriptedModel {
        fn new(mut script: Vec<Result<Vec<Detection>, InferenceError>>, delay: Duration) -> Self {
            script.reverse();
            Self {
                script: Mutex::new(script),
                delay,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl InferenceModel for ScriptedModel {
        async fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            let next = self.script.lock().unwrap().pop();
            next.unwrap_or_else(|| Ok(vec![Detection::new("person", 0.9)]))
        }
    }

    fn detector(
        model: Arc<ScriptedModel>,
        phase: watch::Receiver<SessionStatus>,
    ) -> (VisualAnomalyDetector, mpsc::UnboundedReceiver<ViolationChannel>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handles = ResourceHandles {
            model,
            stream: Arc::new(Stream),
        };
        (
            VisualAnomalyDetector::new(
                SessionId::generate(),
                handles,
                DetectionPolicy::default(),
                Duration::from_secs(4),
                phase,
                tx,
            ),
            rx,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_report_one_or_two_violations() {
        let (phase_tx, phase_rx) = watch::channel(SessionStatus::Active);
        let model = Arc::new(ScriptedModel::new(
            vec![
                Ok(vec![Detection::new("cell phone", 0.8)]),
                Err(InferenceError::Detect("gpu lost".into())),
                Ok(vec![Detection::new("person", 0.95)]),
            ],
            Duration::ZERO,
        ));
        let (detector, mut rx) = detector(Arc::clone(&model), phase_rx);
        let counters = detector.counters();
        let handle = detector.spawn();

        tokio::time::sleep(Duration::from_millis(12_500)).await;
        phase_tx.send_replace(SessionStatus::Submitting);
        handle.await.unwrap();

        assert_eq!(rx.try_recv().unwrap(), ViolationChannel::VisualProhibitedObject);
        assert_eq!(rx.try_recv().unwrap(), ViolationChannel::VisualNoSubject);
        assert!(rx.try_recv().is_err());

        let stats = counters.snapshot();
        assert_eq!(stats.ticks_run, 3);
        assert_eq!(stats.inference_failures, 1);
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_inference_skips_ticks() {
        let (phase_tx, phase_rx) = watch::channel(SessionStatus::Active);
        let model = Arc::new(ScriptedModel::new(Vec::new(), Duration::from_secs(10)));
        let (detector, mut rx) = detector(Arc::clone(&model), phase_rx);
        let counters = detector.counters();
        let handle = detector.spawn();

        // Ticks at 4s (runs), 8s and 12s (skipped), inference resolves at 14s.
        tokio::time::sleep(Duration::from_millis(13_000)).await;
        phase_tx.send_replace(SessionStatus::Completed);
        handle.await.unwrap();

        let stats = counters.snapshot();
        assert_eq!(stats.ticks_run, 1);
        assert_eq!(stats.ticks_skipped, 2);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn inactive_phase_never_polls() {
        let (_phase_tx, phase_rx) = watch::channel(SessionStatus::Ready);
        let model = Arc::new(ScriptedModel::new(Vec::new(), Duration::ZERO));
        let (detector, _rx) = detector(Arc::clone(&model), phase_rx);
        detector.spawn().await.unwrap();
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }
}
