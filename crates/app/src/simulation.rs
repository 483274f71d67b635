//! Stand-ins for the camera, the detection model and the learner.
//!
//! Each camera tick consumes one scripted scene. Once the script runs out,
//! scenes are drawn from a seeded generator so runs are reproducible.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use proctor_core::model::Detection;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use services::{
    CameraProvider, CaptureError, CaptureStream, DocumentEvent, Frame, InferenceError,
    InferenceModel, Key, ModelLoader,
};

const FRAME_WIDTH: u32 = 64;
const FRAME_HEIGHT: u32 = 48;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    what: &'static str,
    raw: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: {}", self.what, self.raw)
    }
}

impl std::error::Error for ParseError {}

/// What the camera sees on one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scene {
    Present,
    Absent,
    Phone,
    /// The model errors on this frame.
    Glitch,
}

impl Scene {
    fn detections(self) -> Result<Vec<Detection>, InferenceError> {
        match self {
            Self::Present => Ok(vec![Detection::new("person", 0.93)]),
            Self::Absent => Ok(vec![Detection::new("chair", 0.71)]),
            Self::Phone => Ok(vec![
                Detection::new("person", 0.91),
                Detection::new("cell phone", 0.84),
            ]),
            Self::Glitch => Err(InferenceError::Detect("simulated model glitch".into())),
        }
    }

    fn random(rng: &mut StdRng) -> Self {
        match rng.random_range(0..100) {
            0..=2 => Self::Phone,
            3..=5 => Self::Absent,
            6 => Self::Glitch,
            _ => Self::Present,
        }
    }
}

impl FromStr for Scene {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "person" | "present" => Ok(Self::Present),
            "empty" | "absent" => Ok(Self::Absent),
            "phone" => Ok(Self::Phone),
            "glitch" => Ok(Self::Glitch),
            other => Err(ParseError {
                what: "scene",
                raw: other.to_string(),
            }),
        }
    }
}

/// Parse a comma-separated scene list such as `person,phone,empty`.
pub fn parse_scenes(raw: &str) -> Result<Vec<Scene>, ParseError> {
    raw.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(str::parse)
        .collect()
}

/// Parse a comma-separated list of learner actions such as `hide,copy,fs-exit`.
pub fn parse_events(raw: &str) -> Result<Vec<DocumentEvent>, ParseError> {
    raw.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| {
            let event = match part.trim() {
                "hide" => DocumentEvent::VisibilityChanged { hidden: true },
                "show" => DocumentEvent::VisibilityChanged { hidden: false },
                "copy" => DocumentEvent::Copy,
                "cut" => DocumentEvent::Cut,
                "paste" => DocumentEvent::Paste,
                "menu" => DocumentEvent::ContextMenu,
                "ctrl-c" => DocumentEvent::KeyDown {
                    key: Key::Char('c'),
                    ctrl: true,
                },
                "ctrl-v" => DocumentEvent::KeyDown {
                    key: Key::Char('v'),
                    ctrl: true,
                },
                "printscreen" => DocumentEvent::KeyDown {
                    key: Key::PrintScreen,
                    ctrl: false,
                },
                "fs-exit" => DocumentEvent::FullscreenChanged { active: false },
                "fs-enter" => DocumentEvent::FullscreenChanged { active: true },
                other => {
                    return Err(ParseError {
                        what: "event",
                        raw: other.to_string(),
                    });
                }
            };
            Ok(event)
        })
        .collect()
}

pub struct SimulatedModel {
    script: Mutex<VecDeque<Scene>>,
    rng: Mutex<StdRng>,
}

impl SimulatedModel {
    #[must_use]
    pub fn new(script: Vec<Scene>, seed: u64) -> Self {
        Self {
            script: Mutex::new(script.into()),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn next_scene(&self) -> Scene {
        let scripted = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        scripted.unwrap_or_else(|| {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            Scene::random(&mut rng)
        })
    }
}

#[async_trait]
impl InferenceModel for SimulatedModel {
    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
        let scene = self.next_scene();
        tracing::debug!(frame = frame.sequence, ?scene, "simulated inference");
        scene.detections()
    }
}

pub struct SimulatedLoader {
    model: Arc<SimulatedModel>,
}

impl SimulatedLoader {
    #[must_use]
    pub fn new(model: SimulatedModel) -> Self {
        Self {
            model: Arc::new(model),
        }
    }
}

#[async_trait]
impl ModelLoader for SimulatedLoader {
    async fn load_model(&self) -> Result<Arc<dyn InferenceModel>, InferenceError> {
        let model: Arc<dyn InferenceModel> = self.model.clone();
        Ok(model)
    }
}

/// A single-track stream producing blank frames until stopped.
#[derive(Debug)]
pub struct SimulatedStream {
    tracks: AtomicUsize,
    sequence: AtomicU64,
}

impl Default for SimulatedStream {
    fn default() -> Self {
        Self {
            tracks: AtomicUsize::new(1),
            sequence: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl CaptureStream for SimulatedStream {
    fn active_tracks(&self) -> usize {
        self.tracks.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        if self.tracks.swap(0, Ordering::SeqCst) > 0 {
            tracing::debug!("simulated camera stopped");
        }
    }

    async fn capture_frame(&self) -> Result<Frame, CaptureError> {
        if self.active_tracks() == 0 {
            return Err(CaptureError::Stopped);
        }
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let pixels = vec![128_u8; (FRAME_WIDTH * FRAME_HEIGHT) as usize];
        Ok(Frame::new(sequence, FRAME_WIDTH, FRAME_HEIGHT, pixels))
    }
}

#[derive(Debug, Default)]
pub struct SimulatedCamera {
    deny: bool,
    stream: Arc<SimulatedStream>,
}

impl SimulatedCamera {
    #[must_use]
    pub fn new(deny: bool) -> Self {
        Self {
            deny,
            stream: Arc::new(SimulatedStream::default()),
        }
    }

    #[must_use]
    pub fn stream(&self) -> Arc<SimulatedStream> {
        Arc::clone(&self.stream)
    }
}

#[async_trait]
impl CameraProvider for SimulatedCamera {
    async fn open_stream(&self) -> Result<Arc<dyn CaptureStream>, CaptureError> {
        if self.deny {
            return Err(CaptureError::PermissionDenied);
        }
        let stream: Arc<dyn CaptureStream> = self.stream.clone();
        Ok(stream)
    }
}

/// Picks answers the way an unprepared learner would.
pub struct SimulatedLearner {
    rng: StdRng,
}

impl SimulatedLearner {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed.wrapping_add(1)),
        }
    }

    /// `None` means the learner skips the question.
    pub fn choose(&mut self, option_count: usize) -> Option<usize> {
        if option_count == 0 || self.rng.random_bool(0.1) {
            return None;
        }
        Some(self.rng.random_range(0..option_count))
    }
}
