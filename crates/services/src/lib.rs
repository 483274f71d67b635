#![forbid(unsafe_code)]

pub mod behavior;
pub mod detector;
pub mod error;
pub mod fullscreen;
pub mod ledger;
pub mod resources;
pub mod scoring_client;
pub mod session;
pub mod submission;

pub use proctor_core::Clock;

pub use behavior::{DocumentEvent, DocumentListener, Key};
pub use detector::DetectorStats;
pub use error::{
    AcquisitionError, CaptureError, FullscreenError, InferenceError, ScoringClientError,
    SessionError, SubmissionError,
};
pub use fullscreen::{FullscreenControl, HeadlessFullscreen};
pub use ledger::ProctoringLog;
pub use resources::{
    CameraProvider, CaptureStream, Frame, InferenceModel, ModelLoader, ResourceHandles,
};
pub use scoring_client::{ScoringClient, ScoringClientConfig};
pub use session::{ProctoredSession, ProctoringService, SessionEvent};
pub use submission::{Submission, SubmissionGuard};
