//! Shared error types for the services crate.

use thiserror::Error;

use proctor_core::model::{AnswerError, SessionStatus, StatusError};
use storage::repository::StorageError;

/// Errors emitted while loading the inference model.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum InferenceError {
    #[error("model failed to load: {0}")]
    Load(String),
    #[error("inference failed: {0}")]
    Detect(String),
}

/// Errors emitted by a camera provider or capture stream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CaptureError {
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("camera unavailable: {0}")]
    Unavailable(String),
    #[error("capture stream stopped")]
    Stopped,
    #[error("frame capture failed: {0}")]
    Frame(String),
}

/// Fatal errors while acquiring proctoring resources. Never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AcquisitionError {
    #[error("could not load detection model: {0}")]
    ModelLoad(String),
    #[error("camera permission denied")]
    CameraPermissionDenied,
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),
}

impl From<CaptureError> for AcquisitionError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::PermissionDenied => Self::CameraPermissionDenied,
            other => Self::CameraUnavailable(other.to_string()),
        }
    }
}

impl From<InferenceError> for AcquisitionError {
    fn from(err: InferenceError) -> Self {
        Self::ModelLoad(err.to_string())
    }
}

/// Errors emitted by a fullscreen controller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum FullscreenError {
    #[error("fullscreen request denied: {0}")]
    Denied(String),
    #[error("fullscreen is not supported by this host")]
    Unsupported,
}

/// Errors emitted by the submission coordinator.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SubmissionError {
    #[error("cannot submit while session is {0}")]
    NotActive(SessionStatus),
    #[error(transparent)]
    Scoring(#[from] StorageError),
}

/// Errors emitted by `ScoringClient`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ScoringClientError {
    #[error("scoring service is not configured")]
    Disabled,
    #[error("scoring service returned status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error("scoring service response is malformed: {0}")]
    Malformed(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl From<ScoringClientError> for StorageError {
    fn from(err: ScoringClientError) -> Self {
        match err {
            ScoringClientError::HttpStatus(status) if status == reqwest::StatusCode::NOT_FOUND => {
                StorageError::NotFound
            }
            ScoringClientError::HttpStatus(status) if status == reqwest::StatusCode::CONFLICT => {
                StorageError::Conflict
            }
            ScoringClientError::Malformed(msg) => StorageError::Serialization(msg),
            other => StorageError::Connection(other.to_string()),
        }
    }
}

/// Errors emitted by proctored sessions.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error(transparent)]
    InvalidTransition(#[from] StatusError),
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),
    #[error(transparent)]
    Fullscreen(#[from] FullscreenError),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error(transparent)]
    Answer(#[from] AnswerError),
    #[error("answers can only change while the session is active (currently {0})")]
    AnswersLocked(SessionStatus),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_errors_map_to_acquisition_errors() {
        assert_eq!(
            AcquisitionError::from(CaptureError::PermissionDenied),
            AcquisitionError::CameraPermissionDenied
        );
        assert!(matches!(
            AcquisitionError::from(CaptureError::Unavailable("no device".into())),
            AcquisitionError::CameraUnavailable(msg) if msg.contains("no device")
        ));
        assert!(matches!(
            AcquisitionError::from(InferenceError::Load("weights".into())),
            AcquisitionError::ModelLoad(_)
        ));
    }

    #[test]
    fn scoring_status_maps_to_storage_error() {
        let err: StorageError = ScoringClientError::HttpStatus(reqwest::StatusCode::NOT_FOUND).into();
        assert!(matches!(err, StorageError::NotFound));
        let err: StorageError = ScoringClientError::Disabled.into();
        assert!(matches!(err, StorageError::Connection(_)));
    }
}
