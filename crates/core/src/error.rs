use thiserror::Error;

use crate::model::{AnswerError, AssessmentError, EscalationPolicyError, StatusError};
use crate::settings::SettingsError;

/// Umbrella error for callers that do not care which domain rule failed.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Assessment(#[from] AssessmentError),
    #[error(transparent)]
    Answer(#[from] AnswerError),
    #[error(transparent)]
    Status(#[from] StatusError),
    #[error(transparent)]
    Policy(#[from] EscalationPolicyError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
}
