mod answers;
mod assessment;
mod detection;
mod ids;
mod status;
mod submission;
mod violation;

pub use answers::{AnswerError, AnswerSnapshot, AnswerVector};
pub use assessment::{AssessmentDefinition, AssessmentError, Question, QuestionIndex};
pub use detection::{Detection, DetectionPolicy, FrameVerdict};
pub use ids::{AssessmentId, AttemptId, LearnerId, ParseIdError, SessionId};
pub use status::{SessionStatus, StatusError};
pub use submission::{AttemptReceipt, AttemptSubmission, ProctoringLogEntry, SubmitReason};
pub use violation::{
    Escalation, EscalationPolicy, EscalationPolicyError, UnknownChannel, ViolationChannel,
    ViolationCounts, ViolationLedger,
};
