use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::answers::AnswerSnapshot;
use crate::model::ids::{AssessmentId, AttemptId, LearnerId};
use crate::model::violation::ViolationChannel;

/// Why a submission was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubmitReason {
    /// The learner pressed submit.
    Manual,
    /// A violation channel reached its threshold.
    Escalation { channel: ViolationChannel },
    /// The attempt ran out of time.
    TimeExpired,
}

impl SubmitReason {
    #[must_use]
    pub fn is_forced(&self) -> bool {
        !matches!(self, Self::Manual)
    }

    #[must_use]
    pub fn message(&self) -> &'static str {
        match self {
            Self::Manual => "submitted by learner",
            Self::Escalation { channel } => channel.escalation_reason(),
            Self::TimeExpired => "time limit reached",
        }
    }
}

impl fmt::Display for SubmitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// One line of the proctoring log kept for the attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProctoringLogEntry {
    pub at: DateTime<Utc>,
    pub channel: ViolationChannel,
    pub count: u32,
    pub escalated: bool,
}

impl fmt::Display for ProctoringLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} #{}: {}",
            self.at.to_rfc3339(),
            self.channel,
            self.count,
            if self.escalated {
                self.channel.escalation_reason()
            } else {
                self.channel.warning_reason()
            }
        )
    }
}

/// Everything sent to the scoring side for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptSubmission {
    pub assessment_id: AssessmentId,
    pub learner_id: Option<LearnerId>,
    pub answers: AnswerSnapshot,
    pub reason: SubmitReason,
    pub proctoring_log: Vec<ProctoringLogEntry>,
    pub submitted_at: DateTime<Utc>,
}

/// Acknowledgement returned by the scoring side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptReceipt {
    pub attempt_id: AttemptId,
    pub score: u32,
    pub total_marks: u32,
    pub message: Option<String>,
}
