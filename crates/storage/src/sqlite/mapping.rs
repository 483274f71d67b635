use proctor_core::model::{AssessmentId, AttemptId, LearnerId, SubmitReason, ViolationChannel};

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

pub(crate) fn id_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

pub(crate) fn usize_i64(field: &'static str, v: usize) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

pub(crate) fn usize_from_i64(field: &'static str, v: i64) -> Result<usize, StorageError> {
    usize::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn u32_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn assessment_id_from_i64(v: i64) -> Result<AssessmentId, StorageError> {
    Ok(AssessmentId::new(i64_to_u64("assessment_id", v)?))
}

pub(crate) fn attempt_id_from_i64(v: i64) -> Result<AttemptId, StorageError> {
    Ok(AttemptId::new(i64_to_u64("attempt_id", v)?))
}

pub(crate) fn learner_id_from_i64(v: i64) -> Result<LearnerId, StorageError> {
    Ok(LearnerId::new(i64_to_u64("learner_id", v)?))
}

pub(crate) fn reason_to_str(reason: SubmitReason) -> String {
    match reason {
        SubmitReason::Manual => "manual".to_string(),
        SubmitReason::TimeExpired => "time_expired".to_string(),
        SubmitReason::Escalation { channel } => format!("escalation:{channel}"),
    }
}

pub(crate) fn parse_reason(s: &str) -> Result<SubmitReason, StorageError> {
    match s {
        "manual" => Ok(SubmitReason::Manual),
        "time_expired" => Ok(SubmitReason::TimeExpired),
        other => {
            let channel = other
                .strip_prefix("escalation:")
                .ok_or_else(|| StorageError::Serialization(format!("invalid reason: {s}")))?;
            let channel: ViolationChannel = channel.parse().map_err(ser)?;
            Ok(SubmitReason::Escalation { channel })
        }
    }
}
