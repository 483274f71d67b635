use async_trait::async_trait;
use chrono::{DateTime, Utc};
use proctor_core::model::{
    AssessmentDefinition, AssessmentError, AssessmentId, AttemptId, AttemptReceipt,
    AttemptSubmission, LearnerId, ProctoringLogEntry, Question, SubmitReason,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("answer count {answers} does not match question count {questions}")]
    AnswerCountMismatch { answers: usize, questions: usize },
}

//
// ─── RECORDS ───────────────────────────────────────────────────────────────────
//

/// One question as persisted, including the answer key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionRecord {
    pub text: String,
    pub options: Vec<String>,
    pub correct_option: usize,
}

/// Persisted shape for an assessment.
///
/// Unlike `AssessmentDefinition` this carries the correct options, so it never
/// leaves the storage layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssessmentRecord {
    pub id: AssessmentId,
    pub title: String,
    pub duration_minutes: u32,
    pub proctoring_required: bool,
    pub questions: Vec<QuestionRecord>,
}

impl AssessmentRecord {
    /// Strip the answer key and validate into a learner-facing definition.
    ///
    /// # Errors
    ///
    /// Returns `AssessmentError` if the stored shape violates domain rules.
    pub fn to_definition(&self) -> Result<AssessmentDefinition, AssessmentError> {
        let questions = self
            .questions
            .iter()
            .map(|q| Question::new(q.text.clone(), q.options.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        AssessmentDefinition::new(
            self.id,
            self.title.clone(),
            questions,
            self.duration_minutes,
            self.proctoring_required,
        )
    }

    #[must_use]
    pub fn answer_key(&self) -> Vec<usize> {
        self.questions.iter().map(|q| q.correct_option).collect()
    }
}

/// A stored, scored attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub id: AttemptId,
    pub assessment_id: AssessmentId,
    pub learner_id: Option<LearnerId>,
    pub answers: Vec<Option<usize>>,
    pub score: u32,
    pub total_marks: u32,
    pub reason: SubmitReason,
    pub proctoring_log: Vec<ProctoringLogEntry>,
    pub submitted_at: DateTime<Utc>,
}

impl AttemptRecord {
    #[must_use]
    pub fn receipt(&self) -> AttemptReceipt {
        AttemptReceipt {
            attempt_id: self.id,
            score: self.score,
            total_marks: self.total_marks,
            message: Some(format!("Test submitted: {}", self.reason)),
        }
    }
}

/// Count answers matching the key. Unanswered slots never score.
///
/// # Errors
///
/// Returns `StorageError::AnswerCountMismatch` if the lengths differ.
pub fn score_answers(key: &[usize], answers: &[Option<usize>]) -> Result<u32, StorageError> {
    if key.len() != answers.len() {
        return Err(StorageError::AnswerCountMismatch {
            answers: answers.len(),
            questions: key.len(),
        });
    }
    let correct = key
        .iter()
        .zip(answers)
        .filter(|(expected, given)| **given == Some(**expected))
        .count();
    u32::try_from(correct).map_err(|_| StorageError::Serialization("score overflow".into()))
}

pub(crate) fn total_marks(record: &AssessmentRecord) -> Result<u32, StorageError> {
    u32::try_from(record.questions.len())
        .map_err(|_| StorageError::Serialization("question count overflow".into()))
}

//
// ─── CONTRACTS ─────────────────────────────────────────────────────────────────
//

/// Source of assessment definitions (`getAssessment`).
#[async_trait]
pub trait AssessmentRepository: Send + Sync {
    /// Persist or replace an assessment with its answer key.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the assessment cannot be stored.
    async fn upsert_assessment(&self, record: &AssessmentRecord) -> Result<(), StorageError>;

    /// Fetch the learner-facing definition. Correct options are never included.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_assessment(&self, id: AssessmentId)
    -> Result<AssessmentDefinition, StorageError>;
}

/// Scoring collaborator (`submitAttempt`).
///
/// Implementations are not assumed to be idempotent: every call records a new attempt.
#[async_trait]
pub trait AttemptRepository: Send + Sync {
    /// Score and store an attempt.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` for an unknown assessment,
    /// `StorageError::AnswerCountMismatch` for a malformed answer vector,
    /// or other storage errors.
    async fn submit_attempt(
        &self,
        submission: &AttemptSubmission,
    ) -> Result<AttemptReceipt, StorageError>;

    /// Fetch a stored attempt.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_attempt(&self, id: AttemptId) -> Result<AttemptRecord, StorageError>;

    /// List attempts for an assessment, newest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the query fails.
    async fn list_attempts(
        &self,
        assessment_id: AssessmentId,
    ) -> Result<Vec<AttemptRecord>, StorageError>;
}

//
// ─── IN-MEMORY ─────────────────────────────────────────────────────────────────
//

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    assessments: Arc<Mutex<HashMap<AssessmentId, AssessmentRecord>>>,
    attempts: Arc<Mutex<Vec<AttemptRecord>>>,
    submit_calls: Arc<AtomicUsize>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times `submit_attempt` was invoked, successful or not.
    #[must_use]
    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssessmentRepository for InMemoryRepository {
    async fn upsert_assessment(&self, record: &AssessmentRecord) -> Result<(), StorageError> {
        let mut guard = self
            .assessments
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(record.id, record.clone());
        Ok(())
    }

    async fn get_assessment(
        &self,
        id: AssessmentId,
    ) -> Result<AssessmentDefinition, StorageError> {
        let guard = self
            .assessments
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let record = guard.get(&id).ok_or(StorageError::NotFound)?;
        record
            .to_definition()
            .map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

#[async_trait]
impl AttemptRepository for InMemoryRepository {
    async fn submit_attempt(
        &self,
        submission: &AttemptSubmission,
    ) -> Result<AttemptReceipt, StorageError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);

        let record = {
            let guard = self
                .assessments
                .lock()
                .map_err(|e| StorageError::Connection(e.to_string()))?;
            guard
                .get(&submission.assessment_id)
                .cloned()
                .ok_or(StorageError::NotFound)?
        };

        let answers = submission.answers.answers().to_vec();
        let score = score_answers(&record.answer_key(), &answers)?;

        let mut attempts = self
            .attempts
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let id = AttemptId::new(attempts.len() as u64 + 1);
        let stored = AttemptRecord {
            id,
            assessment_id: submission.assessment_id,
            learner_id: submission.learner_id,
            answers,
            score,
            total_marks: total_marks(&record)?,
            reason: submission.reason,
            proctoring_log: submission.proctoring_log.clone(),
            submitted_at: submission.submitted_at,
        };
        let receipt = stored.receipt();
        attempts.push(stored);
        Ok(receipt)
    }

    async fn get_attempt(&self, id: AttemptId) -> Result<AttemptRecord, StorageError> {
        let guard = self
            .attempts
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or(StorageError::NotFound)
    }

    async fn list_attempts(
        &self,
        assessment_id: AssessmentId,
    ) -> Result<Vec<AttemptRecord>, StorageError> {
        let guard = self
            .attempts
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard
            .iter()
            .rev()
            .filter(|a| a.assessment_id == assessment_id)
            .cloned()
            .collect())
    }
}

/// Aggregates the collaborator contracts behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub assessments: Arc<dyn AssessmentRepository>,
    pub attempts: Arc<dyn AttemptRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        let assessments: Arc<dyn AssessmentRepository> = Arc::new(repo.clone());
        let attempts: Arc<dyn AttemptRepository> = Arc::new(repo);
        Self {
            assessments,
            attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proctor_core::model::{AnswerVector, ViolationChannel};
    use proctor_core::time::fixed_now;

    fn record(id: u64) -> AssessmentRecord {
        AssessmentRecord {
            id: AssessmentId::new(id),
            title: "Networks".into(),
            duration_minutes: 20,
            proctoring_required: true,
            questions: vec![
                QuestionRecord {
                    text: "Layer of IP?".into(),
                    options: vec!["2".into(), "3".into(), "4".into()],
                    correct_option: 1,
                },
                QuestionRecord {
                    text: "TCP is?".into(),
                    options: vec!["connectionless".into(), "connection-oriented".into()],
                    correct_option: 1,
                },
            ],
        }
    }

    #[test]
    fn scoring_ignores_unanswered() {
        assert_eq!(score_answers(&[1, 0, 2], &[Some(1), None, Some(0)]).unwrap(), 1);
        assert!(matches!(
            score_answers(&[1], &[]),
            Err(StorageError::AnswerCountMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn definition_hides_answer_key_and_attempts_are_scored() {
        let repo = InMemoryRepository::new();
        repo.upsert_assessment(&record(7)).await.unwrap();

        let definition = repo.get_assessment(AssessmentId::new(7)).await.unwrap();
        assert_eq!(definition.question_count(), 2);

        let mut answers = AnswerVector::for_assessment(&definition);
        answers.select(definition.index(0).unwrap(), 1).unwrap();
        answers.select(definition.index(1).unwrap(), 0).unwrap();

        let submission = AttemptSubmission {
            assessment_id: definition.id(),
            learner_id: Some(LearnerId::new(3)),
            answers: answers.snapshot(),
            reason: SubmitReason::Escalation {
                channel: ViolationChannel::TabSwitch,
            },
            proctoring_log: Vec::new(),
            submitted_at: fixed_now(),
        };
        let receipt = repo.submit_attempt(&submission).await.unwrap();
        assert_eq!(receipt.score, 1);
        assert_eq!(receipt.total_marks, 2);
        assert_eq!(repo.submit_calls(), 1);

        let stored = repo.get_attempt(receipt.attempt_id).await.unwrap();
        assert_eq!(stored.answers, vec![Some(1), Some(0)]);
        assert_eq!(
            repo.list_attempts(definition.id()).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn unknown_assessment_is_not_found() {
        let repo = InMemoryRepository::new();
        let err = repo.get_assessment(AssessmentId::new(99)).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound));
    }
}
