use std::time::Duration;

use thiserror::Error;

use crate::model::ids::AssessmentId;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AssessmentError {
    #[error("assessment title cannot be empty")]
    EmptyTitle,

    #[error("assessment must contain at least one question")]
    NoQuestions,

    #[error("assessment duration must be > 0 minutes")]
    InvalidDuration,

    #[error("question text cannot be empty")]
    EmptyQuestionText,

    #[error("question {question} must offer at least one option")]
    NoOptions { question: usize },
}

//
// ─── QUESTION ──────────────────────────────────────────────────────────────────
//

/// A single multiple-choice question as shown to the learner.
///
/// The correct option is deliberately absent: definitions handed to a session
/// never carry the answer key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    text: String,
    options: Vec<String>,
}

impl Question {
    /// # Errors
    ///
    /// Returns `AssessmentError::EmptyQuestionText` for blank text and
    /// `AssessmentError::NoOptions` when `options` is empty.
    pub fn new(
        text: impl Into<String>,
        options: Vec<String>,
    ) -> Result<Self, AssessmentError> {
        let text = text.into().trim().to_string();
        if text.is_empty() {
            return Err(AssessmentError::EmptyQuestionText);
        }
        if options.is_empty() {
            return Err(AssessmentError::NoOptions { question: 0 });
        }
        Ok(Self { text, options })
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn options(&self) -> &[String] {
        &self.options
    }

    #[must_use]
    pub fn option_count(&self) -> usize {
        self.options.len()
    }
}

//
// ─── QUESTION INDEX ────────────────────────────────────────────────────────────
//

/// Position of a question inside one specific assessment.
///
/// Only `AssessmentDefinition` hands these out, so an index is always in
/// bounds for the definition (and the answer vector) it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuestionIndex {
    assessment_id: AssessmentId,
    position: usize,
    option_count: usize,
}

impl QuestionIndex {
    #[must_use]
    pub fn assessment_id(&self) -> AssessmentId {
        self.assessment_id
    }

    /// Zero-based position of the question.
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    #[must_use]
    pub fn option_count(&self) -> usize {
        self.option_count
    }
}

//
// ─── DEFINITION ────────────────────────────────────────────────────────────────
//

/// Read-only definition of an assessment, as fetched for an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssessmentDefinition {
    id: AssessmentId,
    title: String,
    questions: Vec<Question>,
    duration_minutes: u32,
    proctoring_required: bool,
}

impl AssessmentDefinition {
    /// Build a validated definition.
    ///
    /// # Errors
    ///
    /// Returns `AssessmentError` if the title is blank, there are no questions,
    /// the duration is zero, or a question has no options.
    pub fn new(
        id: AssessmentId,
        title: impl Into<String>,
        questions: Vec<Question>,
        duration_minutes: u32,
        proctoring_required: bool,
    ) -> Result<Self, AssessmentError> {
        let title = title.into().trim().to_string();
        if title.is_empty() {
            return Err(AssessmentError::EmptyTitle);
        }
        if questions.is_empty() {
            return Err(AssessmentError::NoQuestions);
        }
        if duration_minutes == 0 {
            return Err(AssessmentError::InvalidDuration);
        }
        if let Some(question) = questions.iter().position(|q| q.options.is_empty()) {
            return Err(AssessmentError::NoOptions { question });
        }

        Ok(Self {
            id,
            title,
            questions,
            duration_minutes,
            proctoring_required,
        })
    }

    #[must_use]
    pub fn id(&self) -> AssessmentId {
        self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    #[must_use]
    pub fn question_count(&self) -> usize {
        self.questions.len()
    }

    #[must_use]
    pub fn duration_minutes(&self) -> u32 {
        self.duration_minutes
    }

    /// Time allowed for one attempt.
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.duration_minutes) * 60)
    }

    #[must_use]
    pub fn proctoring_required(&self) -> bool {
        self.proctoring_required
    }

    /// Resolve a zero-based position into an index bound to this assessment.
    #[must_use]
    pub fn index(&self, position: usize) -> Option<QuestionIndex> {
        self.questions.get(position).map(|q| QuestionIndex {
            assessment_id: self.id,
            position,
            option_count: q.option_count(),
        })
    }

    /// Iterate over every question index in order.
    pub fn indices(&self) -> impl Iterator<Item = QuestionIndex> + '_ {
        self.questions
            .iter()
            .enumerate()
            .map(|(position, q)| QuestionIndex {
                assessment_id: self.id,
                position,
                option_count: q.option_count(),
            })
    }

    /// Look up a question by an index obtained from this definition.
    #[must_use]
    pub fn question(&self, index: QuestionIndex) -> Option<&Question> {
        if index.assessment_id != self.id {
            return None;
        }
        self.questions.get(index.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(text: &str, options: &[&str]) -> Question {
        Question::new(text, options.iter().map(ToString::to_string).collect()).unwrap()
    }

    #[test]
    fn rejects_empty_question_list() {
        let err = AssessmentDefinition::new(AssessmentId::new(1), "Quiz", Vec::new(), 10, true)
            .unwrap_err();
        assert_eq!(err, AssessmentError::NoQuestions);
    }

    #[test]
    fn rejects_zero_duration() {
        let err = AssessmentDefinition::new(
            AssessmentId::new(1),
            "Quiz",
            vec![question("Q1", &["a", "b"])],
            0,
            true,
        )
        .unwrap_err();
        assert_eq!(err, AssessmentError::InvalidDuration);
    }

    #[test]
    fn question_requires_options() {
        let err = Question::new("What?", Vec::new()).unwrap_err();
        assert!(matches!(err, AssessmentError::NoOptions { .. }));
    }

    #[test]
    fn indices_are_bound_to_their_assessment() {
        let first = AssessmentDefinition::new(
            AssessmentId::new(1),
            "First",
            vec![question("Q1", &["a", "b", "c"]), question("Q2", &["x", "y"])],
            15,
            true,
        )
        .unwrap();
        let second = AssessmentDefinition::new(
            AssessmentId::new(2),
            "Second",
            vec![question("Q1", &["a"])],
            15,
            false,
        )
        .unwrap();

        let idx = first.index(1).unwrap();
        assert_eq!(idx.option_count(), 2);
        assert_eq!(first.question(idx).unwrap().text(), "Q2");
        assert!(second.question(idx).is_none());
        assert!(first.index(2).is_none());
        assert_eq!(first.indices().count(), 2);
        assert_eq!(first.duration(), Duration::from_secs(15 * 60));
    }
}
