use std::sync::Arc;

use thiserror::Error;

use crate::model::assessment::{AssessmentDefinition, QuestionIndex};
use crate::model::ids::AssessmentId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AnswerError {
    #[error("question index belongs to assessment {found}, expected {expected}")]
    ForeignIndex {
        expected: AssessmentId,
        found: AssessmentId,
    },

    #[error("question {position} does not exist ({available} questions)")]
    IndexOutOfRange { position: usize, available: usize },

    #[error("option {option} is out of range for question {question} ({available} options)")]
    OptionOutOfRange {
        question: usize,
        option: usize,
        available: usize,
    },
}

/// The learner's selections, one slot per question.
///
/// The slot count is fixed when the vector is created from a definition and
/// never changes afterwards. Option ranges are checked against the
/// definition the vector was built from, not the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerVector {
    assessment_id: AssessmentId,
    slots: Box<[Option<usize>]>,
    option_counts: Box<[usize]>,
}

impl AnswerVector {
    /// Create an empty answer vector sized to the definition.
    #[must_use]
    pub fn for_assessment(definition: &AssessmentDefinition) -> Self {
        Self {
            assessment_id: definition.id(),
            slots: vec![None; definition.question_count()].into_boxed_slice(),
            option_counts: definition.indices().map(|i| i.option_count()).collect(),
        }
    }

    #[must_use]
    pub fn assessment_id(&self) -> AssessmentId {
        self.assessment_id
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: QuestionIndex) -> Option<usize> {
        if index.assessment_id() != self.assessment_id {
            return None;
        }
        self.slots.get(index.position()).copied().flatten()
    }

    /// Record a selection, returning the previous one.
    ///
    /// # Errors
    ///
    /// Returns `AnswerError::ForeignIndex` or `AnswerError::IndexOutOfRange`
    /// when the index does not address this vector, or
    /// `AnswerError::OptionOutOfRange` for an invalid option.
    pub fn select(
        &mut self,
        index: QuestionIndex,
        option: usize,
    ) -> Result<Option<usize>, AnswerError> {
        let position = self.check_index(index)?;
        let available = self.option_counts[position];
        if option >= available {
            return Err(AnswerError::OptionOutOfRange {
                question: position,
                option,
                available,
            });
        }
        Ok(self.slots[position].replace(option))
    }

    /// Clear a selection, returning the previous one.
    ///
    /// # Errors
    ///
    /// Returns `AnswerError::ForeignIndex` or `AnswerError::IndexOutOfRange`
    /// when the index does not address this vector.
    pub fn clear(&mut self, index: QuestionIndex) -> Result<Option<usize>, AnswerError> {
        let position = self.check_index(index)?;
        Ok(self.slots[position].take())
    }

    #[must_use]
    pub fn answered(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    #[must_use]
    pub fn unanswered(&self) -> usize {
        self.len() - self.answered()
    }

    /// Immutable copy of the current selections.
    #[must_use]
    pub fn snapshot(&self) -> AnswerSnapshot {
        AnswerSnapshot {
            assessment_id: self.assessment_id,
            answers: Arc::from(&*self.slots),
        }
    }

    fn check_index(&self, index: QuestionIndex) -> Result<usize, AnswerError> {
        if index.assessment_id() != self.assessment_id {
            return Err(AnswerError::ForeignIndex {
                expected: self.assessment_id,
                found: index.assessment_id(),
            });
        }
        let position = index.position();
        if position >= self.slots.len() {
            return Err(AnswerError::IndexOutOfRange {
                position,
                available: self.slots.len(),
            });
        }
        Ok(position)
    }
}

/// Frozen selections taken at submission time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerSnapshot {
    assessment_id: AssessmentId,
    answers: Arc<[Option<usize>]>,
}

impl AnswerSnapshot {
    #[must_use]
    pub fn assessment_id(&self) -> AssessmentId {
        self.assessment_id
    }

    #[must_use]
    pub fn answers(&self) -> &[Option<usize>] {
        &self.answers
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.answers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }

    #[must_use]
    pub fn unanswered(&self) -> usize {
        self.answers.iter().filter(|a| a.is_none()).count()
    }
}
