use serde::{Deserialize, Serialize};

use crate::model::violation::ViolationChannel;

/// One labelled box reported by the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class: String,
    pub confidence: f32,
}

impl Detection {
    #[must_use]
    pub fn new(class: impl Into<String>, confidence: f32) -> Self {
        Self {
            class: class.into(),
            confidence,
        }
    }
}

/// What a single frame says about the learner's surroundings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameVerdict {
    pub subject_present: bool,
    pub prohibited_object_present: bool,
}

impl FrameVerdict {
    /// Channels raised by this frame; zero, one or both visual channels.
    #[must_use]
    pub fn violations(&self) -> Vec<ViolationChannel> {
        let mut raised = Vec::with_capacity(2);
        if self.prohibited_object_present {
            raised.push(ViolationChannel::VisualProhibitedObject);
        }
        if !self.subject_present {
            raised.push(ViolationChannel::VisualNoSubject);
        }
        raised
    }
}

/// Labels and score floors used to read classifier output.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionPolicy {
    subject_label: String,
    subject_min_score: f32,
    prohibited_labels: Vec<String>,
    prohibited_min_score: f32,
}

impl DetectionPolicy {
    pub const DEFAULT_SUBJECT_MIN_SCORE: f32 = 0.6;
    pub const DEFAULT_PROHIBITED_MIN_SCORE: f32 = 0.5;

    #[must_use]
    pub fn new(
        subject_label: impl Into<String>,
        subject_min_score: f32,
        prohibited_labels: Vec<String>,
        prohibited_min_score: f32,
    ) -> Self {
        Self {
            subject_label: subject_label.into(),
            subject_min_score,
            prohibited_labels,
            prohibited_min_score,
        }
    }

    #[must_use]
    pub fn subject_label(&self) -> &str {
        &self.subject_label
    }

    #[must_use]
    pub fn subject_min_score(&self) -> f32 {
        self.subject_min_score
    }

    #[must_use]
    pub fn prohibited_labels(&self) -> &[String] {
        &self.prohibited_labels
    }

    #[must_use]
    pub fn prohibited_min_score(&self) -> f32 {
        self.prohibited_min_score
    }

    /// Scores must be strictly above the floor to count.
    #[must_use]
    pub fn evaluate(&self, detections: &[Detection]) -> FrameVerdict {
        let subject_present = detections
            .iter()
            .any(|d| d.class == self.subject_label && d.confidence > self.subject_min_score);
        let prohibited_object_present = detections.iter().any(|d| {
            d.confidence > self.prohibited_min_score
                && self.prohibited_labels.iter().any(|label| *label == d.class)
        });

        FrameVerdict {
            subject_present,
            prohibited_object_present,
        }
    }
}

impl Default for DetectionPolicy {
    fn default() -> Self {
        Self::new(
            "person",
            Self::DEFAULT_SUBJECT_MIN_SCORE,
            vec!["cell phone".to_string()],
            Self::DEFAULT_PROHIBITED_MIN_SCORE,
        )
    }
}
