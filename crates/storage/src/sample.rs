//! Built-in sample assessment used by the seed tools.

use proctor_core::model::AssessmentId;

use crate::repository::{AssessmentRecord, QuestionRecord};

pub const SAMPLE_TITLE: &str = "Networking Fundamentals";
pub const SAMPLE_DURATION_MINUTES: u32 = 20;

/// Five networking questions with their answer key.
#[must_use]
pub fn sample_questions() -> Vec<QuestionRecord> {
    let samples: [(&str, [&str; 4], usize); 5] = [
        (
            "Which layer does IP operate at?",
            ["Data link", "Network", "Transport", "Session"],
            1,
        ),
        (
            "Which protocol resolves an IPv4 address to a MAC address?",
            ["DNS", "DHCP", "ARP", "ICMP"],
            2,
        ),
        (
            "What is the default port for HTTPS?",
            ["80", "21", "8080", "443"],
            3,
        ),
        (
            "Which transport protocol is connection-oriented?",
            ["TCP", "UDP", "ICMP", "IGMP"],
            0,
        ),
        (
            "How many bits are in an IPv6 address?",
            ["32", "64", "128", "256"],
            2,
        ),
    ];

    samples
        .into_iter()
        .map(|(text, options, correct_option)| QuestionRecord {
            text: text.to_string(),
            options: options.iter().map(ToString::to_string).collect(),
            correct_option,
        })
        .collect()
}

#[must_use]
pub fn sample_assessment(
    id: AssessmentId,
    title: impl Into<String>,
    duration_minutes: u32,
    proctoring_required: bool,
) -> AssessmentRecord {
    AssessmentRecord {
        id,
        title: title.into(),
        duration_minutes,
        proctoring_required,
        questions: sample_questions(),
    }
}
