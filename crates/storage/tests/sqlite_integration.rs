use chrono::Duration;
use proctor_core::model::{
    AnswerVector, AssessmentId, AttemptSubmission, LearnerId, ProctoringLogEntry, SubmitReason,
    ViolationChannel,
};
use proctor_core::time::fixed_now;
use storage::repository::{
    AssessmentRecord, AssessmentRepository, AttemptRepository, QuestionRecord, StorageError,
};
use storage::sqlite::SqliteRepository;

fn sample_record(id: u64) -> AssessmentRecord {
    AssessmentRecord {
        id: AssessmentId::new(id),
        title: "Operating Systems".into(),
        duration_minutes: 30,
        proctoring_required: true,
        questions: vec![
            QuestionRecord {
                text: "Which scheduler is preemptive?".into(),
                options: vec!["FCFS".into(), "Round robin".into(), "SJF".into()],
                correct_option: 1,
            },
            QuestionRecord {
                text: "A page fault is handled by?".into(),
                options: vec!["the MMU".into(), "the kernel".into()],
                correct_option: 1,
            },
            QuestionRecord {
                text: "Deadlock needs how many Coffman conditions?".into(),
                options: vec!["2".into(), "3".into(), "4".into()],
                correct_option: 2,
            },
        ],
    }
}

async fn connect(name: &str) -> SqliteRepository {
    let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
    let repo = SqliteRepository::connect(&url).await.expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

#[tokio::test]
async fn sqlite_roundtrip_hides_answer_key() {
    let repo = connect("memdb_assessment_roundtrip").await;
    repo.upsert_assessment(&sample_record(1)).await.unwrap();

    let definition = repo.get_assessment(AssessmentId::new(1)).await.unwrap();
    assert_eq!(definition.title(), "Operating Systems");
    assert_eq!(definition.question_count(), 3);
    assert_eq!(definition.duration_minutes(), 30);
    assert!(definition.proctoring_required());
    assert_eq!(definition.questions()[0].options()[1], "Round robin");
    assert_eq!(definition.questions()[1].option_count(), 2);

    // Replacing the assessment drops stale questions.
    let mut shorter = sample_record(1);
    shorter.questions.truncate(1);
    shorter.proctoring_required = false;
    repo.upsert_assessment(&shorter).await.unwrap();
    let definition = repo.get_assessment(AssessmentId::new(1)).await.unwrap();
    assert_eq!(definition.question_count(), 1);
    assert!(!definition.proctoring_required());
}

#[tokio::test]
async fn sqlite_scores_and_persists_attempts() {
    let repo = connect("memdb_attempts").await;
    repo.upsert_assessment(&sample_record(5)).await.unwrap();
    let definition = repo.get_assessment(AssessmentId::new(5)).await.unwrap();

    let mut answers = AnswerVector::for_assessment(&definition);
    answers.select(definition.index(0).unwrap(), 1).unwrap();
    answers.select(definition.index(2).unwrap(), 0).unwrap();

    let log = vec![
        ProctoringLogEntry {
            at: fixed_now(),
            channel: ViolationChannel::VisualProhibitedObject,
            count: 1,
            escalated: false,
        },
        ProctoringLogEntry {
            at: fixed_now() + Duration::seconds(4),
            channel: ViolationChannel::VisualProhibitedObject,
            count: 2,
            escalated: false,
        },
        ProctoringLogEntry {
            at: fixed_now() + Duration::seconds(8),
            channel: ViolationChannel::VisualProhibitedObject,
            count: 3,
            escalated: true,
        },
    ];
    let submission = AttemptSubmission {
        assessment_id: definition.id(),
        learner_id: Some(LearnerId::new(42)),
        answers: answers.snapshot(),
        reason: SubmitReason::Escalation {
            channel: ViolationChannel::VisualProhibitedObject,
        },
        proctoring_log: log.clone(),
        submitted_at: fixed_now() + Duration::seconds(8),
    };

    let receipt = repo.submit_attempt(&submission).await.unwrap();
    assert_eq!(receipt.score, 1);
    assert_eq!(receipt.total_marks, 3);

    let stored = repo.get_attempt(receipt.attempt_id).await.unwrap();
    assert_eq!(stored.answers, vec![Some(1), None, Some(0)]);
    assert_eq!(stored.learner_id, Some(LearnerId::new(42)));
    assert_eq!(stored.reason, submission.reason);
    assert_eq!(stored.proctoring_log, log);
    assert_eq!(stored.receipt(), receipt);

    let manual = AttemptSubmission {
        reason: SubmitReason::Manual,
        learner_id: None,
        proctoring_log: Vec::new(),
        submitted_at: fixed_now() + Duration::minutes(10),
        ..submission
    };
    let second = repo.submit_attempt(&manual).await.unwrap();
    assert_ne!(second.attempt_id, receipt.attempt_id);

    let listed = repo.list_attempts(definition.id()).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, second.attempt_id);
    assert_eq!(listed[0].learner_id, None);
    assert_eq!(listed[1].id, receipt.attempt_id);
}

#[tokio::test]
async fn sqlite_rejects_unknown_assessment_and_bad_answer_count() {
    let repo = connect("memdb_attempt_errors").await;

    let err = repo.get_assessment(AssessmentId::new(77)).await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound));

    repo.upsert_assessment(&sample_record(2)).await.unwrap();
    let definition = repo.get_assessment(AssessmentId::new(2)).await.unwrap();
    let answers = AnswerVector::for_assessment(&definition).snapshot();

    // The key shrinks after the session captured its answers.
    let mut shorter = sample_record(2);
    shorter.questions.truncate(2);
    repo.upsert_assessment(&shorter).await.unwrap();

    let submission = AttemptSubmission {
        assessment_id: definition.id(),
        learner_id: None,
        answers,
        reason: SubmitReason::TimeExpired,
        proctoring_log: Vec::new(),
        submitted_at: fixed_now(),
    };
    let err = repo.submit_attempt(&submission).await.unwrap_err();
    assert!(matches!(
        err,
        StorageError::AnswerCountMismatch {
            answers: 3,
            questions: 2
        }
    ));
    assert!(repo.list_attempts(definition.id()).await.unwrap().is_empty());
}
