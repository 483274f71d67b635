use async_trait::async_trait;
use chrono::{DateTime, Utc};
use proctor_core::ProctoringSettings;
use proctor_core::model::{
    AssessmentDefinition, AssessmentId, AttemptId, AttemptReceipt, AttemptSubmission, LearnerId,
    ProctoringLogEntry, Question, SubmitReason,
};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use storage::repository::{
    AssessmentRecord, AssessmentRepository, AttemptRecord, AttemptRepository, QuestionRecord,
    StorageError,
};

use crate::error::ScoringClientError;

#[derive(Clone, Debug)]
pub struct ScoringClientConfig {
    pub base_url: String,
    pub token: Option<String>,
}

impl ScoringClientConfig {
    /// Build from settings. `None` when no scoring URL is configured.
    #[must_use]
    pub fn from_settings(settings: &ProctoringSettings) -> Option<Self> {
        let base_url = settings.scoring_base_url()?;
        Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: settings.scoring_token().map(ToString::to_string),
        })
    }
}

/// REST client for the LMS test endpoints.
///
/// Implements both collaborator contracts so a session can run against a
/// remote server instead of the local store.
#[derive(Clone)]
pub struct ScoringClient {
    client: Client,
    config: Option<ScoringClientConfig>,
}

impl ScoringClient {
    #[must_use]
    pub fn new(config: Option<ScoringClientConfig>) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    #[must_use]
    pub fn from_settings(settings: &ProctoringSettings) -> Self {
        Self::new(ScoringClientConfig::from_settings(settings))
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.config.is_some()
    }

    fn request(
        &self,
        method: reqwest::Method,
        path: &str,
    ) -> Result<RequestBuilder, ScoringClientError> {
        let config = self.config.as_ref().ok_or(ScoringClientError::Disabled)?;
        let builder = self
            .client
            .request(method, format!("{}{path}", config.base_url));
        Ok(match &config.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }

    async fn read<T: DeserializeOwned>(response: Response) -> Result<T, ScoringClientError> {
        if !response.status().is_success() {
            return Err(ScoringClientError::HttpStatus(response.status()));
        }
        Ok(response.json().await?)
    }

    /// `GET /tests/{id}`; the server omits correct options.
    ///
    /// # Errors
    ///
    /// Returns `ScoringClientError` if the client is disabled, the request
    /// fails, or the payload is not a valid assessment.
    pub async fn fetch_test(&self, id: AssessmentId) -> Result<AssessmentDefinition, ScoringClientError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/tests/{id}"))?
            .send()
            .await?;
        let body: TestDto = Self::read(response).await?;
        body.into_definition()
    }

    /// `POST /tests` with the full answer key.
    ///
    /// # Errors
    ///
    /// Returns `ScoringClientError` if the client is disabled or the server
    /// rejects the test.
    pub async fn create_test(&self, record: &AssessmentRecord) -> Result<(), ScoringClientError> {
        let response = self
            .request(reqwest::Method::POST, "/tests")?
            .json(&TestDto::from_record(record))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ScoringClientError::HttpStatus(response.status()));
        }
        Ok(())
    }

    /// `POST /tests/submit`.
    ///
    /// # Errors
    ///
    /// Returns `ScoringClientError` if the client is disabled, the request
    /// fails, or the receipt is malformed.
    pub async fn submit_test(
        &self,
        submission: &AttemptSubmission,
    ) -> Result<AttemptReceipt, ScoringClientError> {
        let payload = SubmitRequest::from_submission(submission);
        let response = self
            .request(reqwest::Method::POST, "/tests/submit")?
            .json(&payload)
            .send()
            .await?;
        let body: SubmitResponse = Self::read(response).await?;
        let attempt_id = body
            .attempt_id
            .ok_or_else(|| ScoringClientError::Malformed("missing attemptId".into()))?;
        Ok(AttemptReceipt {
            attempt_id: AttemptId::new(attempt_id),
            score: body.score,
            total_marks: body.total_marks,
            message: body.message,
        })
    }

    /// `GET /tests/results/{id}`.
    ///
    /// # Errors
    ///
    /// Returns `ScoringClientError` if the client is disabled, the request
    /// fails, or the result is malformed.
    pub async fn fetch_result(&self, id: AttemptId) -> Result<AttemptRecord, ScoringClientError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/tests/results/{id}"))?
            .send()
            .await?;
        let body: ResultDto = Self::read(response).await?;
        body.into_record()
    }

    /// `GET /tests/results`, newest first as returned by the server.
    ///
    /// # Errors
    ///
    /// Returns `ScoringClientError` if the client is disabled, the request
    /// fails, or any result is malformed.
    pub async fn fetch_results(&self) -> Result<Vec<AttemptRecord>, ScoringClientError> {
        let response = self
            .request(reqwest::Method::GET, "/tests/results")?
            .send()
            .await?;
        let body: Vec<ResultDto> = Self::read(response).await?;
        body.into_iter().map(ResultDto::into_record).collect()
    }
}

#[async_trait]
impl AssessmentRepository for ScoringClient {
    async fn upsert_assessment(&self, record: &AssessmentRecord) -> Result<(), StorageError> {
        Ok(self.create_test(record).await?)
    }

    async fn get_assessment(&self, id: AssessmentId) -> Result<AssessmentDefinition, StorageError> {
        Ok(self.fetch_test(id).await?)
    }
}

#[async_trait]
impl AttemptRepository for ScoringClient {
    async fn submit_attempt(
        &self,
        submission: &AttemptSubmission,
    ) -> Result<AttemptReceipt, StorageError> {
        Ok(self.submit_test(submission).await?)
    }

    async fn get_attempt(&self, id: AttemptId) -> Result<AttemptRecord, StorageError> {
        Ok(self.fetch_result(id).await?)
    }

    async fn list_attempts(
        &self,
        assessment_id: AssessmentId,
    ) -> Result<Vec<AttemptRecord>, StorageError> {
        let all = self.fetch_results().await?;
        Ok(all
            .into_iter()
            .filter(|attempt| attempt.assessment_id == assessment_id)
            .collect())
    }
}

//
// ─── WIRE FORMAT ───────────────────────────────────────────────────────────────
//

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuestionDto {
    question_text: String,
    options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    correct_option: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TestDto {
    id: u64,
    title: String,
    duration: u32,
    #[serde(default = "default_proctored")]
    is_proctored: bool,
    questions: Vec<QuestionDto>,
}

fn default_proctored() -> bool {
    true
}

impl TestDto {
    fn from_record(record: &AssessmentRecord) -> Self {
        Self {
            id: record.id.value(),
            title: record.title.clone(),
            duration: record.duration_minutes,
            is_proctored: record.proctoring_required,
            questions: record
                .questions
                .iter()
                .map(|q: &QuestionRecord| QuestionDto {
                    question_text: q.text.clone(),
                    options: q.options.clone(),
                    correct_option: Some(q.correct_option),
                })
                .collect(),
        }
    }

    fn into_definition(self) -> Result<AssessmentDefinition, ScoringClientError> {
        let malformed = |e: proctor_core::model::AssessmentError| {
            ScoringClientError::Malformed(e.to_string())
        };
        let questions = self
            .questions
            .into_iter()
            .map(|q| Question::new(q.question_text, q.options))
            .collect::<Result<Vec<_>, _>>()
            .map_err(malformed)?;
        AssessmentDefinition::new(
            AssessmentId::new(self.id),
            self.title,
            questions,
            self.duration,
            self.is_proctored,
        )
        .map_err(malformed)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitRequest<'a> {
    test_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    student_id: Option<u64>,
    answers: &'a [Option<usize>],
    reason: SubmitReason,
    proctoring_logs: Vec<String>,
    submitted_at: DateTime<Utc>,
}

impl<'a> SubmitRequest<'a> {
    fn from_submission(submission: &'a AttemptSubmission) -> Self {
        Self {
            test_id: submission.assessment_id.value(),
            student_id: submission.learner_id.map(|id| id.value()),
            answers: submission.answers.answers(),
            reason: submission.reason,
            proctoring_logs: submission
                .proctoring_log
                .iter()
                .map(ProctoringLogEntry::to_string)
                .collect(),
            submitted_at: submission.submitted_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    #[serde(default)]
    attempt_id: Option<u64>,
    score: u32,
    total_marks: u32,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultDto {
    id: u64,
    test_id: u64,
    #[serde(default)]
    student_id: Option<u64>,
    answers: Vec<Option<usize>>,
    score: u32,
    total_marks: u32,
    reason: SubmitReason,
    #[serde(default)]
    proctoring_log: Vec<ProctoringLogEntry>,
    submitted_at: DateTime<Utc>,
}

impl ResultDto {
    fn into_record(self) -> Result<AttemptRecord, ScoringClientError> {
        Ok(AttemptRecord {
            id: AttemptId::new(self.id),
            assessment_id: AssessmentId::new(self.test_id),
            learner_id: self.student_id.map(LearnerId::new),
            answers: self.answers,
            score: self.score,
            total_marks: self.total_marks,
            reason: self.reason,
            proctoring_log: self.proctoring_log,
            submitted_at: self.submitted_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proctor_core::model::{AnswerVector, ViolationChannel};
    use proctor_core::time::fixed_now;

    #[test]
    fn test_payload_maps_to_definition_without_key() {
        let body = serde_json::json!({
            "id": 4,
            "title": "Databases",
            "duration": 15,
            "questions": [
                { "questionText": "Normal form removing transitive deps?", "options": ["1NF", "2NF", "3NF"] },
                { "questionText": "ACID I stands for?", "options": ["Isolation", "Integrity"] }
            ]
        });
        let dto: TestDto = serde_json::from_value(body).unwrap();
        let definition = dto.into_definition().unwrap();
        assert_eq!(definition.id(), AssessmentId::new(4));
        assert_eq!(definition.question_count(), 2);
        assert!(definition.proctoring_required());
    }

    #[test]
    fn empty_test_payload_is_malformed() {
        let body = serde_json::json!({
            "id": 4,
            "title": "Databases",
            "duration": 15,
            "isProctored": false,
            "questions": []
        });
        let dto: TestDto = serde_json::from_value(body).unwrap();
        assert!(matches!(
            dto.into_definition(),
            Err(ScoringClientError::Malformed(_))
        ));
    }

    #[test]
    fn submit_request_carries_answers_and_logs() {
        let definition = AssessmentDefinition::new(
            AssessmentId::new(9),
            "Compilers",
            vec![
                Question::new("LL(1) parses?", vec!["top-down".into(), "bottom-up".into()]).unwrap(),
                Question::new("SSA means?", vec!["static single assignment".into()]).unwrap(),
            ],
            10,
            true,
        )
        .unwrap();
        let mut answers = AnswerVector::for_assessment(&definition);
        answers.select(definition.index(0).unwrap(), 0).unwrap();

        let submission = AttemptSubmission {
            assessment_id: definition.id(),
            learner_id: Some(LearnerId::new(12)),
            answers: answers.snapshot(),
            reason: SubmitReason::Escalation {
                channel: ViolationChannel::TabSwitch,
            },
            proctoring_log: vec![ProctoringLogEntry {
                at: fixed_now(),
                channel: ViolationChannel::TabSwitch,
                count: 3,
                escalated: true,
            }],
            submitted_at: fixed_now(),
        };

        let value = serde_json::to_value(SubmitRequest::from_submission(&submission)).unwrap();
        assert_eq!(value["testId"], 9);
        assert_eq!(value["studentId"], 12);
        assert_eq!(value["answers"], serde_json::json!([0, null]));
        assert_eq!(value["proctoringLogs"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn disabled_client_reports_disabled() {
        let client = ScoringClient::new(None);
        assert!(!client.enabled());
        let err = client.fetch_test(AssessmentId::new(1)).await.unwrap_err();
        assert!(matches!(err, ScoringClientError::Disabled));
    }
}
