use proctor_core::model::{AssessmentDefinition, AssessmentId};
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{conn, id_i64, ser, u32_from_i64, usize_from_i64, usize_i64};
use crate::repository::{AssessmentRecord, AssessmentRepository, QuestionRecord, StorageError};

impl SqliteRepository {
    /// Load an assessment including its answer key.
    pub(crate) async fn load_assessment_record(
        &self,
        id: AssessmentId,
    ) -> Result<AssessmentRecord, StorageError> {
        let assessment_id = id_i64("assessment_id", id.value())?;

        let row = sqlx::query(
            r"
                SELECT title, duration_minutes, proctoring_required
                FROM assessments
                WHERE id = ?1
            ",
        )
        .bind(assessment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?
        .ok_or(StorageError::NotFound)?;

        let title: String = row.try_get("title").map_err(ser)?;
        let duration_minutes =
            u32_from_i64("duration_minutes", row.try_get("duration_minutes").map_err(ser)?)?;
        let proctoring_required = row.try_get::<i64, _>("proctoring_required").map_err(ser)? != 0;

        let question_rows = sqlx::query(
            r"
                SELECT position, text, correct_option
                FROM questions
                WHERE assessment_id = ?1
                ORDER BY position ASC
            ",
        )
        .bind(assessment_id)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut questions = Vec::with_capacity(question_rows.len());
        for (expected, row) in question_rows.iter().enumerate() {
            let position = usize_from_i64("position", row.try_get("position").map_err(ser)?)?;
            if position != expected {
                return Err(StorageError::Serialization(format!(
                    "question positions are not contiguous at {expected}"
                )));
            }
            questions.push(QuestionRecord {
                text: row.try_get("text").map_err(ser)?,
                options: Vec::new(),
                correct_option: usize_from_i64(
                    "correct_option",
                    row.try_get("correct_option").map_err(ser)?,
                )?,
            });
        }

        let option_rows = sqlx::query(
            r"
                SELECT question_position, text
                FROM question_options
                WHERE assessment_id = ?1
                ORDER BY question_position ASC, position ASC
            ",
        )
        .bind(assessment_id)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        for row in option_rows {
            let question = usize_from_i64(
                "question_position",
                row.try_get("question_position").map_err(ser)?,
            )?;
            let text: String = row.try_get("text").map_err(ser)?;
            questions
                .get_mut(question)
                .ok_or_else(|| {
                    StorageError::Serialization(format!("option for unknown question {question}"))
                })?
                .options
                .push(text);
        }

        Ok(AssessmentRecord {
            id,
            title,
            duration_minutes,
            proctoring_required,
            questions,
        })
    }
}

#[async_trait::async_trait]
impl AssessmentRepository for SqliteRepository {
    async fn upsert_assessment(&self, record: &AssessmentRecord) -> Result<(), StorageError> {
        let assessment_id = id_i64("assessment_id", record.id.value())?;
        let proctoring_required: i64 = if record.proctoring_required { 1 } else { 0 };

        let mut tx = self.pool.begin().await.map_err(conn)?;

        sqlx::query(
            r"
            INSERT INTO assessments (id, title, duration_minutes, proctoring_required)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                duration_minutes = excluded.duration_minutes,
                proctoring_required = excluded.proctoring_required
            ",
        )
        .bind(assessment_id)
        .bind(record.title.as_str())
        .bind(i64::from(record.duration_minutes))
        .bind(proctoring_required)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        sqlx::query("DELETE FROM question_options WHERE assessment_id = ?1")
            .bind(assessment_id)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        sqlx::query("DELETE FROM questions WHERE assessment_id = ?1")
            .bind(assessment_id)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;

        for (position, question) in record.questions.iter().enumerate() {
            let position = usize_i64("position", position)?;
            sqlx::query(
                r"
                INSERT INTO questions (assessment_id, position, text, correct_option)
                VALUES (?1, ?2, ?3, ?4)
                ",
            )
            .bind(assessment_id)
            .bind(position)
            .bind(question.text.as_str())
            .bind(usize_i64("correct_option", question.correct_option)?)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;

            for (option_position, option) in question.options.iter().enumerate() {
                sqlx::query(
                    r"
                    INSERT INTO question_options (assessment_id, question_position, position, text)
                    VALUES (?1, ?2, ?3, ?4)
                    ",
                )
                .bind(assessment_id)
                .bind(position)
                .bind(usize_i64("option_position", option_position)?)
                .bind(option.as_str())
                .execute(&mut *tx)
                .await
                .map_err(conn)?;
            }
        }

        tx.commit().await.map_err(conn)?;
        Ok(())
    }

    async fn get_assessment(
        &self,
        id: AssessmentId,
    ) -> Result<AssessmentDefinition, StorageError> {
        self.load_assessment_record(id)
            .await?
            .to_definition()
            .map_err(ser)
    }
}
