use proctor_core::model::{
    AssessmentId, AttemptId, AttemptReceipt, AttemptSubmission, ProctoringLogEntry,
};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::SqliteRepository;
use super::mapping::{
    assessment_id_from_i64, attempt_id_from_i64, conn, id_i64, learner_id_from_i64,
    parse_reason, reason_to_str, ser, u32_from_i64, usize_from_i64, usize_i64,
};
use crate::repository::{
    AttemptRecord, AttemptRepository, StorageError, score_answers, total_marks,
};

fn map_attempt_row(row: &SqliteRow) -> Result<(i64, AttemptRecord), StorageError> {
    let raw_id: i64 = row.try_get("id").map_err(ser)?;
    let learner_id = row
        .try_get::<Option<i64>, _>("learner_id")
        .map_err(ser)?
        .map(learner_id_from_i64)
        .transpose()?;
    let reason: String = row.try_get("reason").map_err(ser)?;

    let record = AttemptRecord {
        id: attempt_id_from_i64(raw_id)?,
        assessment_id: assessment_id_from_i64(row.try_get("assessment_id").map_err(ser)?)?,
        learner_id,
        answers: Vec::new(),
        score: u32_from_i64("score", row.try_get("score").map_err(ser)?)?,
        total_marks: u32_from_i64("total_marks", row.try_get("total_marks").map_err(ser)?)?,
        reason: parse_reason(&reason)?,
        proctoring_log: Vec::new(),
        submitted_at: row.try_get("submitted_at").map_err(ser)?,
    };
    Ok((raw_id, record))
}

impl SqliteRepository {
    /// Fill in the answers and proctoring log of an attempt header.
    async fn hydrate_attempt(
        &self,
        raw_id: i64,
        mut record: AttemptRecord,
    ) -> Result<AttemptRecord, StorageError> {
        let answer_rows = sqlx::query(
            r"
                SELECT selected_option
                FROM attempt_answers
                WHERE attempt_id = ?1
                ORDER BY position ASC
            ",
        )
        .bind(raw_id)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        for answer in answer_rows {
            record.answers.push(
                answer
                    .try_get::<Option<i64>, _>("selected_option")
                    .map_err(ser)?
                    .map(|v| usize_from_i64("selected_option", v))
                    .transpose()?,
            );
        }

        let log_rows = sqlx::query(
            r"
                SELECT logged_at, channel, count, escalated
                FROM attempt_logs
                WHERE attempt_id = ?1
                ORDER BY seq ASC
            ",
        )
        .bind(raw_id)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        for entry in log_rows {
            let channel: String = entry.try_get("channel").map_err(ser)?;
            record.proctoring_log.push(ProctoringLogEntry {
                at: entry.try_get("logged_at").map_err(ser)?,
                channel: channel.parse().map_err(ser)?,
                count: u32_from_i64("count", entry.try_get("count").map_err(ser)?)?,
                escalated: entry.try_get::<i64, _>("escalated").map_err(ser)? != 0,
            });
        }

        Ok(record)
    }
}

#[async_trait::async_trait]
impl AttemptRepository for SqliteRepository {
    async fn submit_attempt(
        &self,
        submission: &AttemptSubmission,
    ) -> Result<AttemptReceipt, StorageError> {
        let record = self
            .load_assessment_record(submission.assessment_id)
            .await?;
        let answers = submission.answers.answers();
        let score = score_answers(&record.answer_key(), answers)?;
        let total = total_marks(&record)?;
        let learner_id = submission
            .learner_id
            .map(|id| id_i64("learner_id", id.value()))
            .transpose()?;

        let mut tx = self.pool.begin().await.map_err(conn)?;

        let res = sqlx::query(
            r"
                INSERT INTO attempts (
                    assessment_id, learner_id, score, total_marks, reason, submitted_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
        )
        .bind(id_i64("assessment_id", submission.assessment_id.value())?)
        .bind(learner_id)
        .bind(i64::from(score))
        .bind(i64::from(total))
        .bind(reason_to_str(submission.reason))
        .bind(submission.submitted_at)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;
        let raw_id = res.last_insert_rowid();

        for (position, selected) in answers.iter().enumerate() {
            let selected = selected
                .map(|v| usize_i64("selected_option", v))
                .transpose()?;
            sqlx::query(
                r"
                    INSERT INTO attempt_answers (attempt_id, position, selected_option)
                    VALUES (?1, ?2, ?3)
                ",
            )
            .bind(raw_id)
            .bind(usize_i64("position", position)?)
            .bind(selected)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        }

        for (seq, entry) in submission.proctoring_log.iter().enumerate() {
            sqlx::query(
                r"
                    INSERT INTO attempt_logs (attempt_id, seq, logged_at, channel, count, escalated)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ",
            )
            .bind(raw_id)
            .bind(usize_i64("seq", seq)?)
            .bind(entry.at)
            .bind(entry.channel.as_str())
            .bind(i64::from(entry.count))
            .bind(i64::from(u8::from(entry.escalated)))
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        }

        tx.commit().await.map_err(conn)?;

        Ok(AttemptReceipt {
            attempt_id: attempt_id_from_i64(raw_id)?,
            score,
            total_marks: total,
            message: Some(format!("Test submitted: {}", submission.reason)),
        })
    }

    async fn get_attempt(&self, id: AttemptId) -> Result<AttemptRecord, StorageError> {
        let row = sqlx::query(
            r"
                SELECT id, assessment_id, learner_id, score, total_marks, reason, submitted_at
                FROM attempts
                WHERE id = ?1
            ",
        )
        .bind(id_i64("attempt_id", id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?
        .ok_or(StorageError::NotFound)?;

        let (raw_id, record) = map_attempt_row(&row)?;
        self.hydrate_attempt(raw_id, record).await
    }

    async fn list_attempts(
        &self,
        assessment_id: AssessmentId,
    ) -> Result<Vec<AttemptRecord>, StorageError> {
        let rows = sqlx::query(
            r"
                SELECT id, assessment_id, learner_id, score, total_marks, reason, submitted_at
                FROM attempts
                WHERE assessment_id = ?1
                ORDER BY submitted_at DESC, id DESC
            ",
        )
        .bind(id_i64("assessment_id", assessment_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let headers = rows
            .iter()
            .map(map_attempt_row)
            .collect::<Result<Vec<_>, _>>()?;

        let mut out = Vec::with_capacity(headers.len());
        for (raw_id, record) in headers {
            out.push(self.hydrate_attempt(raw_id, record).await?);
        }
        Ok(out)
    }
}
