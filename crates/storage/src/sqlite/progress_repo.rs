use coach_core::model::{
    ContentId, LearnerId, NewProgress, ProgressId, ProgressPatch, ProgressRecord, ProgressStatus,
};

use super::SqliteRepository;
use super::mapping::{PROGRESS_COLUMNS, map_progress_row};
use crate::repository::{ProgressGateway, StorageError};

pub(crate) fn db_err(e: sqlx::Error) -> StorageError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StorageError::Conflict,
        sqlx::Error::RowNotFound => StorageError::NotFound,
        _ => StorageError::Connection(e.to_string()),
    }
}

#[async_trait::async_trait]
impl ProgressGateway for SqliteRepository {
    async fn select_progress(
        &self,
        learner: &LearnerId,
    ) -> Result<Vec<ProgressRecord>, StorageError> {
        let sql = format!(
            "SELECT {PROGRESS_COLUMNS} FROM content_progress \
             WHERE learner_id = ?1 ORDER BY created_at ASC, content_meta_id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(learner.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(map_progress_row(&row)?);
        }
        Ok(records)
    }

    async fn upsert_progress(&self, record: NewProgress) -> Result<ProgressRecord, StorageError> {
        let row = record.into_record(ProgressId::generate(), self.clock.now());

        // Existing rows keep their state unless they were never started.
        let sql = format!(
            r"
            INSERT INTO content_progress (
                id, learner_id, content_meta_id, content_type, title, status,
                form_completed, completed_at, feedback_rating, feedback_text,
                created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(learner_id, content_meta_id) DO UPDATE SET
                status = CASE WHEN content_progress.status = 'not_started'
                    THEN excluded.status ELSE content_progress.status END,
                completed_at = CASE WHEN content_progress.status = 'not_started'
                    THEN excluded.completed_at ELSE content_progress.completed_at END,
                updated_at = CASE WHEN content_progress.status = 'not_started'
                    THEN excluded.updated_at ELSE content_progress.updated_at END
            RETURNING {PROGRESS_COLUMNS}
            "
        );

        let stored = sqlx::query(&sql)
            .bind(row.id().to_string())
            .bind(row.learner_id().as_str())
            .bind(row.content_id().as_str())
            .bind(row.content_type().as_str())
            .bind(row.title())
            .bind(row.status().as_str())
            .bind(row.form_completed())
            .bind(row.completed_at())
            .bind(row.feedback_rating().map(i64::from))
            .bind(row.feedback_text())
            .bind(row.created_at())
            .bind(row.updated_at())
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        map_progress_row(&stored)
    }

    async fn update_progress(
        &self,
        learner: &LearnerId,
        content: &ContentId,
        patch: &ProgressPatch,
    ) -> Result<ProgressRecord, StorageError> {
        let now = self.clock.now();
        let feedback = patch.feedback.as_ref();

        // One statement, so concurrent writers only wait on the write lock.
        // SET expressions see the pre-update row: a completed row keeps its
        // first completed_at, any other status clears it.
        let sql = format!(
            r"
            UPDATE content_progress SET
                status = COALESCE(?1, status),
                completed_at = CASE
                    WHEN ?1 IS NULL THEN completed_at
                    WHEN ?1 = 'completed' THEN COALESCE(completed_at, ?2)
                    ELSE NULL
                END,
                form_completed = COALESCE(?3, form_completed),
                feedback_rating = CASE WHEN ?4 THEN ?5 ELSE feedback_rating END,
                feedback_text = CASE WHEN ?4 THEN ?6 ELSE feedback_text END,
                updated_at = ?7
            WHERE learner_id = ?8 AND content_meta_id = ?9
            RETURNING {PROGRESS_COLUMNS}
            "
        );

        let row = sqlx::query(&sql)
            .bind(patch.status.map(ProgressStatus::as_str))
            .bind(patch.completed_at.unwrap_or(now))
            .bind(patch.form_completed)
            .bind(feedback.is_some())
            .bind(feedback.map(|f| i64::from(f.rating)))
            .bind(feedback.and_then(|f| f.text.as_deref()))
            .bind(now)
            .bind(learner.as_str())
            .bind(content.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or(StorageError::NotFound)?;

        map_progress_row(&row)
    }
}
