use coach_core::model::{
    ContentId, ContentItem, ContentType, FeedbackRating, LearnerId, ProgressId, ProgressRecord,
    ProgressStatus,
};
use sqlx::Row;

use crate::repository::StorageError;

fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) const PROGRESS_COLUMNS: &str = "id, learner_id, content_meta_id, content_type, title, \
     status, form_completed, completed_at, feedback_rating, feedback_text, created_at, updated_at";

pub(crate) const CONTENT_COLUMNS: &str =
    "id, content_type, milestone_id, sequence, title, slug, has_form";

pub(crate) fn sequence_to_i64(sequence: u32) -> i64 {
    i64::from(sequence)
}

pub(crate) fn map_progress_row(row: &sqlx::sqlite::SqliteRow) -> Result<ProgressRecord, StorageError> {
    let id: String = row.try_get("id").map_err(ser)?;
    let content_type: String = row.try_get("content_type").map_err(ser)?;
    let status: String = row.try_get("status").map_err(ser)?;
    let rating = row
        .try_get::<Option<i64>, _>("feedback_rating")
        .map_err(ser)?
        .map(FeedbackRating::new)
        .transpose()
        .map_err(ser)?;

    ProgressRecord::from_persisted(
        id.parse::<ProgressId>().map_err(ser)?,
        LearnerId::new(row.try_get::<String, _>("learner_id").map_err(ser)?).map_err(ser)?,
        ContentId::new(row.try_get::<String, _>("content_meta_id").map_err(ser)?).map_err(ser)?,
        content_type.parse::<ContentType>().map_err(ser)?,
        row.try_get("title").map_err(ser)?,
        status.parse::<ProgressStatus>().map_err(ser)?,
        row.try_get("form_completed").map_err(ser)?,
        row.try_get("completed_at").map_err(ser)?,
        rating,
        row.try_get("feedback_text").map_err(ser)?,
        row.try_get("created_at").map_err(ser)?,
        row.try_get("updated_at").map_err(ser)?,
    )
    .map_err(ser)
}

pub(crate) fn map_content_row(row: &sqlx::sqlite::SqliteRow) -> Result<ContentItem, StorageError> {
    let content_type: String = row.try_get("content_type").map_err(ser)?;
    let sequence: i64 = row.try_get("sequence").map_err(ser)?;
    let sequence = u32::try_from(sequence)
        .map_err(|_| StorageError::Serialization(format!("invalid sequence: {sequence}")))?;
    let milestone_id = row
        .try_get::<Option<String>, _>("milestone_id")
        .map_err(ser)?
        .map(ContentId::new)
        .transpose()
        .map_err(ser)?;

    ContentItem::new(
        ContentId::new(row.try_get::<String, _>("id").map_err(ser)?).map_err(ser)?,
        content_type.parse::<ContentType>().map_err(ser)?,
        milestone_id,
        sequence,
        row.try_get::<String, _>("title").map_err(ser)?,
        row.try_get::<String, _>("slug").map_err(ser)?,
        row.try_get("has_form").map_err(ser)?,
    )
    .map_err(ser)
}
