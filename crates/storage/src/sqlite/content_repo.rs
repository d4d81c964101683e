use coach_core::model::ContentItem;

use super::SqliteRepository;
use super::mapping::{CONTENT_COLUMNS, map_content_row, sequence_to_i64};
use super::progress_repo::db_err;
use crate::repository::{ContentRepository, StorageError};

#[async_trait::async_trait]
impl ContentRepository for SqliteRepository {
    async fn select_content_meta(&self) -> Result<Vec<ContentItem>, StorageError> {
        let sql = format!("SELECT {CONTENT_COLUMNS} FROM content_meta ORDER BY sequence ASC, id ASC");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            items.push(map_content_row(&row)?);
        }
        Ok(items)
    }

    async fn upsert_content(&self, item: &ContentItem) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO content_meta (id, content_type, milestone_id, sequence, title, slug, has_form)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                content_type = excluded.content_type,
                milestone_id = excluded.milestone_id,
                sequence = excluded.sequence,
                title = excluded.title,
                slug = excluded.slug,
                has_form = excluded.has_form
            ",
        )
        .bind(item.id().as_str())
        .bind(item.content_type().as_str())
        .bind(item.milestone_id().map(|id| id.as_str().to_owned()))
        .bind(sequence_to_i64(item.sequence()))
        .bind(item.title())
        .bind(item.slug())
        .bind(item.has_form())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }
}
