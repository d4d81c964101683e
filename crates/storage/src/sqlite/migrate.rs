use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Runs the versioned migrations for the progress schema.
///
/// Version 1 creates curriculum metadata, per-learner progress and indexes.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS content_meta (
                    id TEXT PRIMARY KEY,
                    content_type TEXT NOT NULL
                        CHECK (content_type IN ('concept', 'exercise', 'challenge', 'milestone')),
                    milestone_id TEXT,
                    sequence INTEGER NOT NULL CHECK (sequence >= 0),
                    title TEXT NOT NULL,
                    slug TEXT NOT NULL,
                    has_form INTEGER NOT NULL DEFAULT 0,
                    CHECK ((content_type = 'milestone') = (milestone_id IS NULL))
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS content_progress (
                    id TEXT PRIMARY KEY,
                    learner_id TEXT NOT NULL,
                    content_meta_id TEXT NOT NULL,
                    content_type TEXT NOT NULL,
                    title TEXT NOT NULL,
                    status TEXT NOT NULL
                        CHECK (status IN ('not_started', 'in_progress', 'completed')),
                    form_completed INTEGER NOT NULL DEFAULT 0,
                    completed_at TEXT,
                    feedback_rating INTEGER CHECK (feedback_rating BETWEEN 1 AND 5),
                    feedback_text TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    UNIQUE (learner_id, content_meta_id),
                    CHECK ((completed_at IS NOT NULL) = (status = 'completed'))
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_content_meta_milestone_sequence
                    ON content_meta (milestone_id, sequence);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_content_progress_learner
                    ON content_progress (learner_id, updated_at);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!(version = 1, "applied progress schema migration");
    }

    Ok(())
}
