use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Runs the versioned schema migrations.
///
/// Version 1 creates challenges with their habit/participant membership and
/// the uploaded media table.
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
        tracing::debug!(version = 1, "applying challenge schema migration");
        let mut tx = pool.begin().await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS challenges (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    start_date TEXT NOT NULL,
                    end_date TEXT NOT NULL,
                    before_photo TEXT,
                    after_photo TEXT,
                    after_photo_skipped INTEGER NOT NULL DEFAULT 0
                        CHECK (after_photo_skipped IN (0, 1)),
                    was_displayed INTEGER NOT NULL DEFAULT 0
                        CHECK (was_displayed IN (0, 1)),
                    CHECK (start_date <= end_date)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS challenge_habits (
                    challenge_id TEXT NOT NULL,
                    habit_id TEXT NOT NULL,
                    PRIMARY KEY (challenge_id, habit_id),
                    FOREIGN KEY (challenge_id) REFERENCES challenges(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS challenge_participants (
                    challenge_id TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    PRIMARY KEY (challenge_id, user_id),
                    FOREIGN KEY (challenge_id) REFERENCES challenges(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS challenge_media (
                    media_ref TEXT PRIMARY KEY,
                    challenge_id TEXT NOT NULL,
                    slot TEXT NOT NULL CHECK (slot IN ('before', 'after')),
                    content_type TEXT NOT NULL,
                    bytes BLOB NOT NULL,
                    uploaded_at TEXT NOT NULL,
                    FOREIGN KEY (challenge_id) REFERENCES challenges(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_challenges_end_date
                    ON challenges (end_date, id);
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
    }

    Ok(())
}
