use habit_core::model::{
    ChallengeId, ChallengeRecord, CompletedChallengeRecord, MediaRef, PhotoSlot,
};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::SqliteGateway;
use super::mapping::{bool_to_i64, challenge_id_from_row, db, habit_ids, map_challenge_row, ser, user_ids};
use crate::gateway::{ChallengeGateway, GatewayError};

const CHALLENGE_COLUMNS: &str =
    "id, name, start_date, end_date, before_photo, after_photo, after_photo_skipped, was_displayed";

impl SqliteGateway {
    /// Insert or replace a challenge and its habit/participant membership.
    ///
    /// The stored `was_displayed` flag is left untouched on update.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Storage` if any statement fails.
    pub async fn upsert_challenge(&self, challenge: &ChallengeRecord) -> Result<(), GatewayError> {
        let id = challenge.id().as_str();
        let mut tx = self.pool.begin().await.map_err(db)?;

        sqlx::query(
            r"
            INSERT INTO challenges (id, name, start_date, end_date, before_photo, after_photo, after_photo_skipped)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                start_date = excluded.start_date,
                end_date = excluded.end_date,
                before_photo = excluded.before_photo,
                after_photo = excluded.after_photo,
                after_photo_skipped = excluded.after_photo_skipped
            ",
        )
        .bind(id)
        .bind(challenge.name())
        .bind(challenge.start_date())
        .bind(challenge.end_date())
        .bind(challenge.before_photo().map(MediaRef::as_str))
        .bind(challenge.after_photo().map(MediaRef::as_str))
        .bind(bool_to_i64(challenge.after_photo_skipped()))
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        sqlx::query("DELETE FROM challenge_habits WHERE challenge_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db)?;
        for habit in challenge.habits() {
            sqlx::query("INSERT INTO challenge_habits (challenge_id, habit_id) VALUES (?1, ?2)")
                .bind(id)
                .bind(habit.as_str())
                .execute(&mut *tx)
                .await
                .map_err(db)?;
        }

        sqlx::query("DELETE FROM challenge_participants WHERE challenge_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db)?;
        for user in challenge.participants() {
            sqlx::query(
                "INSERT INTO challenge_participants (challenge_id, user_id) VALUES (?1, ?2)",
            )
            .bind(id)
            .bind(user.as_str())
            .execute(&mut *tx)
            .await
            .map_err(db)?;
        }

        tx.commit().await.map_err(db)?;
        tracing::debug!(challenge_id = %challenge.id(), "challenge upserted");
        Ok(())
    }

    /// Server-side acknowledgement that a completion summary was shown.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::NotFound` if the challenge does not exist.
    pub async fn mark_displayed(&self, id: &ChallengeId) -> Result<(), GatewayError> {
        let res = sqlx::query("UPDATE challenges SET was_displayed = 1 WHERE id = ?1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(db)?;
        if res.rows_affected() == 0 {
            return Err(GatewayError::NotFound);
        }
        Ok(())
    }

    async fn hydrate(&self, row: &SqliteRow) -> Result<ChallengeRecord, GatewayError> {
        let id = challenge_id_from_row(row)?;
        let habit_rows = sqlx::query(
            "SELECT habit_id FROM challenge_habits WHERE challenge_id = ?1 ORDER BY habit_id",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        let participant_rows = sqlx::query(
            "SELECT user_id FROM challenge_participants WHERE challenge_id = ?1 ORDER BY user_id",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        map_challenge_row(row, habit_ids(&habit_rows)?, user_ids(&participant_rows)?)
    }
}

#[async_trait::async_trait]
impl ChallengeGateway for SqliteGateway {
    async fn fetch_challenges(&self) -> Result<Vec<ChallengeRecord>, GatewayError> {
        let rows = sqlx::query(&format!(
            "SELECT {CHALLENGE_COLUMNS} FROM challenges ORDER BY start_date ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        let mut challenges = Vec::with_capacity(rows.len());
        for row in &rows {
            challenges.push(self.hydrate(row).await?);
        }
        Ok(challenges)
    }

    async fn fetch_completed_challenges(
        &self,
    ) -> Result<Vec<CompletedChallengeRecord>, GatewayError> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {CHALLENGE_COLUMNS} FROM challenges
            WHERE end_date < ?1
              AND after_photo IS NULL
              AND after_photo_skipped = 0
            ORDER BY end_date DESC, id ASC
            "
        ))
        .bind(self.clock.today())
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        let mut completed = Vec::with_capacity(rows.len());
        for row in &rows {
            let was_displayed = row.try_get::<i64, _>("was_displayed").map_err(ser)? != 0;
            completed.push(CompletedChallengeRecord::new(
                self.hydrate(row).await?,
                was_displayed,
            ));
        }
        Ok(completed)
    }

    async fn skip_after_photo(&self, id: &ChallengeId) -> Result<(), GatewayError> {
        let res = sqlx::query(
            r"
            UPDATE challenges
            SET after_photo_skipped = 1, was_displayed = 1
            WHERE id = ?1
            ",
        )
        .bind(id.as_str())
        .execute(&self.pool)
        .await
        .map_err(db)?;

        if res.rows_affected() == 0 {
            return Err(GatewayError::NotFound);
        }
        tracing::debug!(challenge_id = %id, "after photo skipped");
        Ok(())
    }

    async fn record_photo(
        &self,
        id: &ChallengeId,
        slot: PhotoSlot,
        media: &MediaRef,
    ) -> Result<(), GatewayError> {
        let sql = match slot {
            PhotoSlot::Before => "UPDATE challenges SET before_photo = ?2 WHERE id = ?1",
            PhotoSlot::After => {
                "UPDATE challenges SET after_photo = ?2, was_displayed = 1 WHERE id = ?1"
            }
        };
        let res = sqlx::query(sql)
            .bind(id.as_str())
            .bind(media.as_str())
            .execute(&self.pool)
            .await
            .map_err(db)?;

        if res.rows_affected() == 0 {
            return Err(GatewayError::NotFound);
        }
        tracing::debug!(challenge_id = %id, %slot, "photo recorded");
        Ok(())
    }
}
