use chrono::Utc;
use habit_core::model::{ChallengeId, MediaRef, PhotoSlot};
use sqlx::Row;

use super::SqliteGateway;
use super::mapping::{db, ser};
use crate::gateway::{GatewayError, PhotoStore, PhotoUpload, photo_key};

impl SqliteGateway {
    /// Load uploaded photo bytes by reference.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::NotFound` if nothing was uploaded under `media`.
    pub async fn load_photo(&self, media: &MediaRef) -> Result<PhotoUpload, GatewayError> {
        let row = sqlx::query("SELECT content_type, bytes FROM challenge_media WHERE media_ref = ?1")
            .bind(media.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?
            .ok_or(GatewayError::NotFound)?;

        Ok(PhotoUpload::new(
            row.try_get::<String, _>("content_type").map_err(ser)?,
            row.try_get::<Vec<u8>, _>("bytes").map_err(ser)?,
        ))
    }
}

#[async_trait::async_trait]
impl PhotoStore for SqliteGateway {
    async fn upload_photo(
        &self,
        id: &ChallengeId,
        slot: PhotoSlot,
        photo: &PhotoUpload,
    ) -> Result<MediaRef, GatewayError> {
        let mut tx = self.pool.begin().await.map_err(db)?;

        let exists = sqlx::query("SELECT 1 FROM challenges WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(db)?;
        if exists.is_none() {
            return Err(GatewayError::NotFound);
        }

        let previous: i64 = sqlx::query(
            "SELECT COUNT(*) AS n FROM challenge_media WHERE challenge_id = ?1 AND slot = ?2",
        )
        .bind(id.as_str())
        .bind(slot.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(db)?
        .try_get("n")
        .map_err(ser)?;
        let seq = u64::try_from(previous).map_err(ser)? + 1;

        let media = MediaRef::new(photo_key(id, slot, seq, photo)).map_err(ser)?;
        sqlx::query(
            r"
            INSERT INTO challenge_media (media_ref, challenge_id, slot, content_type, bytes, uploaded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
        )
        .bind(media.as_str())
        .bind(id.as_str())
        .bind(slot.as_str())
        .bind(photo.content_type.as_str())
        .bind(photo.bytes.as_slice())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        tx.commit().await.map_err(db)?;
        tracing::debug!(challenge_id = %id, %slot, media = %media, "photo uploaded");
        Ok(media)
    }
}
