use chrono::NaiveDate;
use habit_core::model::{ChallengeId, ChallengeRecord, HabitId, MediaRef, UserId};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::gateway::GatewayError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> GatewayError {
    GatewayError::Serialization(e.to_string())
}

pub(crate) fn db<E: core::fmt::Display>(e: E) -> GatewayError {
    GatewayError::Storage(e.to_string())
}

pub(crate) fn bool_to_i64(value: bool) -> i64 {
    i64::from(value)
}

pub(crate) fn challenge_id_from_row(row: &SqliteRow) -> Result<ChallengeId, GatewayError> {
    ChallengeId::new(row.try_get::<String, _>("id").map_err(ser)?).map_err(ser)
}

/// Columns expected: `id, name, start_date, end_date, before_photo,
/// after_photo, after_photo_skipped`.
pub(crate) fn map_challenge_row(
    row: &SqliteRow,
    habits: Vec<HabitId>,
    participants: Vec<UserId>,
) -> Result<ChallengeRecord, GatewayError> {
    let start_date: NaiveDate = row.try_get("start_date").map_err(ser)?;
    let end_date: NaiveDate = row.try_get("end_date").map_err(ser)?;
    let before_photo = row
        .try_get::<Option<String>, _>("before_photo")
        .map_err(ser)?
        .map(MediaRef::new)
        .transpose()
        .map_err(ser)?;
    let after_photo = row
        .try_get::<Option<String>, _>("after_photo")
        .map_err(ser)?
        .map(MediaRef::new)
        .transpose()
        .map_err(ser)?;
    let skipped = row.try_get::<i64, _>("after_photo_skipped").map_err(ser)? != 0;

    Ok(ChallengeRecord::new(
        challenge_id_from_row(row)?,
        row.try_get::<String, _>("name").map_err(ser)?,
        start_date,
        end_date,
        habits,
        participants,
    )
    .map_err(ser)?
    .with_before_photo(before_photo)
    .with_after_photo(after_photo)
    .with_after_photo_skipped(skipped))
}

pub(crate) fn habit_ids(rows: &[SqliteRow]) -> Result<Vec<HabitId>, GatewayError> {
    rows.iter()
        .map(|row| HabitId::new(row.try_get::<String, _>("habit_id").map_err(ser)?).map_err(ser))
        .collect()
}

pub(crate) fn user_ids(rows: &[SqliteRow]) -> Result<Vec<UserId>, GatewayError> {
    rows.iter()
        .map(|row| UserId::new(row.try_get::<String, _>("user_id").map_err(ser)?).map_err(ser))
        .collect()
}
