use std::collections::BTreeSet;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{ChallengeId, HabitId, MediaRef, UserId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ChallengeError {
    #[error("challenge name cannot be empty")]
    EmptyName,

    #[error("challenge start date {start} is after end date {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    #[error("challenge must have at least one participant")]
    NoParticipants,
}

//
// ─── PHOTO SLOTS ───────────────────────────────────────────────────────────────
//

/// Which verification photo a media reference belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhotoSlot {
    Before,
    After,
}

impl PhotoSlot {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PhotoSlot::Before => "before",
            PhotoSlot::After => "after",
        }
    }
}

impl fmt::Display for PhotoSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//
// ─── CHALLENGE ─────────────────────────────────────────────────────────────────
//

/// A time-bounded, multi-participant habit goal with before/after photo
/// verification.
///
/// Construction always validates; records coming back from a gateway are
/// validated the same way during deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawChallenge")]
pub struct ChallengeRecord {
    id: ChallengeId,
    name: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
    habits: BTreeSet<HabitId>,
    participants: BTreeSet<UserId>,
    before_photo: Option<MediaRef>,
    after_photo: Option<MediaRef>,
    after_photo_skipped: bool,
}

impl ChallengeRecord {
    /// Creates a validated challenge with no photos attached.
    ///
    /// # Errors
    ///
    /// Returns `ChallengeError::EmptyName` if the name is blank,
    /// `ChallengeError::InvalidDateRange` if `start_date > end_date`, and
    /// `ChallengeError::NoParticipants` if no participant is given.
    pub fn new(
        id: ChallengeId,
        name: impl Into<String>,
        start_date: NaiveDate,
        end_date: NaiveDate,
        habits: impl IntoIterator<Item = HabitId>,
        participants: impl IntoIterator<Item = UserId>,
    ) -> Result<Self, ChallengeError> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(ChallengeError::EmptyName);
        }
        if start_date > end_date {
            return Err(ChallengeError::InvalidDateRange {
                start: start_date,
                end: end_date,
            });
        }
        let participants: BTreeSet<UserId> = participants.into_iter().collect();
        if participants.is_empty() {
            return Err(ChallengeError::NoParticipants);
        }

        Ok(Self {
            id,
            name: trimmed.to_owned(),
            start_date,
            end_date,
            habits: habits.into_iter().collect(),
            participants,
            before_photo: None,
            after_photo: None,
            after_photo_skipped: false,
        })
    }

    #[must_use]
    pub fn with_before_photo(mut self, media: Option<MediaRef>) -> Self {
        self.before_photo = media;
        self
    }

    #[must_use]
    pub fn with_after_photo(mut self, media: Option<MediaRef>) -> Self {
        self.after_photo = media;
        self
    }

    #[must_use]
    pub fn with_after_photo_skipped(mut self, skipped: bool) -> Self {
        self.after_photo_skipped = skipped;
        self
    }

    /// Returns a copy with the given photo slot filled.
    #[must_use]
    pub fn with_photo(self, slot: PhotoSlot, media: MediaRef) -> Self {
        match slot {
            PhotoSlot::Before => self.with_before_photo(Some(media)),
            PhotoSlot::After => self.with_after_photo(Some(media)),
        }
    }

    // Accessors

    #[must_use]
    pub fn id(&self) -> &ChallengeId {
        &self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    #[must_use]
    pub fn end_date(&self) -> NaiveDate {
        self.end_date
    }

    #[must_use]
    pub fn habits(&self) -> &BTreeSet<HabitId> {
        &self.habits
    }

    #[must_use]
    pub fn participants(&self) -> &BTreeSet<UserId> {
        &self.participants
    }

    #[must_use]
    pub fn before_photo(&self) -> Option<&MediaRef> {
        self.before_photo.as_ref()
    }

    #[must_use]
    pub fn after_photo(&self) -> Option<&MediaRef> {
        self.after_photo.as_ref()
    }

    #[must_use]
    pub fn photo(&self, slot: PhotoSlot) -> Option<&MediaRef> {
        match slot {
            PhotoSlot::Before => self.before_photo(),
            PhotoSlot::After => self.after_photo(),
        }
    }

    #[must_use]
    pub fn after_photo_skipped(&self) -> bool {
        self.after_photo_skipped
    }

    // Lifecycle helpers

    /// True while no before photo has been captured.
    #[must_use]
    pub fn awaiting_before_photo(&self) -> bool {
        self.before_photo.is_none()
    }

    /// True while the after photo is neither captured nor skipped.
    #[must_use]
    pub fn awaiting_after_photo(&self) -> bool {
        self.after_photo.is_none() && !self.after_photo_skipped
    }

    /// Whether `date` falls inside the inclusive `[start_date, end_date]` window.
    #[must_use]
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }

    /// Whether the active window is over as of `date`.
    #[must_use]
    pub fn has_ended_by(&self, date: NaiveDate) -> bool {
        self.end_date < date
    }
}

#[derive(Deserialize)]
struct RawChallenge {
    id: ChallengeId,
    name: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
    #[serde(default)]
    habits: Vec<HabitId>,
    participants: Vec<UserId>,
    #[serde(default)]
    before_photo: Option<MediaRef>,
    #[serde(default)]
    after_photo: Option<MediaRef>,
    #[serde(default)]
    after_photo_skipped: bool,
}

impl TryFrom<RawChallenge> for ChallengeRecord {
    type Error = ChallengeError;

    fn try_from(raw: RawChallenge) -> Result<Self, Self::Error> {
        Ok(ChallengeRecord::new(
            raw.id,
            raw.name,
            raw.start_date,
            raw.end_date,
            raw.habits,
            raw.participants,
        )?
        .with_before_photo(raw.before_photo)
        .with_after_photo(raw.after_photo)
        .with_after_photo_skipped(raw.after_photo_skipped))
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
