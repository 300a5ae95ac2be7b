mod challenge;
mod completed;
mod ids;

pub use ids::{ChallengeId, HabitId, MediaRef, ParseIdError, UserId};

pub use challenge::{ChallengeError, ChallengeRecord, PhotoSlot};
pub use completed::CompletedChallengeRecord;
