use serde::{Deserialize, Serialize};

use crate::model::challenge::ChallengeRecord;
use crate::model::ids::ChallengeId;

/// A challenge whose active window is over, as reported by the backend.
///
/// `was_displayed` is server truth: it flips to `true` once the completion
/// summary has been shown on any of the user's devices. The client never
/// writes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedChallengeRecord {
    #[serde(flatten)]
    challenge: ChallengeRecord,
    #[serde(default)]
    was_displayed: bool,
}

impl CompletedChallengeRecord {
    #[must_use]
    pub fn new(challenge: ChallengeRecord, was_displayed: bool) -> Self {
        Self {
            challenge,
            was_displayed,
        }
    }

    #[must_use]
    pub fn id(&self) -> &ChallengeId {
        self.challenge.id()
    }

    #[must_use]
    pub fn challenge(&self) -> &ChallengeRecord {
        &self.challenge
    }

    #[must_use]
    pub fn into_challenge(self) -> ChallengeRecord {
        self.challenge
    }

    #[must_use]
    pub fn was_displayed(&self) -> bool {
        self.was_displayed
    }
}
