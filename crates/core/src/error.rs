use thiserror::Error;

use crate::model::{ChallengeError, ParseIdError};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Challenge(#[from] ChallengeError),
    #[error(transparent)]
    ParseId(#[from] ParseIdError),
}
