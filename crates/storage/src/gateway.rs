use async_trait::async_trait;
use habit_core::model::{
    ChallengeId, ChallengeRecord, CompletedChallengeRecord, MediaRef, PhotoSlot,
};
use habit_core::Clock;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by challenge gateways.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GatewayError {
    /// Transport failure; retry by calling again.
    #[error("network error: {0}")]
    Network(String),

    /// The session is missing or expired; the user must sign in again.
    #[error("authentication error: {0}")]
    Auth(String),

    #[error("not found")]
    NotFound,

    #[error("serialization error: {0}")]
    Serialization(String),

    /// Local persistence failure (`SQLite` backend).
    #[error("storage error: {0}")]
    Storage(String),
}

impl GatewayError {
    /// Whether re-issuing the same request may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Network(_) | GatewayError::Storage(_))
    }
}

/// Image bytes ready to be uploaded as a verification photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoUpload {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl PhotoUpload {
    #[must_use]
    pub fn new(content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            content_type: content_type.into(),
            bytes,
        }
    }

    /// File extension derived from the content type, `bin` when unknown.
    #[must_use]
    pub fn extension(&self) -> &str {
        match self.content_type.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/png" => "png",
            "image/heic" => "heic",
            "image/webp" => "webp",
            _ => "bin",
        }
    }
}

/// Request/response contract of the backend that owns challenge data.
///
/// The backend is the source of truth: it decides which challenges are
/// completed and whether a completion was already displayed.
#[async_trait]
pub trait ChallengeGateway: Send + Sync {
    /// Fetch every challenge the signed-in user participates in.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Network` or `GatewayError::Auth` on transport
    /// or session failure.
    async fn fetch_challenges(&self) -> Result<Vec<ChallengeRecord>, GatewayError>;

    /// Fetch completed challenges that still need the user's attention.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Network` or `GatewayError::Auth` on transport
    /// or session failure.
    async fn fetch_completed_challenges(
        &self,
    ) -> Result<Vec<CompletedChallengeRecord>, GatewayError>;

    /// Resolve a completed challenge without an after photo.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::NotFound` if the id is unknown, or
    /// `GatewayError::Network`/`GatewayError::Auth` otherwise.
    async fn skip_after_photo(&self, id: &ChallengeId) -> Result<(), GatewayError>;

    /// Attach an uploaded photo to a challenge slot.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::NotFound` if the id is unknown, or
    /// `GatewayError::Network`/`GatewayError::Auth` otherwise.
    async fn record_photo(
        &self,
        id: &ChallengeId,
        slot: PhotoSlot,
        media: &MediaRef,
    ) -> Result<(), GatewayError>;
}

/// Object storage for verification photos.
#[async_trait]
pub trait PhotoStore: Send + Sync {
    /// Upload photo bytes and return the reference to store on the challenge.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError` if the upload is rejected or fails in transit.
    async fn upload_photo(
        &self,
        id: &ChallengeId,
        slot: PhotoSlot,
        photo: &PhotoUpload,
    ) -> Result<MediaRef, GatewayError>;
}

/// Storage key layout shared by the local gateways.
pub(crate) fn photo_key(id: &ChallengeId, slot: PhotoSlot, seq: u64, photo: &PhotoUpload) -> String {
    format!("challenges/{id}/{slot}-{seq}.{}", photo.extension())
}

/// Gateway operations that can be made to fail in `InMemoryGateway`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOp {
    FetchChallenges,
    FetchCompleted,
    SkipAfterPhoto,
    RecordPhoto,
    UploadPhoto,
}

#[derive(Debug, Clone)]
struct StoredChallenge {
    record: ChallengeRecord,
    was_displayed: bool,
}

#[derive(Default)]
struct InMemoryState {
    challenges: BTreeMap<ChallengeId, StoredChallenge>,
    media: HashMap<MediaRef, PhotoUpload>,
    failures: HashMap<GatewayOp, VecDeque<GatewayError>>,
    media_seq: u64,
}

/// Simple in-memory gateway for testing and prototyping.
///
/// A challenge is reported as completed once its end date is before the
/// clock's date and its after photo is still outstanding.
#[derive(Clone, Default)]
pub struct InMemoryGateway {
    clock: Clock,
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryGateway {
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            state: Arc::new(Mutex::new(InMemoryState::default())),
        }
    }

    /// Insert or replace a challenge, keeping its display flag if it exists.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Storage` if the state lock is poisoned.
    pub fn upsert_challenge(&self, record: ChallengeRecord) -> Result<(), GatewayError> {
        let mut guard = self.lock()?;
        let was_displayed = guard
            .challenges
            .get(record.id())
            .is_some_and(|c| c.was_displayed);
        guard.challenges.insert(
            record.id().clone(),
            StoredChallenge {
                record,
                was_displayed,
            },
        );
        Ok(())
    }

    /// Server-side acknowledgement that a completion summary was shown.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::NotFound` if the challenge does not exist.
    pub fn mark_displayed(&self, id: &ChallengeId) -> Result<(), GatewayError> {
        let mut guard = self.lock()?;
        let stored = guard
            .challenges
            .get_mut(id)
            .ok_or(GatewayError::NotFound)?;
        stored.was_displayed = true;
        Ok(())
    }

    /// Make the next call of `op` fail with `error`. Failures queue up.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Storage` if the state lock is poisoned.
    pub fn fail_next(&self, op: GatewayOp, error: GatewayError) -> Result<(), GatewayError> {
        let mut guard = self.lock()?;
        guard.failures.entry(op).or_default().push_back(error);
        Ok(())
    }

    /// Fetch uploaded photo bytes by reference.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::NotFound` if nothing was uploaded under `media`.
    pub fn photo(&self, media: &MediaRef) -> Result<PhotoUpload, GatewayError> {
        let guard = self.lock()?;
        guard.media.get(media).cloned().ok_or(GatewayError::NotFound)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, InMemoryState>, GatewayError> {
        self.state
            .lock()
            .map_err(|e| GatewayError::Storage(e.to_string()))
    }

    fn take_failure(state: &mut InMemoryState, op: GatewayOp) -> Result<(), GatewayError> {
        match state.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ChallengeGateway for InMemoryGateway {
    async fn fetch_challenges(&self) -> Result<Vec<ChallengeRecord>, GatewayError> {
        let mut guard = self.lock()?;
        Self::take_failure(&mut guard, GatewayOp::FetchChallenges)?;
        Ok(guard
            .challenges
            .values()
            .map(|c| c.record.clone())
            .collect())
    }

    async fn fetch_completed_challenges(
        &self,
    ) -> Result<Vec<CompletedChallengeRecord>, GatewayError> {
        let mut guard = self.lock()?;
        Self::take_failure(&mut guard, GatewayOp::FetchCompleted)?;
        let today = self.clock.today();
        Ok(guard
            .challenges
            .values()
            .filter(|c| c.record.has_ended_by(today) && c.record.awaiting_after_photo())
            .map(|c| CompletedChallengeRecord::new(c.record.clone(), c.was_displayed))
            .collect())
    }

    async fn skip_after_photo(&self, id: &ChallengeId) -> Result<(), GatewayError> {
        let mut guard = self.lock()?;
        Self::take_failure(&mut guard, GatewayOp::SkipAfterPhoto)?;
        let stored = guard
            .challenges
            .get_mut(id)
            .ok_or(GatewayError::NotFound)?;
        stored.record = stored.record.clone().with_after_photo_skipped(true);
        stored.was_displayed = true;
        Ok(())
    }

    async fn record_photo(
        &self,
        id: &ChallengeId,
        slot: PhotoSlot,
        media: &MediaRef,
    ) -> Result<(), GatewayError> {
        let mut guard = self.lock()?;
        Self::take_failure(&mut guard, GatewayOp::RecordPhoto)?;
        let stored = guard
            .challenges
            .get_mut(id)
            .ok_or(GatewayError::NotFound)?;
        stored.record = stored.record.clone().with_photo(slot, media.clone());
        if slot == PhotoSlot::After {
            stored.was_displayed = true;
        }
        Ok(())
    }
}

#[async_trait]
impl PhotoStore for InMemoryGateway {
    async fn upload_photo(
        &self,
        id: &ChallengeId,
        slot: PhotoSlot,
        photo: &PhotoUpload,
    ) -> Result<MediaRef, GatewayError> {
        let mut guard = self.lock()?;
        Self::take_failure(&mut guard, GatewayOp::UploadPhoto)?;
        if !guard.challenges.contains_key(id) {
            return Err(GatewayError::NotFound);
        }
        guard.media_seq += 1;
        let key = photo_key(id, slot, guard.media_seq, photo);
        let media = MediaRef::new(key).map_err(|e| GatewayError::Serialization(e.to_string()))?;
        guard.media.insert(media.clone(), photo.clone());
        Ok(media)
    }
}
