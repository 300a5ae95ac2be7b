use std::sync::Arc;

use async_trait::async_trait;
use habit_core::model::{ChallengeId, MediaRef, PhotoSlot};
use storage::gateway::{ChallengeGateway, PhotoStore, PhotoUpload};
use thiserror::Error;

use crate::error::PhotoCaptureError;
use crate::tracker::CompletedChallengeTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

/// Failure reported by the platform picker itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PickerError {
    #[error("media picker unavailable: {0}")]
    Unavailable(String),
}

/// Platform media capture/selection capability.
#[async_trait]
pub trait MediaPicker: Send + Sync {
    /// Ask for (or confirm) access to the camera/photo library.
    async fn request_permission(&self) -> PermissionStatus;

    /// Let the user pick or take a photo. `Ok(None)` means they cancelled.
    ///
    /// # Errors
    ///
    /// Returns `PickerError` if the picker cannot be shown.
    async fn pick_image(&self) -> Result<Option<PhotoUpload>, PickerError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Stored(MediaRef),
    Cancelled,
}

/// Captures a verification photo, uploads it and attaches it to a challenge.
#[derive(Clone)]
pub struct PhotoCaptureService {
    picker: Arc<dyn MediaPicker>,
    photos: Arc<dyn PhotoStore>,
    gateway: Arc<dyn ChallengeGateway>,
    tracker: Option<Arc<CompletedChallengeTracker>>,
}

impl PhotoCaptureService {
    #[must_use]
    pub fn new(
        picker: Arc<dyn MediaPicker>,
        photos: Arc<dyn PhotoStore>,
        gateway: Arc<dyn ChallengeGateway>,
    ) -> Self {
        Self {
            picker,
            photos,
            gateway,
            tracker: None,
        }
    }

    /// Refresh this tracker after an after photo is stored, since that
    /// resolves the completion server-side.
    #[must_use]
    pub fn with_tracker(mut self, tracker: Arc<CompletedChallengeTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Run the whole capture flow for one photo slot.
    ///
    /// # Errors
    ///
    /// Returns `PhotoCaptureError::PermissionDenied` before the picker is
    /// shown if access is refused, `PhotoCaptureError::InvalidImage` for
    /// empty or non-image payloads, and `PhotoCaptureError::Gateway` if the
    /// upload or the challenge update fails.
    pub async fn capture(
        &self,
        challenge_id: &ChallengeId,
        slot: PhotoSlot,
    ) -> Result<CaptureOutcome, PhotoCaptureError> {
        if self.picker.request_permission().await == PermissionStatus::Denied {
            tracing::info!(challenge_id = %challenge_id, %slot, "photo permission denied");
            return Err(PhotoCaptureError::PermissionDenied);
        }

        let Some(image) = self.picker.pick_image().await? else {
            tracing::debug!(challenge_id = %challenge_id, %slot, "photo capture cancelled");
            return Ok(CaptureOutcome::Cancelled);
        };
        validate_image(&image)?;

        let media = self
            .photos
            .upload_photo(challenge_id, slot, &image)
            .await?;
        self.gateway
            .record_photo(challenge_id, slot, &media)
            .await?;
        tracing::info!(challenge_id = %challenge_id, %slot, media = %media, "photo stored");

        if let (PhotoSlot::After, Some(tracker)) = (slot, &self.tracker) {
            tracker.refresh().await;
        }

        Ok(CaptureOutcome::Stored(media))
    }
}

fn validate_image(image: &PhotoUpload) -> Result<(), PhotoCaptureError> {
    if image.bytes.is_empty() {
        return Err(PhotoCaptureError::InvalidImage("image is empty"));
    }
    if !image.content_type.starts_with("image/") {
        return Err(PhotoCaptureError::InvalidImage("content type is not an image"));
    }
    Ok(())
}
