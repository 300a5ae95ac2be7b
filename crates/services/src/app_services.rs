use std::sync::Arc;

use storage::gateway::{ChallengeGateway, InMemoryGateway, PhotoStore};
use storage::sqlite::SqliteGateway;

use crate::Clock;
use crate::backend::{BackendConfig, RestGateway};
use crate::challenge_store::ChallengeStore;
use crate::error::AppServicesError;
use crate::photo_service::{MediaPicker, PhotoCaptureService};
use crate::tracker::CompletedChallengeTracker;

/// Assembles app-facing challenge services over one backend.
#[derive(Clone)]
pub struct AppServices {
    gateway: Arc<dyn ChallengeGateway>,
    photos: Arc<dyn PhotoStore>,
    challenges: Arc<ChallengeStore>,
    tracker: Arc<CompletedChallengeTracker>,
}

impl AppServices {
    /// Build services backed by a local `SQLite` database.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if the database cannot be opened or migrated.
    pub async fn new_sqlite(db_url: &str, clock: Clock) -> Result<Self, AppServicesError> {
        let gateway = Arc::new(SqliteGateway::open(db_url, clock).await?);
        Ok(Self::assemble(gateway.clone(), gateway))
    }

    /// Build services against the hosted backend.
    #[must_use]
    pub fn new_remote(config: BackendConfig) -> Self {
        let gateway = Arc::new(RestGateway::new(config));
        Self::assemble(gateway.clone(), gateway)
    }

    /// Build services against the hosted backend configured from the
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError::Config` if required variables are missing.
    pub fn from_env() -> Result<Self, AppServicesError> {
        Ok(Self::new_remote(BackendConfig::from_env()?))
    }

    /// Build services over an in-process gateway.
    #[must_use]
    pub fn in_memory(gateway: InMemoryGateway) -> Self {
        let gateway = Arc::new(gateway);
        Self::assemble(gateway.clone(), gateway)
    }

    fn assemble(gateway: Arc<dyn ChallengeGateway>, photos: Arc<dyn PhotoStore>) -> Self {
        let challenges = Arc::new(ChallengeStore::new(Arc::clone(&gateway)));
        let tracker = Arc::new(CompletedChallengeTracker::new(Arc::clone(&gateway)));
        Self {
            gateway,
            photos,
            challenges,
            tracker,
        }
    }

    /// Load challenges and the completed list once at startup.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError::Store` if the challenge fetch fails. A
    /// failed completed-list refresh is only logged.
    pub async fn warm_up(&self) -> Result<(), AppServicesError> {
        self.challenges.reload().await?;
        self.tracker.refresh().await;
        Ok(())
    }

    #[must_use]
    pub fn gateway(&self) -> Arc<dyn ChallengeGateway> {
        Arc::clone(&self.gateway)
    }

    #[must_use]
    pub fn challenges(&self) -> Arc<ChallengeStore> {
        Arc::clone(&self.challenges)
    }

    #[must_use]
    pub fn tracker(&self) -> Arc<CompletedChallengeTracker> {
        Arc::clone(&self.tracker)
    }

    /// Photo capture wired to this backend and tracker.
    #[must_use]
    pub fn photo_capture(&self, picker: Arc<dyn MediaPicker>) -> PhotoCaptureService {
        PhotoCaptureService::new(picker, Arc::clone(&self.photos), Arc::clone(&self.gateway))
            .with_tracker(Arc::clone(&self.tracker))
    }
}
