use std::sync::{Arc, PoisonError, RwLock};

use habit_core::ChallengeLookup;
use habit_core::model::ChallengeRecord;
use storage::gateway::ChallengeGateway;

use crate::error::ChallengeStoreError;

/// Owned, injectable holder of the user's challenge collection.
///
/// Readers take a `ChallengeLookup` snapshot; a reload swaps the snapshot
/// as a whole, so a lookup obtained earlier keeps answering consistently.
pub struct ChallengeStore {
    gateway: Arc<dyn ChallengeGateway>,
    snapshot: RwLock<Arc<ChallengeLookup>>,
}

impl ChallengeStore {
    #[must_use]
    pub fn new(gateway: Arc<dyn ChallengeGateway>) -> Self {
        Self {
            gateway,
            snapshot: RwLock::new(Arc::new(ChallengeLookup::default())),
        }
    }

    /// Fetch all challenges and replace the snapshot.
    ///
    /// Returns the number of challenges now held.
    ///
    /// # Errors
    ///
    /// Returns `ChallengeStoreError::Gateway` if the fetch fails; the previous
    /// snapshot stays in place.
    pub async fn reload(&self) -> Result<usize, ChallengeStoreError> {
        let challenges = self.gateway.fetch_challenges().await?;
        let lookup = Arc::new(ChallengeLookup::new(challenges));
        let count = lookup.len();
        *self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = lookup;
        tracing::debug!(count, "challenge store reloaded");
        Ok(count)
    }

    /// Current snapshot.
    #[must_use]
    pub fn lookup(&self) -> Arc<ChallengeLookup> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Convenience lookup against the current snapshot.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<ChallengeRecord> {
        self.lookup().get_by_id(id).cloned()
    }
}
