//! Client-side cache of completed challenges and its refresh lifecycle.
//!
//! All state lives inside a `watch` channel. Every transition is a single
//! `send_modify`/`send_if_modified` call, so checking a request token and
//! writing the list happen atomically and subscribers see each transition.

use std::sync::Arc;

use habit_core::model::{ChallengeId, CompletedChallengeRecord};
use storage::gateway::{ChallengeGateway, GatewayError};
use tokio::sync::watch;

/// Coarse lifecycle state of the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerPhase {
    Idle,
    Refreshing,
    SkippingPhoto(ChallengeId),
}

/// Snapshot observed by consumers.
#[derive(Debug, Clone, Default)]
pub struct TrackerState {
    completed: Arc<Vec<CompletedChallengeRecord>>,
    refreshing: bool,
    skipping: Vec<ChallengeId>,
    issued: u64,
    resolved: u64,
    closed: bool,
}

impl TrackerState {
    /// The cached list exactly as last returned by the gateway.
    #[must_use]
    pub fn completed(&self) -> &[CompletedChallengeRecord] {
        &self.completed
    }

    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        self.refreshing
    }

    /// A pending skip takes precedence over a running refresh.
    #[must_use]
    pub fn phase(&self) -> TrackerPhase {
        if let Some(id) = self.skipping.last() {
            TrackerPhase::SkippingPhoto(id.clone())
        } else if self.refreshing {
            TrackerPhase::Refreshing
        } else {
            TrackerPhase::Idle
        }
    }

    /// Completions the backend has not marked as displayed yet.
    pub fn undisplayed(&self) -> impl Iterator<Item = &CompletedChallengeRecord> {
        self.completed.iter().filter(|c| !c.was_displayed())
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.closed
    }
}

/// Owns the completed-challenge list and the skip-after-photo workflow.
///
/// Never decides completion or display state itself; both come from the
/// gateway on every refresh.
pub struct CompletedChallengeTracker {
    gateway: Arc<dyn ChallengeGateway>,
    state: watch::Sender<TrackerState>,
}

impl CompletedChallengeTracker {
    #[must_use]
    pub fn new(gateway: Arc<dyn ChallengeGateway>) -> Self {
        let (state, _) = watch::channel(TrackerState::default());
        Self { gateway, state }
    }

    /// Current snapshot.
    #[must_use]
    pub fn state(&self) -> TrackerState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TrackerState> {
        self.state.subscribe()
    }

    /// Re-fetch completed challenges and replace the cached list.
    ///
    /// Failures are logged and leave the cached list untouched. When calls
    /// overlap, a response is dropped if a later-issued request has already
    /// settled (succeeded, failed or been abandoned), and only the latest-issued request clears `refreshing`.
    pub async fn refresh(&self) {
        let Some(token) = self.begin_refresh() else {
            tracing::debug!("refresh ignored: tracker shut down");
            return;
        };
        tracing::debug!(token, "refreshing completed challenges");

        let mut in_flight = InFlightRefresh {
            tracker: self,
            token,
            settled: false,
        };
        let result = self.gateway.fetch_completed_challenges().await;
        in_flight.settle(Some(result));
    }

    /// Resolve a completed challenge without an after photo, then refresh.
    ///
    /// The id is not checked against the cached list; the gateway decides.
    /// Returns only after the follow-up refresh has settled.
    ///
    /// # Errors
    ///
    /// Returns the gateway's error unchanged. The cached list and the
    /// `refreshing` flag are left exactly as they were.
    pub async fn skip_after_photo(&self, id: &ChallengeId) -> Result<(), GatewayError> {
        tracing::info!(challenge_id = %id, "skipping after photo");
        let result = {
            let _skipping = SkipInProgress::enter(self, id);
            self.gateway.skip_after_photo(id).await
        };

        match result {
            Ok(()) => {
                self.refresh().await;
                Ok(())
            }
            Err(err) => {
                tracing::warn!(challenge_id = %id, error = %err, "skip after photo failed");
                Err(err)
            }
        }
    }

    /// Detach from the data source. Responses that land afterwards are
    /// discarded and further refreshes do nothing.
    pub fn shutdown(&self) {
        self.state.send_if_modified(|s| {
            if s.closed {
                return false;
            }
            s.closed = true;
            s.refreshing = false;
            true
        });
    }

    fn begin_refresh(&self) -> Option<u64> {
        let mut token = None;
        self.state.send_if_modified(|s| {
            if s.closed {
                return false;
            }
            s.issued += 1;
            token = Some(s.issued);
            s.refreshing = true;
            true
        });
        token
    }

    /// `None` means the request was abandoned before the gateway answered.
    fn finish_refresh(
        &self,
        token: u64,
        result: Option<Result<Vec<CompletedChallengeRecord>, GatewayError>>,
    ) {
        self.state.send_if_modified(|s| {
            if s.closed {
                tracing::debug!(token, "discarding refresh result after shutdown");
                return false;
            }

            let latest = token == s.issued;
            let mut changed = false;
            match result {
                Some(Ok(list)) if token > s.resolved => {
                    tracing::debug!(token, count = list.len(), "applying completed challenges");
                    s.completed = Arc::new(list);
                    changed = true;
                }
                Some(Ok(_)) => {
                    tracing::debug!(token, resolved = s.resolved, "discarding stale refresh result");
                }
                Some(Err(err)) if latest => {
                    tracing::warn!(token, error = %err, "refresh failed; keeping cached list");
                }
                Some(Err(err)) => {
                    tracing::debug!(token, error = %err, "stale refresh failed");
                }
                None => {
                    tracing::debug!(token, "refresh abandoned");
                }
            }
            // Any settled request, failed or abandoned, supersedes older ones.
            s.resolved = s.resolved.max(token);

            if latest && s.refreshing {
                s.refreshing = false;
                changed = true;
            }
            changed
        });
    }
}

/// Settles a refresh token even if the refresh future is dropped mid-fetch.
struct InFlightRefresh<'a> {
    tracker: &'a CompletedChallengeTracker,
    token: u64,
    settled: bool,
}

impl InFlightRefresh<'_> {
    fn settle(&mut self, result: Option<Result<Vec<CompletedChallengeRecord>, GatewayError>>) {
        if !self.settled {
            self.settled = true;
            self.tracker.finish_refresh(self.token, result);
        }
    }
}

impl Drop for InFlightRefresh<'_> {
    fn drop(&mut self) {
        self.settle(None);
    }
}

/// Keeps `id` in the skipping set for the duration of the gateway call.
struct SkipInProgress<'a> {
    tracker: &'a CompletedChallengeTracker,
    id: ChallengeId,
}

impl<'a> SkipInProgress<'a> {
    fn enter(tracker: &'a CompletedChallengeTracker, id: &ChallengeId) -> Self {
        tracker.state.send_modify(|s| s.skipping.push(id.clone()));
        Self {
            tracker,
            id: id.clone(),
        }
    }
}

impl Drop for SkipInProgress<'_> {
    fn drop(&mut self) {
        self.tracker.state.send_modify(|s| {
            if let Some(pos) = s.skipping.iter().position(|id| *id == self.id) {
                s.skipping.remove(pos);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::NaiveDate;
    use habit_core::model::{ChallengeRecord, MediaRef, PhotoSlot, UserId};

    fn completed(id: &str, was_displayed: bool) -> CompletedChallengeRecord {
        let challenge = ChallengeRecord::new(
            ChallengeId::new(id).unwrap(),
            format!("Challenge {id}"),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            [],
            [UserId::new("u1").unwrap()],
        )
        .unwrap();
        CompletedChallengeRecord::new(challenge, was_displayed)
    }

    type FetchResult = Result<Vec<CompletedChallengeRecord>, GatewayError>;

    /// Answers fetches and skips from queues and counts calls.
    #[derive(Default)]
    struct ScriptedGateway {
        fetches: Mutex<VecDeque<FetchResult>>,
        skips: Mutex<VecDeque<Result<(), GatewayError>>>,
        fetch_calls: Mutex<usize>,
    }

    impl ScriptedGateway {
        fn push_fetch(&self, result: FetchResult) {
            self.fetches.lock().unwrap().push_back(result);
        }

        fn push_skip(&self, result: Result<(), GatewayError>) {
            self.skips.lock().unwrap().push_back(result);
        }

        fn fetch_calls(&self) -> usize {
            *self.fetch_calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl ChallengeGateway for ScriptedGateway {
        async fn fetch_challenges(&self) -> Result<Vec<ChallengeRecord>, GatewayError> {
            Ok(Vec::new())
        }

        async fn fetch_completed_challenges(&self) -> FetchResult {
            *self.fetch_calls.lock().unwrap() += 1;
            self.fetches
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn skip_after_photo(&self, _id: &ChallengeId) -> Result<(), GatewayError> {
            self.skips.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }

        async fn record_photo(
            &self,
            _id: &ChallengeId,
            _slot: PhotoSlot,
            _media: &MediaRef,
        ) -> Result<(), GatewayError> {
            Ok(())
        }
    }

    fn tracker_with(gateway: &Arc<ScriptedGateway>) -> CompletedChallengeTracker {
        CompletedChallengeTracker::new(Arc::clone(gateway) as Arc<dyn ChallengeGateway>)
    }

    fn ids(state: &TrackerState) -> Vec<&str> {
        state.completed().iter().map(|c| c.id().as_str()).collect()
    }

    #[tokio::test]
    async fn starts_idle_and_empty() {
        let gateway = Arc::new(ScriptedGateway::default());
        let tracker = tracker_with(&gateway);
        let state = tracker.state();
        assert!(state.completed().is_empty());
        assert!(!state.is_refreshing());
        assert_eq!(state.phase(), TrackerPhase::Idle);
        assert_eq!(gateway.fetch_calls(), 0);
    }

    #[tokio::test]
    async fn refresh_exposes_gateway_response() {
        let gateway = Arc::new(ScriptedGateway::default());
        gateway.push_fetch(Ok(vec![completed("c1", false)]));
        let tracker = tracker_with(&gateway);

        tracker.refresh().await;

        let state = tracker.state();
        assert_eq!(state.completed(), &[completed("c1", false)]);
        assert!(!state.is_refreshing());
    }

    #[tokio::test]
    async fn refresh_replaces_instead_of_merging() {
        let gateway = Arc::new(ScriptedGateway::default());
        gateway.push_fetch(Ok(vec![completed("c1", false), completed("c2", false)]));
        gateway.push_fetch(Ok(vec![completed("c2", true)]));
        let tracker = tracker_with(&gateway);

        tracker.refresh().await;
        tracker.refresh().await;

        let state = tracker.state();
        assert_eq!(ids(&state), vec!["c2"]);
        assert!(state.completed()[0].was_displayed());
    }

    #[tokio::test]
    async fn failed_refresh_keeps_cached_list() {
        let gateway = Arc::new(ScriptedGateway::default());
        gateway.push_fetch(Ok(vec![completed("c1", false)]));
        gateway.push_fetch(Err(GatewayError::Network("offline".into())));
        let tracker = tracker_with(&gateway);

        tracker.refresh().await;
        tracker.refresh().await;

        let state = tracker.state();
        assert_eq!(ids(&state), vec!["c1"]);
        assert!(!state.is_refreshing());
        assert_eq!(state.phase(), TrackerPhase::Idle);
    }

    #[tokio::test]
    async fn skip_success_triggers_exactly_one_refresh() {
        let gateway = Arc::new(ScriptedGateway::default());
        gateway.push_fetch(Ok(vec![completed("c1", false)]));
        gateway.push_fetch(Ok(Vec::new()));
        let tracker = tracker_with(&gateway);
        tracker.refresh().await;
        assert_eq!(gateway.fetch_calls(), 1);

        tracker
            .skip_after_photo(&ChallengeId::new("c1").unwrap())
            .await
            .unwrap();

        assert_eq!(gateway.fetch_calls(), 2);
        let state = tracker.state();
        assert!(state.completed().is_empty());
        assert_eq!(state.phase(), TrackerPhase::Idle);
    }

    #[tokio::test]
    async fn skip_succeeds_even_if_follow_up_refresh_fails() {
        let gateway = Arc::new(ScriptedGateway::default());
        gateway.push_fetch(Ok(vec![completed("c1", false)]));
        gateway.push_fetch(Err(GatewayError::Network("flaky".into())));
        let tracker = tracker_with(&gateway);
        tracker.refresh().await;

        tracker
            .skip_after_photo(&ChallengeId::new("c1").unwrap())
            .await
            .unwrap();

        assert_eq!(ids(&tracker.state()), vec!["c1"]);
        assert!(!tracker.state().is_refreshing());
    }

    #[tokio::test]
    async fn skip_failure_propagates_and_leaves_state_alone() {
        let gateway = Arc::new(ScriptedGateway::default());
        gateway.push_fetch(Ok(vec![completed("c1", false)]));
        gateway.push_skip(Err(GatewayError::NotFound));
        let tracker = tracker_with(&gateway);
        tracker.refresh().await;
        let before = tracker.state();

        let err = tracker
            .skip_after_photo(&ChallengeId::new("missing").unwrap())
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::NotFound));
        let after = tracker.state();
        assert_eq!(after.completed(), before.completed());
        assert_eq!(after.is_refreshing(), before.is_refreshing());
        assert_eq!(after.phase(), TrackerPhase::Idle);
        assert_eq!(gateway.fetch_calls(), 1);
    }

    #[tokio::test]
    async fn auth_error_on_skip_is_not_rewritten() {
        let gateway = Arc::new(ScriptedGateway::default());
        gateway.push_skip(Err(GatewayError::Auth("expired".into())));
        let tracker = tracker_with(&gateway);

        let err = tracker
            .skip_after_photo(&ChallengeId::new("c1").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Auth(ref msg) if msg == "expired"));
    }

    #[tokio::test]
    async fn undisplayed_filters_on_server_flag() {
        let gateway = Arc::new(ScriptedGateway::default());
        gateway.push_fetch(Ok(vec![completed("c1", true), completed("c2", false)]));
        let tracker = tracker_with(&gateway);
        tracker.refresh().await;

        let state = tracker.state();
        let pending: Vec<&str> = state.undisplayed().map(|c| c.id().as_str()).collect();
        assert_eq!(pending, vec!["c2"]);
    }

    #[tokio::test]
    async fn shutdown_stops_refreshing() {
        let gateway = Arc::new(ScriptedGateway::default());
        gateway.push_fetch(Ok(vec![completed("c1", false)]));
        let tracker = tracker_with(&gateway);

        tracker.shutdown();
        tracker.refresh().await;

        assert_eq!(gateway.fetch_calls(), 0);
        assert!(tracker.state().completed().is_empty());
        assert!(tracker.state().is_shut_down());
    }

    #[tokio::test]
    async fn subscribers_see_refresh_transitions() {
        let gateway = Arc::new(ScriptedGateway::default());
        gateway.push_fetch(Ok(vec![completed("c1", false)]));
        let tracker = tracker_with(&gateway);
        let mut rx = tracker.subscribe();
        assert!(!rx.has_changed().unwrap());

        tracker.refresh().await;

        assert!(rx.has_changed().unwrap());
        let seen = rx.borrow_and_update().clone();
        assert_eq!(ids(&seen), vec!["c1"]);
        assert!(!seen.is_refreshing());
    }
}
