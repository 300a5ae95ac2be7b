use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use habit_core::model::{
    ChallengeId, ChallengeRecord, CompletedChallengeRecord, MediaRef, PhotoSlot, UserId,
};
use services::{CompletedChallengeTracker, TrackerPhase, TrackerState};
use storage::gateway::{ChallengeGateway, GatewayError};
use tokio::sync::oneshot;

type FetchResult = Result<Vec<CompletedChallengeRecord>, GatewayError>;

/// Each fetch waits on the next queued oneshot, so tests decide when and in
/// which order responses arrive.
#[derive(Default)]
struct GatedGateway {
    gates: Mutex<VecDeque<oneshot::Receiver<FetchResult>>>,
    started: Mutex<usize>,
}

impl GatedGateway {
    fn gate(&self) -> oneshot::Sender<FetchResult> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().unwrap().push_back(rx);
        tx
    }

    fn started(&self) -> usize {
        *self.started.lock().unwrap()
    }
}

#[async_trait]
impl ChallengeGateway for GatedGateway {
    async fn fetch_challenges(&self) -> Result<Vec<ChallengeRecord>, GatewayError> {
        Ok(Vec::new())
    }

    async fn fetch_completed_challenges(&self) -> FetchResult {
        let gate = {
            *self.started.lock().unwrap() += 1;
            self.gates.lock().unwrap().pop_front()
        };
        match gate {
            Some(rx) => rx
                .await
                .unwrap_or_else(|_| Err(GatewayError::Network("gate dropped".into()))),
            None => Ok(Vec::new()),
        }
    }

    async fn skip_after_photo(&self, _id: &ChallengeId) -> Result<(), GatewayError> {
        Ok(())
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

fn completed(id: &str) -> CompletedChallengeRecord {
    let challenge = ChallengeRecord::new(
        ChallengeId::new(id).unwrap(),
        format!("Challenge {id}"),
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
        [],
        [UserId::new("u1").unwrap()],
    )
    .unwrap();
    CompletedChallengeRecord::new(challenge, false)
}

fn ids(state: &TrackerState) -> Vec<String> {
    state
        .completed()
        .iter()
        .map(|c| c.id().to_string())
        .collect()
}

async fn yield_until(mut done: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if done() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

fn setup() -> (Arc<GatedGateway>, CompletedChallengeTracker) {
    let gateway = Arc::new(GatedGateway::default());
    let tracker = CompletedChallengeTracker::new(Arc::clone(&gateway) as Arc<dyn ChallengeGateway>);
    (gateway, tracker)
}

#[tokio::test]
async fn later_refresh_wins_when_earlier_one_lands_last() {
    let (gateway, tracker) = setup();
    let first_gate = gateway.gate();
    let second_gate = gateway.gate();

    let driver = async {
        yield_until(|| gateway.started() == 2).await;
        assert!(tracker.state().is_refreshing());
        assert_eq!(tracker.state().phase(), TrackerPhase::Refreshing);

        second_gate.send(Ok(vec![completed("second")])).unwrap();
        yield_until(|| ids(&tracker.state()) == ["second"]).await;
        assert!(!tracker.state().is_refreshing());

        first_gate.send(Ok(vec![completed("first")])).unwrap();
    };

    tokio::join!(tracker.refresh(), tracker.refresh(), driver);

    let state = tracker.state();
    assert_eq!(ids(&state), ["second"]);
    assert!(!state.is_refreshing());
}

#[tokio::test]
async fn early_response_is_shown_until_newer_one_lands() {
    let (gateway, tracker) = setup();
    let first_gate = gateway.gate();
    let second_gate = gateway.gate();

    let driver = async {
        yield_until(|| gateway.started() == 2).await;

        first_gate.send(Ok(vec![completed("first")])).unwrap();
        yield_until(|| ids(&tracker.state()) == ["first"]).await;
        // the newer request is still in flight
        assert!(tracker.state().is_refreshing());

        second_gate.send(Ok(vec![completed("second")])).unwrap();
    };

    tokio::join!(tracker.refresh(), tracker.refresh(), driver);

    assert_eq!(ids(&tracker.state()), ["second"]);
    assert!(!tracker.state().is_refreshing());
}

#[tokio::test]
async fn stale_failure_does_not_clear_newer_refresh_flag() {
    let (gateway, tracker) = setup();
    let first_gate = gateway.gate();
    let second_gate = gateway.gate();

    let driver = async {
        yield_until(|| gateway.started() == 2).await;

        first_gate
            .send(Err(GatewayError::Network("timeout".into())))
            .unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(tracker.state().is_refreshing());

        second_gate.send(Ok(vec![completed("fresh")])).unwrap();
    };

    tokio::join!(tracker.refresh(), tracker.refresh(), driver);

    assert_eq!(ids(&tracker.state()), ["fresh"]);
    assert!(!tracker.state().is_refreshing());
}

#[tokio::test]
async fn abandoned_refresh_clears_its_flag() {
    let (gateway, tracker) = setup();
    let _gate = gateway.gate();

    {
        let refresh = tracker.refresh();
        tokio::pin!(refresh);
        tokio::select! {
            biased;
            () = &mut refresh => panic!("gate was never opened"),
            () = std::future::ready(()) => {}
        }
        assert!(tracker.state().is_refreshing());
    }

    assert!(!tracker.state().is_refreshing());
    assert!(tracker.state().completed().is_empty());
}

#[tokio::test]
async fn result_landing_after_shutdown_is_discarded() {
    let (gateway, tracker) = setup();
    let gate = gateway.gate();

    let refresh = tracker.refresh();
    tokio::pin!(refresh);
    tokio::select! {
        biased;
        () = &mut refresh => panic!("gate was never opened"),
        () = std::future::ready(()) => {}
    }

    tracker.shutdown();
    gate.send(Ok(vec![completed("late")])).unwrap();
    refresh.await;

    let state = tracker.state();
    assert!(state.completed().is_empty());
    assert!(!state.is_refreshing());
    assert!(state.is_shut_down());
}

#[tokio::test]
async fn pre_skip_refresh_cannot_overwrite_after_newer_refresh_failed() {
    let (gateway, tracker) = setup();
    let pre_skip_gate = gateway.gate();
    let follow_up_gate = gateway.gate();
    let c1 = ChallengeId::new("c1").unwrap();

    let driver = async {
        yield_until(|| gateway.started() == 2).await;

        follow_up_gate
            .send(Err(GatewayError::Network("timeout".into())))
            .unwrap();
        yield_until(|| !tracker.state().is_refreshing()).await;
        assert!(tracker.state().completed().is_empty());

        pre_skip_gate.send(Ok(vec![completed("c1")])).unwrap();
    };

    let (_, skipped, ()) = tokio::join!(tracker.refresh(), tracker.skip_after_photo(&c1), driver);
    skipped.unwrap();

    let state = tracker.state();
    assert!(state.completed().is_empty());
    assert!(!state.is_refreshing());
    assert_eq!(state.phase(), TrackerPhase::Idle);
}

#[tokio::test]
async fn abandoned_newer_refresh_still_supersedes_older_response() {
    let (gateway, tracker) = setup();
    let older_gate = gateway.gate();
    let _newer_gate = gateway.gate();

    let older = tracker.refresh();
    tokio::pin!(older);
    tokio::select! {
        biased;
        () = &mut older => panic!("gate was never opened"),
        () = std::future::ready(()) => {}
    }
    {
        let newer = tracker.refresh();
        tokio::pin!(newer);
        tokio::select! {
            biased;
            () = &mut newer => panic!("gate was never opened"),
            () = std::future::ready(()) => {}
        }
    }
    assert_eq!(gateway.started(), 2);

    older_gate.send(Ok(vec![completed("old")])).unwrap();
    older.await;

    assert!(tracker.state().completed().is_empty());
    assert!(!tracker.state().is_refreshing());
}
