//! In-flight actions: re-entrancy, reset and independent keys.


use action::ActionError;
use adapter::{ActionKind, Capability};
use setup::{settle, wait_for_status, Harness, MockCapability};
use std::sync::{Arc, Mutex};
use store::{ActionKey, ActionStatus, StoreError};
use tokio::sync::Notify;

#[tokio::test]
async fn test_second_request_while_in_flight_is_refused() {
    let gate = Arc::new(Notify::new());
    let stake = Arc::new(MockCapability::new("0xabc").gated(Arc::clone(&gate)));
    let harness = Harness::new(vec![(ActionKind::Stake, stake.clone() as Arc<dyn Capability>)]);
    let key = ActionKey::new("contract-1", ActionKind::Stake);
    let mut statuses = harness.orchestrator.bus().subscribe(&key);

    let orchestrator = Arc::clone(&harness.orchestrator);
    let request = harness.request(ActionKind::Stake, "contract-1");
    let first = tokio::spawn(async move { orchestrator.execute(request).await });
    wait_for_status(&mut statuses, ActionStatus::Confirming).await;

    let err = harness
        .orchestrator
        .execute(harness.request(ActionKind::Stake, "contract-1"))
        .await
        .unwrap_err();

    assert_eq!(err, ActionError::Store(StoreError::AlreadyInProgress(key.clone())));
    assert_eq!(harness.orchestrator.status(&key), ActionStatus::Confirming);
    assert_eq!(stake.checks(), 1);
    assert_eq!(stake.sends(), 1);

    gate.notify_one();
    first.await.unwrap().unwrap();
    assert_eq!(harness.orchestrator.status(&key), ActionStatus::Settled);
}

#[tokio::test]
async fn test_reset_discards_late_result() {
    let gate = Arc::new(Notify::new());
    let stake = Arc::new(MockCapability::new("0xabc").gated(Arc::clone(&gate)));
    let harness = Harness::new(vec![(ActionKind::Stake, stake as Arc<dyn Capability>)]);
    let key = ActionKey::new("contract-1", ActionKind::Stake);
    let mut statuses = harness.orchestrator.bus().subscribe(&key);
    let mut notices = harness.orchestrator.notices().subscribe();

    let patched = Arc::new(Mutex::new(false));
    let sink = Arc::clone(&patched);
    let request = harness
        .request(ActionKind::Stake, "contract-1")
        .with_patch(move |_| *sink.lock().unwrap() = true);
    let orchestrator = Arc::clone(&harness.orchestrator);
    let running = tokio::spawn(async move { orchestrator.execute(request).await });
    wait_for_status(&mut statuses, ActionStatus::Confirming).await;

    harness.orchestrator.reset(&key);
    assert_eq!(harness.orchestrator.status(&key), ActionStatus::Idle);

    gate.notify_one();
    let err = running.await.unwrap().unwrap_err();

    assert!(err.is_superseded());
    assert_eq!(harness.orchestrator.status(&key), ActionStatus::Idle);
    assert!(!*patched.lock().unwrap());
    assert!(notices.try_recv().is_err());
    settle().await;
    assert!(harness.notifier.calls().is_empty());
}

#[tokio::test]
async fn test_different_kinds_run_concurrently() {
    let stake_gate = Arc::new(Notify::new());
    let vote_gate = Arc::new(Notify::new());
    let stake = Arc::new(MockCapability::new("0x01").gated(Arc::clone(&stake_gate)));
    let vote = Arc::new(MockCapability::new("0x02").gated(Arc::clone(&vote_gate)));
    let harness = Harness::new(vec![
        (ActionKind::Stake, stake as Arc<dyn Capability>),
        (ActionKind::Vote, vote as Arc<dyn Capability>),
    ]);

    let stake_key = ActionKey::new("contract-1", ActionKind::Stake);
    let vote_key = ActionKey::new("proposal-7", ActionKind::Vote);
    let mut stake_statuses = harness.orchestrator.bus().subscribe(&stake_key);
    let mut vote_statuses = harness.orchestrator.bus().subscribe(&vote_key);

    let orchestrator = Arc::clone(&harness.orchestrator);
    let request = harness.request(ActionKind::Stake, "contract-1");
    let staking = tokio::spawn(async move { orchestrator.execute(request).await });
    let orchestrator = Arc::clone(&harness.orchestrator);
    let request = harness.request(ActionKind::Vote, "proposal-7");
    let voting = tokio::spawn(async move { orchestrator.execute(request).await });

    wait_for_status(&mut stake_statuses, ActionStatus::Confirming).await;
    wait_for_status(&mut vote_statuses, ActionStatus::Confirming).await;

    // Settling the vote leaves the stake untouched.
    vote_gate.notify_one();
    voting.await.unwrap().unwrap();
    assert_eq!(harness.orchestrator.status(&vote_key), ActionStatus::Settled);
    assert_eq!(harness.orchestrator.status(&stake_key), ActionStatus::Confirming);

    stake_gate.notify_one();
    staking.await.unwrap().unwrap();
    assert_eq!(harness.orchestrator.status(&stake_key), ActionStatus::Settled);

    let mut calls = harness.notifier.wait_for(2).await;
    calls.sort();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].1, "contract-1");
    assert_eq!(calls[1].1, "proposal-7");
}
