//! Actions refused by the adapter's precondition never reach the wallet.


use action::ActionError;
use adapter::{ActionKind, Capability};
use setup::{settle, CanOutcome, Harness, MockCapability};
use std::sync::{Arc, Mutex};
use store::{ActionKey, ActionStatus, NoticeLevel};

fn harness(outcome: CanOutcome) -> (Harness, Arc<MockCapability>) {
    let stake = Arc::new(MockCapability::new("0xabc").with_can(outcome));
    let harness = Harness::new(vec![(ActionKind::Stake, stake.clone() as Arc<dyn Capability>)]);
    (harness, stake)
}

#[tokio::test]
async fn test_rejected_precondition() {
    let (harness, stake) = harness(CanOutcome::Rejected("insufficient balance".to_string()));
    let key = ActionKey::new("contract-1", ActionKind::Stake);
    let mut notices = harness.orchestrator.notices().subscribe();

    let patched = Arc::new(Mutex::new(false));
    let sink = Arc::clone(&patched);
    let request = harness
        .request(ActionKind::Stake, "contract-1")
        .with_patch(move |_| *sink.lock().unwrap() = true);

    let err = harness.orchestrator.execute(request).await.unwrap_err();

    assert_eq!(
        err,
        ActionError::PreconditionFailed("insufficient balance".to_string())
    );
    assert_eq!(
        harness.orchestrator.status(&key),
        ActionStatus::Failed("insufficient balance".to_string())
    );
    assert_eq!(stake.checks(), 1);
    assert_eq!(stake.sends(), 0);
    assert!(!*patched.lock().unwrap());

    let notice = notices.try_recv().unwrap();
    assert_eq!(notice.level, NoticeLevel::Error);
    assert_eq!(notice.message, "insufficient balance");

    settle().await;
    assert!(harness.notifier.calls().is_empty());
}

#[tokio::test]
async fn test_denied_precondition() {
    let (harness, stake) = harness(CanOutcome::Denied);

    let err = harness
        .orchestrator
        .execute(harness.request(ActionKind::Stake, "contract-1"))
        .await
        .unwrap_err();

    assert!(matches!(err, ActionError::PreconditionFailed(_)));
    assert_eq!(stake.sends(), 0);
}

#[tokio::test]
async fn test_failing_check_is_infrastructure_error() {
    let (harness, stake) = harness(CanOutcome::Error("rpc timeout".to_string()));
    let key = ActionKey::new("contract-1", ActionKind::Stake);

    let err = harness
        .orchestrator
        .execute(harness.request(ActionKind::Stake, "contract-1"))
        .await
        .unwrap_err();

    assert_eq!(err, ActionError::Infrastructure("rpc timeout".to_string()));
    assert_eq!(
        harness.orchestrator.status(&key),
        ActionStatus::Failed("rpc timeout".to_string())
    );
    assert_eq!(stake.sends(), 0);
}

#[tokio::test]
async fn test_failed_action_can_be_retried() {
    let (harness, stake) = harness(CanOutcome::Denied);
    let key = ActionKey::new("contract-1", ActionKind::Stake);

    for _ in 0..2 {
        let _ = harness
            .orchestrator
            .execute(harness.request(ActionKind::Stake, "contract-1"))
            .await;
    }

    assert_eq!(stake.checks(), 2);
    assert!(matches!(harness.orchestrator.status(&key), ActionStatus::Failed(_)));

    harness.orchestrator.reset(&key);
    assert_eq!(harness.orchestrator.status(&key), ActionStatus::Idle);
}
