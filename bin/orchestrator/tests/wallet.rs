//! Wallet changes invalidate adapters and reset in-flight actions.


use action::ActionError;
use adapter::{ActionKind, AdapterContext, AdapterError, Capability};
use alloy_primitives::Address;
use setup::{wait_for_status, Harness, MockCapability, ACTION, CHAIN_ID, CONTRACT_KIND, PROTOCOL};
use std::sync::Arc;
use store::{ActionKey, ActionStatus};
use tokio::sync::Notify;
use wallet::{WalletError, WalletEvent};

fn harness() -> Harness {
    let stake = Arc::new(MockCapability::new("0xabc"));
    Harness::new(vec![(ActionKind::Stake, stake as Arc<dyn Capability>)])
}

#[tokio::test]
async fn test_account_change_rebuilds_handle() {
    let harness = harness();
    let contract = Address::repeat_byte(0x22);
    let before = AdapterContext::new(harness.wallet_ref(), CHAIN_ID, contract);

    let first = harness
        .loader
        .resolve(PROTOCOL, CONTRACT_KIND, ACTION, &before)
        .await
        .unwrap();
    let again = harness
        .loader
        .resolve(PROTOCOL, CONTRACT_KIND, ACTION, &before)
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&first, &again));

    harness
        .wallet
        .handle(WalletEvent::AccountsChanged(vec![Address::repeat_byte(0x33)]));
    assert_eq!(harness.loader.cached(), 0);

    let after = AdapterContext::new(harness.wallet_ref(), CHAIN_ID, contract);
    let rebuilt = harness
        .loader
        .resolve(PROTOCOL, CONTRACT_KIND, ACTION, &after)
        .await
        .unwrap();
    assert!(!Arc::ptr_eq(&first, &rebuilt));

    let stale = harness
        .loader
        .resolve(PROTOCOL, CONTRACT_KIND, ACTION, &before)
        .await
        .unwrap_err();
    assert_eq!(stale, AdapterError::WalletChanged);
}

#[tokio::test]
async fn test_wallet_change_resets_in_flight_action() {
    let gate = Arc::new(Notify::new());
    let stake = Arc::new(MockCapability::new("0xabc").gated(Arc::clone(&gate)));
    let harness = Harness::new(vec![(ActionKind::Stake, stake as Arc<dyn Capability>)]);
    let key = ActionKey::new("contract-1", ActionKind::Stake);
    let mut statuses = harness.orchestrator.bus().subscribe(&key);

    let orchestrator = Arc::clone(&harness.orchestrator);
    let request = harness.request(ActionKind::Stake, "contract-1");
    let running = tokio::spawn(async move { orchestrator.execute(request).await });
    wait_for_status(&mut statuses, ActionStatus::Confirming).await;

    harness
        .wallet
        .handle(WalletEvent::AccountsChanged(vec![Address::repeat_byte(0x33)]));
    assert_eq!(harness.orchestrator.status(&key), ActionStatus::Idle);

    gate.notify_one();
    let err = running.await.unwrap().unwrap_err();
    assert!(err.is_superseded());
    assert_eq!(harness.orchestrator.status(&key), ActionStatus::Idle);
}

#[tokio::test]
async fn test_wrong_network_fails() {
    let harness = harness();
    let key = ActionKey::new("contract-1", ActionKind::Stake);

    harness.wallet.handle(WalletEvent::ChainChanged(56));
    let err = harness
        .orchestrator
        .execute(harness.request_on(ActionKind::Stake, "contract-1", CHAIN_ID))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ActionError::Wallet(WalletError::WrongNetwork {
            expected: CHAIN_ID,
            actual: 56
        })
    );
    assert_eq!(
        harness.orchestrator.status(&key),
        ActionStatus::Failed(format!("Switch your wallet to chain {CHAIN_ID}"))
    );
}

#[tokio::test]
async fn test_disconnected_wallet_fails() {
    let harness = harness();
    let request = harness.request(ActionKind::Stake, "contract-1");

    harness.wallet.disconnect();
    let err = harness.orchestrator.execute(request).await.unwrap_err();

    assert_eq!(err, ActionError::Wallet(WalletError::NotConnected));
}

#[tokio::test]
async fn test_request_from_previous_session_fails() {
    let harness = harness();
    let request = harness.request(ActionKind::Stake, "contract-1");

    harness
        .wallet
        .handle(WalletEvent::AccountsChanged(vec![Address::repeat_byte(0x33)]));
    let err = harness.orchestrator.execute(request).await.unwrap_err();

    assert_eq!(err, ActionError::Adapter(AdapterError::WalletChanged));
}
