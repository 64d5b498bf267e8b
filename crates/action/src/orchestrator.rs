use crate::{ActionError, ActionRequest, RemoteSync};
use adapter::{AdapterContext, AdapterError, AdapterLoader, Precondition, Receipt};
use std::{sync::Arc, time::Duration};
use store::{ActionKey, ActionStatus, Notice, Notices, StatusBus, StoreError, Ticket};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use wallet::{WalletChange, WalletContext, WalletObserver, WalletRef};

/// A confirmed action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub key: ActionKey,
    pub receipt: Receipt,
}

pub struct Orchestrator {
    wallet: Arc<WalletContext>,
    loader: Arc<AdapterLoader>,
    bus: StatusBus,
    notices: Notices,
    notifier: Option<RemoteSync>,
    // Sends go through the one wallet connection, one at a time.
    submit: Mutex<()>,
}

impl Orchestrator {
    /// Create an orchestrator. Wallet changes reset every action status.
    pub fn new(
        wallet: Arc<WalletContext>,
        loader: Arc<AdapterLoader>,
        bus: StatusBus,
        notices: Notices,
        notifier: Option<RemoteSync>,
    ) -> Arc<Self> {
        let orchestrator = Arc::new(Self {
            wallet: Arc::clone(&wallet),
            loader,
            bus,
            notices,
            notifier,
            submit: Mutex::new(()),
        });
        wallet.observe(&orchestrator);
        orchestrator
    }

    pub const fn bus(&self) -> &StatusBus {
        &self.bus
    }

    pub const fn notices(&self) -> &Notices {
        &self.notices
    }

    pub fn status(&self, key: &ActionKey) -> ActionStatus {
        self.bus.status(key)
    }

    /// Wait up to `timeout` for the rescan requests still in flight.
    pub async fn drain_sync(&self, timeout: Duration) -> usize {
        match &self.notifier {
            Some(notifier) => notifier.drain(timeout).await,
            None => 0,
        }
    }

    /// Return `key` to `Idle`. A result arriving later is discarded.
    pub fn reset(&self, key: &ActionKey) {
        self.bus.reset(key);
    }

    /// Run an action to settlement.
    ///
    /// Errors are also reported as a `Failed` status and an error notice,
    /// except `AlreadyInProgress` (the running action is left alone) and
    /// results discarded after a reset.
    pub async fn execute(&self, request: ActionRequest) -> Result<Settlement, ActionError> {
        let key = request.key();
        let ticket = self.bus.begin(&key).inspect_err(|_| {
            debug!(%key, "Action already in progress");
        })?;

        match self.run(&ticket, request).await {
            Ok(settlement) => Ok(settlement),
            Err(err) => {
                self.fail(&ticket, &err);
                Err(err)
            }
        }
    }

    async fn run(&self, ticket: &Ticket, request: ActionRequest) -> Result<Settlement, ActionError> {
        let ActionRequest {
            kind,
            target_id,
            wallet,
            target,
            payload,
            wallet_id,
            patch,
        } = request;
        let key = ticket.key().clone();

        self.check_wallet(&wallet, target.chain_id)?;

        let context = AdapterContext::new(wallet, target.chain_id, target.contract);
        let handle = self
            .loader
            .resolve(&target.protocol, &target.contract_kind, &target.action, &context)
            .await?;
        let capability = handle
            .group(kind)
            .ok_or_else(|| AdapterError::AdapterNotFound {
                protocol: target.protocol.clone(),
                contract_kind: target.contract_kind.clone(),
                action: kind.to_string(),
            })?;

        match capability.can(&payload).await {
            Ok(Precondition::Allowed) => {}
            Ok(Precondition::Denied) => {
                return Err(ActionError::PreconditionFailed(format!("Cannot {kind} now")));
            }
            Ok(Precondition::Rejected(reason)) => {
                return Err(ActionError::PreconditionFailed(reason));
            }
            Err(e) => return Err(ActionError::Infrastructure(format!("{e:#}"))),
        }

        let pending = {
            let _submit = self.submit.lock().await;
            self.ensure_current(ticket)?;
            info!(%key, action = %capability.description(&payload), "Submitting action");
            capability
                .send(&payload)
                .await
                .map_err(|e| ActionError::Transaction(format!("{e:#}")))?
        };

        let tx_hash = pending.tx_hash();
        self.bus.advance(ticket, ActionStatus::Submitted)?;
        self.bus.advance(ticket, ActionStatus::Confirming)?;
        info!(%key, %tx_hash, "Transaction submitted, awaiting confirmation");

        let receipt = pending
            .wait()
            .await
            .map_err(|e| ActionError::Transaction(format!("{e:#}")))?;

        self.bus.advance(ticket, ActionStatus::Settled)?;
        info!(
            %key,
            tx_hash = %receipt.transaction_hash,
            block_number = receipt.block_number,
            "Action settled"
        );

        if let Some(patch) = patch {
            patch(&receipt);
        }
        if let (Some(notifier), Some(wallet_id)) = (&self.notifier, wallet_id) {
            notifier.notify(wallet_id, target_id, receipt.transaction_hash.clone());
        }
        self.notices
            .push(Notice::success(format!("{kind} confirmed: {}", receipt.transaction_hash)));

        Ok(Settlement { key, receipt })
    }

    fn check_wallet(&self, wallet: &WalletRef, chain_id: u64) -> Result<(), ActionError> {
        let current = self.wallet.require(chain_id)?;
        if current.session() != wallet.session() {
            return Err(AdapterError::WalletChanged.into());
        }
        Ok(())
    }

    fn ensure_current(&self, ticket: &Ticket) -> Result<(), ActionError> {
        if !self.bus.is_current(ticket) {
            return Err(StoreError::Superseded(ticket.key().clone()).into());
        }
        Ok(())
    }

    fn fail(&self, ticket: &Ticket, err: &ActionError) {
        let key = ticket.key();
        if err.is_superseded() {
            debug!(%key, "Discarding result of reset action");
            return;
        }

        let message = err.user_message();
        match self.bus.fail(ticket, message.clone()) {
            Ok(()) => {
                warn!(%key, error = %err, "Action failed");
                self.notices.push(Notice::error(message));
            }
            Err(StoreError::Superseded(_)) => {
                debug!(%key, error = %err, "Discarding failure of reset action");
            }
            Err(e) => warn!(%key, error = %err, store_error = %e, "Could not record failure"),
        }
    }
}

impl WalletObserver for Orchestrator {
    fn wallet_changed(&self, change: &WalletChange) {
        debug!(
            account_changed = change.account_changed(),
            chain_changed = change.chain_changed(),
            "Resetting action statuses"
        );
        self.bus.reset_all();
    }
}
