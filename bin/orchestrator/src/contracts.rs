//! Staking contract list backed by the API.

use async_trait::async_trait;
use client::{
    Api, ClientError, Contract, ContractListParams, Pagination, Sort, StopLoss, SubscriptionClient,
    WalletMetricUpdated,
};
use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use store::{ListSource, ListStore, Notice, Notices, Page};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{info, warn};
use wallet::{WalletChange, WalletObserver};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractFilter {
    pub protocol_id: String,
    pub hidden: Option<bool>,
    pub sort: Option<Sort>,
}

impl ContractFilter {
    pub fn new(protocol_id: impl Into<String>) -> Self {
        Self {
            protocol_id: protocol_id.into(),
            hidden: None,
            sort: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContractSource {
    api: Api,
}

impl ContractSource {
    pub const fn new(api: Api) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ListSource for ContractSource {
    type Item = Contract;
    type Filter = ContractFilter;

    async fn fetch(
        &self,
        filter: &ContractFilter,
        pagination: Pagination,
    ) -> eyre::Result<Page<Contract>> {
        let params = ContractListParams {
            protocol_id: filter.protocol_id.clone(),
            hidden: filter.hidden,
            pagination,
            sort: filter.sort,
        };
        let list = self.api.contract_list(&params).await?;

        Ok(Page {
            items: list.list,
            count: list.count,
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The protocol's staking contracts plus the mutations run against them.
pub struct StakingList {
    api: Api,
    store: ListStore<ContractSource>,
    notices: Notices,
    // Contracts linked to one of the user's wallets.
    connected: Mutex<HashSet<String>>,
}

impl StakingList {
    pub fn new(api: Api, notices: Notices) -> Self {
        let store = ListStore::new(Arc::new(ContractSource::new(api.clone())), notices.clone());
        Self {
            api,
            store,
            notices,
            connected: Mutex::new(HashSet::new()),
        }
    }

    pub const fn store(&self) -> &ListStore<ContractSource> {
        &self.store
    }

    /// Load which of the protocol's contracts are linked to the user's
    /// wallets. Returns how many are.
    pub async fn load_connected(&self, protocol_id: &str) -> Result<usize, ClientError> {
        let ids = self.api.connected_contracts(protocol_id).await?;
        let mut connected = lock(&self.connected);
        *connected = ids.into_iter().collect();
        Ok(connected.len())
    }

    pub fn is_connected(&self, contract_id: &str) -> bool {
        lock(&self.connected).contains(contract_id)
    }

    /// Reload the list whenever a metric of `wallet_ids` changes, and every
    /// `interval` regardless. Without a subscription socket it only polls.
    pub async fn follow_metrics(
        &self,
        subscriptions: &SubscriptionClient,
        wallet_ids: &[String],
        interval: Duration,
    ) -> JoinHandle<()> {
        let updates = match subscriptions.wallet_metric_updated(wallet_ids).await {
            Ok(subscription) => {
                info!(endpoint = subscriptions.endpoint(), "Following wallet metric updates");
                subscription.updates
            }
            Err(e) => {
                warn!(error = %e, "Metric subscription unavailable, polling only");
                mpsc::channel::<WalletMetricUpdated>(1).1
            }
        };
        self.store.refresh_on(updates, Some(interval))
    }

    /// Delete a contract. It stays listed, flagged pending, until the API
    /// confirms.
    pub async fn delete(&self, id: &str) -> Result<bool, ClientError> {
        self.store.mark_pending(id, true);
        let result = self.api.contract_delete(id).await;
        self.store.mark_pending(id, false);

        match result {
            Ok(true) => {
                self.store.remove(id);
                info!(contract = id, "Contract deleted");
                self.notices.push(Notice::success("Contract deleted"));
                Ok(true)
            }
            Ok(false) => {
                self.notices.push(Notice::error("Contract was not deleted"));
                Ok(false)
            }
            Err(e) => {
                self.notices.push(Notice::error(e.to_string()));
                Err(e)
            }
        }
    }

    /// Link a wallet to a contract and reload the list with its metrics.
    pub async fn connect_wallet(&self, contract_id: &str, wallet_id: &str) -> Result<bool, ClientError> {
        self.store.mark_pending(contract_id, true);
        let result = self.api.connect_wallet(contract_id, wallet_id).await;
        self.store.mark_pending(contract_id, false);

        match result {
            Ok(linked) => {
                if linked {
                    lock(&self.connected).insert(contract_id.to_string());
                    self.store.refresh();
                }
                Ok(linked)
            }
            Err(e) => {
                self.notices.push(Notice::error(e.to_string()));
                Err(e)
            }
        }
    }

    /// Unlink a wallet from a contract.
    pub async fn disconnect_wallet(
        &self,
        contract_id: &str,
        wallet_id: &str,
    ) -> Result<bool, ClientError> {
        self.store.mark_pending(contract_id, true);
        let result = self.api.disconnect_wallet(contract_id, wallet_id).await;
        self.store.mark_pending(contract_id, false);

        match result {
            Ok(unlinked) => {
                if unlinked {
                    lock(&self.connected).remove(contract_id);
                    self.store.refresh();
                }
                Ok(unlinked)
            }
            Err(e) => {
                self.notices.push(Notice::error(e.to_string()));
                Err(e)
            }
        }
    }

    /// Arm the contract's stop-loss with `stop_loss`, or disarm it with `None`.
    pub async fn set_stop_loss(
        &self,
        contract_id: &str,
        stop_loss: Option<&StopLoss>,
    ) -> Result<bool, ClientError> {
        self.store.mark_pending(contract_id, true);
        let result = match stop_loss {
            Some(stop_loss) => self.api.stop_loss_enable(contract_id, stop_loss).await,
            None => self.api.stop_loss_disable(contract_id).await,
        };
        self.store.mark_pending(contract_id, false);

        let action = if stop_loss.is_some() { "enabled" } else { "disabled" };
        match result {
            Ok(true) => {
                info!(contract = contract_id, action, "Stop-loss updated");
                self.notices.push(Notice::success(format!("Stop-loss {action}")));
                self.store.refresh();
                Ok(true)
            }
            Ok(false) => {
                self.notices.push(Notice::error("Stop-loss was not updated"));
                Ok(false)
            }
            Err(e) => {
                self.notices.push(Notice::error(e.to_string()));
                Err(e)
            }
        }
    }
}

impl WalletObserver for StakingList {
    fn wallet_changed(&self, _change: &WalletChange) {
        lock(&self.connected).clear();
        self.store.reset();
    }
}
