//! Adapters backed directly by contract calls through the wallet provider.

mod automate;
mod erc20;
mod governor;

use crate::{AdapterKey, AdapterRegistry, PendingTransaction, Receipt};
use alloy_primitives::Address;
use alloy_provider::{network::Ethereum, PendingTransactionBuilder};
use async_trait::async_trait;
pub use automate::{AutomateDeposit, AutomateFactory, AutomateRefund, AutomateRun};
pub use erc20::Approve;
pub use governor::{CastVote, GovernorFactory};
use tracing::info;

/// Action name of restake automation adapters.
pub const MIGRATE: &str = "migrate";
/// Action name of governance adapters.
pub const VOTE: &str = "vote";
/// Contract kind of Governor Bravo style governors.
pub const GOVERNOR_BRAVO: &str = "GovernorBravo";

/// Register the restake automation adapter for `protocol`'s `contract_kind`.
pub fn register_automate(registry: &mut AdapterRegistry, protocol: &str, contract_kind: &str) {
    registry.register(AdapterKey::new(protocol, contract_kind, MIGRATE), AutomateFactory);
}

/// Register the governor vote adapter, counting votes on `token`.
pub fn register_governance(registry: &mut AdapterRegistry, protocol: &str, token: Address) {
    registry.register(
        AdapterKey::new(protocol, GOVERNOR_BRAVO, VOTE),
        GovernorFactory::new(token),
    );
}

/// A transaction submitted through an alloy provider.
pub struct EthPending {
    inner: PendingTransactionBuilder<Ethereum>,
}

impl EthPending {
    pub const fn new(inner: PendingTransactionBuilder<Ethereum>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl PendingTransaction for EthPending {
    fn tx_hash(&self) -> String {
        self.inner.tx_hash().to_string()
    }

    async fn wait(self: Box<Self>) -> eyre::Result<Receipt> {
        let tx_hash = *self.inner.tx_hash();
        let receipt = self.inner.get_receipt().await?;

        if !receipt.status() {
            eyre::bail!("Transaction {tx_hash} reverted");
        }

        info!(
            tx_hash = %receipt.transaction_hash,
            block_number = receipt.block_number,
            gas_used = receipt.gas_used,
            "Transaction confirmed"
        );

        Ok(Receipt {
            transaction_hash: receipt.transaction_hash.to_string(),
            block_number: receipt.block_number,
            gas_used: Some(receipt.gas_used),
        })
    }
}
