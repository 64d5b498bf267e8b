//! User action orchestration.
//!
//! An [`Orchestrator`] drives one action request through
//! `Idle -> Checking -> Submitted -> Confirming -> Settled | Failed`:
//! resolve the adapter, check its precondition, submit through the wallet,
//! wait for confirmation, then apply the optimistic patch and ask the backend
//! to rescan the wallet.

mod notify;
mod orchestrator;
mod request;

use adapter::AdapterError;
pub use notify::{GraphQlNotifier, RemoteSync, SyncNotifier};
pub use orchestrator::{Orchestrator, Settlement};
pub use request::{ActionRequest, AdapterTarget, Patch};
use store::StoreError;
use thiserror::Error;
use wallet::WalletError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    /// `can` answered that the action is not possible
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// Rejected, reverted or dropped transaction
    #[error("Transaction failed: {0}")]
    Transaction(String),

    /// RPC or backend failure while checking the action
    #[error("Infrastructure error: {0}")]
    Infrastructure(String),
}

impl ActionError {
    /// The result arrived after the action was reset and was discarded.
    pub const fn is_superseded(&self) -> bool {
        matches!(self, Self::Store(StoreError::Superseded(_)))
    }

    /// Short text for the notice channel.
    pub fn user_message(&self) -> String {
        match self {
            Self::Store(StoreError::AlreadyInProgress(_)) => "Action already in progress".to_string(),
            Self::Store(StoreError::Superseded(_)) => "Action was cancelled".to_string(),
            Self::Store(err @ StoreError::InvalidTransition { .. }) => err.to_string(),
            Self::Wallet(WalletError::NotConnected) => "Connect your wallet".to_string(),
            Self::Wallet(WalletError::WrongNetwork { expected, .. })
            | Self::Adapter(AdapterError::NetworkMismatch { expected, .. }) => {
                format!("Switch your wallet to chain {expected}")
            }
            Self::Wallet(err @ WalletError::SwitchRejected(_)) => err.to_string(),
            Self::Adapter(AdapterError::WalletChanged) => "Wallet changed, try again".to_string(),
            Self::Adapter(AdapterError::AdapterNotFound { .. }) => {
                "This action is not supported for the contract".to_string()
            }
            Self::Adapter(AdapterError::LoadError(_)) => "Failed to load the adapter".to_string(),
            Self::PreconditionFailed(reason) => reason.clone(),
            Self::Transaction(message) | Self::Infrastructure(message) => message.clone(),
        }
    }
}
