//! Adapter capabilities and their loader.
//!
//! An adapter exposes, per contract kind, groups of methods keyed by the action
//! they perform. Each group can be asked whether the action is currently
//! possible (`can`) and then asked to submit it (`send`). The loader resolves
//! adapters for the connected wallet and memoizes them per wallet session.

mod loader;
mod manifest;
pub mod onchain;
mod registry;

use amount::Amount;
use async_trait::async_trait;
pub use loader::AdapterLoader;
pub use manifest::{AdapterManifest, HttpManifestSource, ManifestSource};
pub use registry::{AdapterContext, AdapterFactory, AdapterKey, AdapterRegistry, FnFactory};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr, sync::Arc};
use thiserror::Error;

/// The kind of user action an adapter method group performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionKind {
    Stake,
    Unstake,
    Refund,
    Claim,
    Vote,
    Migrate,
    Run,
    StopLoss,
    Deposit,
    Approve,
}

impl ActionKind {
    pub const ALL: [Self; 10] = [
        Self::Stake,
        Self::Unstake,
        Self::Refund,
        Self::Claim,
        Self::Vote,
        Self::Migrate,
        Self::Run,
        Self::StopLoss,
        Self::Deposit,
        Self::Approve,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stake => "stake",
            Self::Unstake => "unstake",
            Self::Refund => "refund",
            Self::Claim => "claim",
            Self::Vote => "vote",
            Self::Migrate => "migrate",
            Self::Run => "run",
            Self::StopLoss => "stopLoss",
            Self::Deposit => "deposit",
            Self::Approve => "approve",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown action kind: {s}"))
    }
}

/// Governor Bravo vote direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteSupport {
    Against = 0,
    For = 1,
    Abstain = 2,
}

impl VoteSupport {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Arguments handed to an adapter method group.
#[derive(Debug, Clone, Default)]
pub enum Payload {
    #[default]
    None,
    Amount(Amount),
    Vote {
        proposal_id: u64,
        support: VoteSupport,
        reason: Option<String>,
    },
}

impl Payload {
    pub const fn amount(&self) -> Option<&Amount> {
        match self {
            Self::Amount(amount) => Some(amount),
            _ => None,
        }
    }
}

/// Outcome of a `can` check.
///
/// `Denied` and `Rejected` are values, not errors: they mean the adapter
/// answered and the action is not currently possible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    Allowed,
    Denied,
    Rejected(String),
}

impl Precondition {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }

    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

impl From<bool> for Precondition {
    fn from(allowed: bool) -> Self {
        if allowed {
            Self::Allowed
        } else {
            Self::Denied
        }
    }
}

/// Confirmation of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub transaction_hash: String,
    /// Block number where transaction was included
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
}

/// A transaction that has been handed to the wallet.
#[async_trait]
pub trait PendingTransaction: Send {
    fn tx_hash(&self) -> String;

    /// Wait until the transaction is mined. Reverts are errors.
    async fn wait(self: Box<Self>) -> eyre::Result<Receipt>;
}

/// One method group of an adapter.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Check whether the action can run with `payload` right now.
    async fn can(&self, payload: &Payload) -> eyre::Result<Precondition>;

    /// Submit the action. Returns once the wallet accepted the transaction.
    async fn send(&self, payload: &Payload) -> eyre::Result<Box<dyn PendingTransaction>>;

    /// Get a human-readable description of the action.
    fn description(&self, payload: &Payload) -> String {
        match payload.amount() {
            Some(amount) => format!("amount {amount}"),
            None => "no arguments".to_string(),
        }
    }
}

/// A resolved adapter: method groups keyed by action kind.
#[derive(Clone, Default)]
pub struct AdapterHandle {
    groups: BTreeMap<ActionKind, Arc<dyn Capability>>,
}

impl AdapterHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: ActionKind, capability: impl Capability + 'static) -> Self {
        self.groups.insert(kind, Arc::new(capability));
        self
    }

    /// Add a group whose capability is also held elsewhere.
    pub fn with_shared(mut self, kind: ActionKind, capability: Arc<dyn Capability>) -> Self {
        self.groups.insert(kind, capability);
        self
    }

    pub fn group(&self, kind: ActionKind) -> Option<Arc<dyn Capability>> {
        self.groups.get(&kind).cloned()
    }

    pub fn kinds(&self) -> impl Iterator<Item = ActionKind> + '_ {
        self.groups.keys().copied()
    }
}

impl fmt::Debug for AdapterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterHandle")
            .field("groups", &self.groups.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("Adapter {protocol}/{contract_kind}/{action} not found")]
    AdapterNotFound {
        protocol: String,
        contract_kind: String,
        action: String,
    },

    #[error("Wrong network: adapter targets chain {expected}, wallet is on chain {actual}")]
    NetworkMismatch { expected: u64, actual: u64 },

    #[error("Wallet changed while the adapter was loading")]
    WalletChanged,

    #[error("Failed to load adapter: {0}")]
    LoadError(String),
}
