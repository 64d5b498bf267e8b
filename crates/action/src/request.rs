use adapter::{ActionKind, Payload, Receipt};
use alloy_primitives::Address;
use std::fmt;
use store::ActionKey;
use wallet::WalletRef;

/// Optimistic store update applied once the transaction is confirmed.
pub type Patch = Box<dyn FnOnce(&Receipt) + Send>;

/// Which adapter to resolve, and for which contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterTarget {
    pub protocol: String,
    pub contract_kind: String,
    pub action: String,
    pub contract: Address,
    pub chain_id: u64,
}

impl AdapterTarget {
    pub fn new(
        protocol: impl Into<String>,
        contract_kind: impl Into<String>,
        action: impl Into<String>,
        contract: Address,
        chain_id: u64,
    ) -> Self {
        Self {
            protocol: protocol.into(),
            contract_kind: contract_kind.into(),
            action: action.into(),
            contract,
            chain_id,
        }
    }
}

pub struct ActionRequest {
    pub kind: ActionKind,
    /// Contract, order or proposal the action applies to
    pub target_id: String,
    pub wallet: WalletRef,
    pub target: AdapterTarget,
    pub payload: Payload,
    /// Backend id of the wallet, when the backend should rescan it afterwards
    pub wallet_id: Option<String>,
    pub patch: Option<Patch>,
}

impl ActionRequest {
    pub fn new(
        kind: ActionKind,
        target_id: impl Into<String>,
        wallet: WalletRef,
        target: AdapterTarget,
    ) -> Self {
        Self {
            kind,
            target_id: target_id.into(),
            wallet,
            target,
            payload: Payload::None,
            wallet_id: None,
            patch: None,
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_wallet_id(mut self, wallet_id: impl Into<String>) -> Self {
        self.wallet_id = Some(wallet_id.into());
        self
    }

    pub fn with_patch(mut self, patch: impl FnOnce(&Receipt) + Send + 'static) -> Self {
        self.patch = Some(Box::new(patch));
        self
    }

    pub fn key(&self) -> ActionKey {
        ActionKey::new(self.target_id.clone(), self.kind)
    }
}

impl fmt::Debug for ActionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRequest")
            .field("kind", &self.kind)
            .field("target_id", &self.target_id)
            .field("wallet", &self.wallet)
            .field("target", &self.target)
            .field("payload", &self.payload)
            .field("wallet_id", &self.wallet_id)
            .field("patch", &self.patch.is_some())
            .finish()
    }
}
