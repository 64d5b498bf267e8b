use crate::AdapterHandle;
use alloy_primitives::Address;
use async_trait::async_trait;
use std::{collections::HashMap, fmt, future::Future, sync::Arc};
use wallet::WalletRef;

/// Everything a factory needs to bind an adapter to one contract.
#[derive(Debug, Clone)]
pub struct AdapterContext {
    pub wallet: WalletRef,
    /// Chain the target contract lives on
    pub chain_id: u64,
    pub contract: Address,
}

impl AdapterContext {
    pub const fn new(wallet: WalletRef, chain_id: u64, contract: Address) -> Self {
        Self {
            wallet,
            chain_id,
            contract,
        }
    }
}

/// Builds an adapter handle for a context.
#[async_trait]
pub trait AdapterFactory: Send + Sync {
    async fn build(&self, context: &AdapterContext) -> eyre::Result<AdapterHandle>;
}

/// Factory backed by an async closure.
pub struct FnFactory<F>(pub F);

#[async_trait]
impl<F, Fut> AdapterFactory for FnFactory<F>
where
    F: Fn(AdapterContext) -> Fut + Send + Sync,
    Fut: Future<Output = eyre::Result<AdapterHandle>> + Send,
{
    async fn build(&self, context: &AdapterContext) -> eyre::Result<AdapterHandle> {
        (self.0)(context.clone()).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AdapterKey {
    pub protocol: String,
    pub contract_kind: String,
    pub action: String,
}

impl AdapterKey {
    pub fn new(
        protocol: impl Into<String>,
        contract_kind: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            protocol: protocol.into(),
            contract_kind: contract_kind.into(),
            action: action.into(),
        }
    }
}

impl fmt::Display for AdapterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.protocol, self.contract_kind, self.action)
    }
}

/// Known adapter factories. Anything not registered fails closed.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    factories: HashMap<AdapterKey, Arc<dyn AdapterFactory>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: AdapterKey, factory: impl AdapterFactory + 'static) -> &mut Self {
        self.factories.insert(key, Arc::new(factory));
        self
    }

    pub fn with(mut self, key: AdapterKey, factory: impl AdapterFactory + 'static) -> Self {
        self.register(key, factory);
        self
    }

    pub fn get(&self, key: &AdapterKey) -> Option<Arc<dyn AdapterFactory>> {
        self.factories.get(key).cloned()
    }

    pub fn contains(&self, key: &AdapterKey) -> bool {
        self.factories.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.factories.keys().map(ToString::to_string).collect();
        keys.sort();
        f.debug_struct("AdapterRegistry").field("factories", &keys).finish()
    }
}
