use crate::{
    AdapterContext, AdapterError, AdapterHandle, AdapterKey, AdapterManifest, AdapterRegistry,
    ManifestSource,
};
use alloy_primitives::Address;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tracing::{debug, info};
use wallet::{WalletChange, WalletContext, WalletObserver};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    adapter: AdapterKey,
    chain_id: u64,
    account: Address,
    contract: Address,
    session: u64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Resolves adapter handles for the connected wallet.
///
/// Handles are memoized per (adapter, chain, account, contract) and dropped as
/// soon as the wallet changes.
pub struct AdapterLoader {
    registry: AdapterRegistry,
    manifests: Option<Arc<dyn ManifestSource>>,
    wallet: Arc<WalletContext>,
    handles: Mutex<HashMap<CacheKey, Arc<AdapterHandle>>>,
    manifest_cache: Mutex<HashMap<String, Arc<AdapterManifest>>>,
}

impl AdapterLoader {
    /// Create a loader and register it for wallet changes.
    pub fn new(registry: AdapterRegistry, wallet: Arc<WalletContext>) -> Arc<Self> {
        Self::build(registry, None, wallet)
    }

    /// Like [`Self::new`], but only resolves adapters listed in the protocol's
    /// remote manifest.
    pub fn with_manifests(
        registry: AdapterRegistry,
        manifests: Arc<dyn ManifestSource>,
        wallet: Arc<WalletContext>,
    ) -> Arc<Self> {
        Self::build(registry, Some(manifests), wallet)
    }

    fn build(
        registry: AdapterRegistry,
        manifests: Option<Arc<dyn ManifestSource>>,
        wallet: Arc<WalletContext>,
    ) -> Arc<Self> {
        let loader = Arc::new(Self {
            registry,
            manifests,
            wallet: Arc::clone(&wallet),
            handles: Mutex::new(HashMap::new()),
            manifest_cache: Mutex::new(HashMap::new()),
        });
        wallet.observe(&loader);
        loader
    }

    pub async fn resolve(
        &self,
        protocol: &str,
        contract_kind: &str,
        action: &str,
        context: &AdapterContext,
    ) -> Result<Arc<AdapterHandle>, AdapterError> {
        self.check(context)?;

        let adapter = AdapterKey::new(protocol, contract_kind, action);
        let key = CacheKey {
            adapter: adapter.clone(),
            chain_id: context.chain_id,
            account: context.wallet.account,
            contract: context.contract,
            session: context.wallet.session(),
        };

        if let Some(handle) = lock(&self.handles).get(&key) {
            return Ok(Arc::clone(handle));
        }

        let not_found = || AdapterError::AdapterNotFound {
            protocol: protocol.to_string(),
            contract_kind: contract_kind.to_string(),
            action: action.to_string(),
        };

        if let Some(source) = &self.manifests {
            let manifest = self.manifest(source.as_ref(), protocol).await?;
            if !manifest.supports(contract_kind, action) {
                return Err(not_found());
            }
        }

        let factory = self.registry.get(&adapter).ok_or_else(not_found)?;

        debug!(adapter = %adapter, contract = %context.contract, "Building adapter");
        let handle = factory
            .build(context)
            .await
            .map_err(|e| AdapterError::LoadError(format!("{adapter}: {e:#}")))?;

        // Checked under the cache lock so an invalidation cannot slip between
        // the check and the insert.
        let mut handles = lock(&self.handles);
        self.check(context)?;
        let handle = handles.entry(key).or_insert_with(|| Arc::new(handle));
        Ok(Arc::clone(handle))
    }

    fn check(&self, context: &AdapterContext) -> Result<(), AdapterError> {
        if context.wallet.session() != self.wallet.session() {
            return Err(AdapterError::WalletChanged);
        }
        if context.chain_id != context.wallet.chain_id {
            return Err(AdapterError::NetworkMismatch {
                expected: context.chain_id,
                actual: context.wallet.chain_id,
            });
        }
        Ok(())
    }

    async fn manifest(
        &self,
        source: &dyn ManifestSource,
        protocol: &str,
    ) -> Result<Arc<AdapterManifest>, AdapterError> {
        if let Some(manifest) = lock(&self.manifest_cache).get(protocol) {
            return Ok(Arc::clone(manifest));
        }

        let manifest = Arc::new(source.fetch(protocol).await?);
        lock(&self.manifest_cache).insert(protocol.to_string(), Arc::clone(&manifest));
        Ok(manifest)
    }

    /// Drop every cached handle.
    pub fn invalidate(&self) {
        let mut handles = lock(&self.handles);
        if !handles.is_empty() {
            info!(count = handles.len(), "Invalidating adapter handles");
        }
        handles.clear();
    }

    /// Number of cached handles.
    pub fn cached(&self) -> usize {
        lock(&self.handles).len()
    }
}

impl WalletObserver for AdapterLoader {
    fn wallet_changed(&self, _change: &WalletChange) {
        self.invalidate();
    }
}
