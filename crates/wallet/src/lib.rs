//! Wallet context.
//!
//! Holds the currently connected account, chain id and provider, and reacts to
//! wallet events (account change, chain change, disconnect). Every effective
//! change starts a new session: observers are notified synchronously before the
//! change call returns, so caches keyed on the previous session can never be
//! read after the switch.

use alloy_primitives::Address;
use alloy_provider::{DynProvider, Provider};
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak,
    },
};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    #[error("Wallet not connected")]
    NotConnected,

    #[error("Wrong network: expected chain {expected}, wallet is on chain {actual}")]
    WrongNetwork { expected: u64, actual: u64 },

    #[error("Network switch rejected: {0}")]
    SwitchRejected(String),
}

/// The account, chain and provider active for one wallet session.
#[derive(Clone)]
pub struct WalletRef {
    pub account: Address,
    pub chain_id: u64,
    pub provider: DynProvider,
    session: u64,
}

impl WalletRef {
    /// Session this reference was issued in. Bumped on every wallet change.
    pub const fn session(&self) -> u64 {
        self.session
    }
}

impl fmt::Debug for WalletRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletRef")
            .field("account", &self.account)
            .field("chain_id", &self.chain_id)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

/// Events emitted by the wallet extension or signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    /// An empty list means the wallet was locked or disconnected.
    AccountsChanged(Vec<Address>),
    ChainChanged(u64),
    Disconnect,
}

/// A wallet transition as seen by observers.
#[derive(Debug, Clone)]
pub struct WalletChange {
    pub previous: Option<WalletRef>,
    pub current: Option<WalletRef>,
}

impl WalletChange {
    pub fn account_changed(&self) -> bool {
        self.previous.as_ref().map(|w| w.account) != self.current.as_ref().map(|w| w.account)
    }

    pub fn chain_changed(&self) -> bool {
        self.previous.as_ref().map(|w| w.chain_id) != self.current.as_ref().map(|w| w.chain_id)
    }
}

/// Synchronous hook invoked on every wallet change.
pub trait WalletObserver: Send + Sync {
    fn wallet_changed(&self, change: &WalletChange);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct WalletContext {
    state: RwLock<Option<WalletRef>>,
    session: AtomicU64,
    // Serializes changes so observers see them in order.
    changes: Mutex<()>,
    observers: Mutex<Vec<Weak<dyn WalletObserver>>>,
    sender: watch::Sender<Option<WalletRef>>,
}

impl Default for WalletContext {
    fn default() -> Self {
        Self::new()
    }
}

impl WalletContext {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            state: RwLock::new(None),
            session: AtomicU64::new(0),
            changes: Mutex::new(()),
            observers: Mutex::new(Vec::new()),
            sender,
        }
    }

    /// The connected wallet, if any.
    pub fn current(&self) -> Option<WalletRef> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn session(&self) -> u64 {
        self.session.load(Ordering::SeqCst)
    }

    /// Async view of the wallet for tasks that poll rather than observe.
    pub fn subscribe(&self) -> watch::Receiver<Option<WalletRef>> {
        self.sender.subscribe()
    }

    /// Register an observer. It is dropped from the list once deallocated.
    pub fn observe<O: WalletObserver + 'static>(&self, observer: &Arc<O>) {
        let observer: Weak<dyn WalletObserver> = Arc::downgrade(observer) as Weak<O>;
        lock(&self.observers).push(observer);
    }

    pub fn connect(&self, account: Address, chain_id: u64, provider: DynProvider) -> WalletRef {
        let _guard = lock(&self.changes);
        let wallet = WalletRef {
            account,
            chain_id,
            provider,
            session: self.next_session(),
        };
        self.install(Some(wallet.clone()));
        wallet
    }

    pub fn disconnect(&self) {
        self.handle(WalletEvent::Disconnect);
    }

    /// Apply a wallet event. No-op events do not start a new session.
    pub fn handle(&self, event: WalletEvent) {
        let _guard = lock(&self.changes);
        let current = self.current();

        let next = match (&event, current) {
            (WalletEvent::Disconnect, Some(_)) => None,
            (WalletEvent::AccountsChanged(accounts), Some(wallet)) => match accounts.first() {
                None => None,
                Some(account) if *account == wallet.account => return,
                Some(account) => Some(WalletRef {
                    account: *account,
                    session: self.next_session(),
                    ..wallet
                }),
            },
            (WalletEvent::ChainChanged(chain_id), Some(wallet)) => {
                if *chain_id == wallet.chain_id {
                    return;
                }
                Some(WalletRef {
                    chain_id: *chain_id,
                    session: self.next_session(),
                    ..wallet
                })
            }
            (_, None) => {
                debug!(?event, "Ignoring wallet event without a connected wallet");
                return;
            }
        };

        if next.is_none() {
            self.next_session();
        }
        self.install(next);
    }

    /// The wallet, connected to `chain_id`.
    pub fn require(&self, chain_id: u64) -> Result<WalletRef, WalletError> {
        let wallet = self.current().ok_or(WalletError::NotConnected)?;
        if wallet.chain_id != chain_id {
            return Err(WalletError::WrongNetwork {
                expected: chain_id,
                actual: wallet.chain_id,
            });
        }
        Ok(wallet)
    }

    /// Ask the wallet to switch chains and apply the change once accepted.
    pub async fn switch_network(&self, chain_id: u64) -> Result<WalletRef, WalletError> {
        let wallet = self.current().ok_or(WalletError::NotConnected)?;
        if wallet.chain_id == chain_id {
            return Ok(wallet);
        }

        let params = vec![serde_json::json!({ "chainId": format!("{chain_id:#x}") })];
        wallet
            .provider
            .raw_request::<_, serde_json::Value>("wallet_switchEthereumChain".into(), params)
            .await
            .map_err(|e| WalletError::SwitchRejected(e.to_string()))?;

        self.handle(WalletEvent::ChainChanged(chain_id));
        self.require(chain_id)
    }

    fn next_session(&self) -> u64 {
        self.session.fetch_add(1, Ordering::SeqCst) + 1
    }

    // Caller holds `changes`.
    fn install(&self, current: Option<WalletRef>) {
        let previous = std::mem::replace(
            &mut *self.state.write().unwrap_or_else(PoisonError::into_inner),
            current.clone(),
        );

        info!(
            session = self.session(),
            account = ?current.as_ref().map(|w| w.account),
            chain_id = ?current.as_ref().map(|w| w.chain_id),
            "Wallet changed"
        );

        let change = WalletChange {
            previous,
            current: current.clone(),
        };
        self.notify(&change);
        self.sender.send_replace(current);
    }

    fn notify(&self, change: &WalletChange) {
        let observers: Vec<Arc<dyn WalletObserver>> = {
            let mut observers = lock(&self.observers);
            observers.retain(|observer| observer.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };

        for observer in observers {
            observer.wallet_changed(change);
        }
    }
}
