pub mod config;
mod contracts;
pub mod metrics;

use ::config::NetworkConfig;
use action::{
    ActionError, ActionRequest, AdapterTarget, GraphQlNotifier, Orchestrator, RemoteSync,
    Settlement,
};
use adapter::{
    onchain::{self, GOVERNOR_BRAVO, MIGRATE, VOTE},
    ActionKind, AdapterError, AdapterLoader, AdapterRegistry, HttpManifestSource, Payload,
    VoteSupport,
};
use alloy_primitives::{Address, U256};
use alloy_provider::DynProvider;
use amount::Amount;
use client::{Api, GovernanceVotes, GraphQlClient, ScannerClient, SubscriptionClient};
pub use crate::config::Config;
pub use contracts::{ContractFilter, ContractSource, StakingList};
use std::{sync::Arc, time::Duration};
use store::{NoticeLevel, Notices, StatusBus};
use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};
use tracing::{debug, error, info, warn};
use wallet::{WalletContext, WalletError, WalletRef};

/// Build the adapter registry for a wallet on `chain_id`.
///
/// The governance adapter is only registered when the chain has a governor.
pub fn adapter_registry(config: &Config, network: &NetworkConfig, chain_id: u64) -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();

    match network.governance(chain_id) {
        Ok((_, token)) => {
            onchain::register_governance(&mut registry, &config.governance_protocol, token);
        }
        Err(e) => info!(chain_id, reason = %e, "Governance adapter not registered"),
    }

    for automate in &config.automates {
        onchain::register_automate(&mut registry, &automate.protocol, &automate.contract_kind);
    }

    registry
}

/// A restake automation action on one contract.
#[derive(Debug, Clone)]
pub struct AutomateCall {
    pub kind: ActionKind,
    pub protocol: String,
    pub contract_kind: String,
    pub contract: Address,
    /// API id of the contract
    pub target_id: String,
    /// Chain the contract lives on; the wallet's chain when unset
    pub chain_id: Option<u64>,
    pub amount: Option<Amount>,
}

/// The wired application: wallet, adapters, orchestrator and the contract list.
pub struct App {
    pub config: Config,
    pub network: NetworkConfig,
    pub api: Api,
    pub wallet: Arc<WalletContext>,
    pub loader: Arc<AdapterLoader>,
    pub orchestrator: Arc<Orchestrator>,
    pub contracts: Arc<StakingList>,
    pub scanner: Option<ScannerClient>,
    pub subscriptions: SubscriptionClient,
}

impl App {
    /// Wire every component for a wallet already on `chain_id`.
    pub fn new(config: Config, chain_id: u64) -> Self {
        let network = config.network_config();
        if !network.is_supported(chain_id) {
            warn!(chain_id, "Wallet is on a chain outside the configured network");
        }

        let mut graphql = GraphQlClient::new(&config.api_url);
        if let Some(token) = &config.api_token {
            graphql = graphql.with_token(token);
        }
        let api = Api::new(graphql);

        let mut subscriptions = match &config.api_ws_url {
            Some(url) => SubscriptionClient::new(url),
            None => SubscriptionClient::for_http_endpoint(&config.api_url),
        };
        if let Some(token) = &config.api_token {
            subscriptions = subscriptions.with_token(token);
        }

        let wallet = Arc::new(WalletContext::new());
        let registry = adapter_registry(&config, &network, chain_id);
        let loader = match &config.adapters_host {
            Some(host) => AdapterLoader::with_manifests(
                registry,
                Arc::new(HttpManifestSource::new(host)),
                Arc::clone(&wallet),
            ),
            None => AdapterLoader::new(registry, Arc::clone(&wallet)),
        };

        let notices = Notices::default();
        let notifier = RemoteSync::new(Arc::new(GraphQlNotifier::new(api.clone())));
        let orchestrator = Orchestrator::new(
            Arc::clone(&wallet),
            Arc::clone(&loader),
            StatusBus::new(),
            notices.clone(),
            Some(notifier),
        );

        let contracts = Arc::new(StakingList::new(api.clone(), notices));
        wallet.observe(&contracts);

        let scanner = config.scanner_host.as_deref().map(ScannerClient::new);

        Self {
            config,
            network,
            api,
            wallet,
            loader,
            orchestrator,
            contracts,
            scanner,
            subscriptions,
        }
    }

    /// Connect the signing wallet.
    pub fn connect(&self, account: Address, chain_id: u64, provider: DynProvider) -> WalletRef {
        let wallet = self.wallet.connect(account, chain_id, provider);
        let explorer = self
            .network
            .chain(chain_id)
            .map(|chain| chain.address_url(account))
            .ok();
        info!(%account, chain_id, explorer = explorer.as_deref(), "Wallet connected");
        wallet
    }

    /// `balance` in the native currency of `chain_id`, e.g. `"1.5 ETH"`.
    pub fn native_balance(&self, chain_id: u64, balance: U256) -> String {
        let amount = Amount::from_units(balance, 18).format(4);
        match self.network.chain(chain_id) {
            Ok(chain) => format!("{amount} {}", chain.native_symbol),
            Err(_) => amount,
        }
    }

    /// Explorer page of a settled transaction, when the chain is known.
    pub fn explorer_link(&self, chain_id: u64, settlement: &Settlement) -> Option<String> {
        self.network
            .chain(chain_id)
            .ok()
            .map(|chain| chain.tx_url(&settlement.receipt.transaction_hash))
    }

    /// Request for a restake automation action (`approve`, `deposit`,
    /// `refund`, `run`).
    pub fn automate_request(&self, wallet: WalletRef, call: &AutomateCall) -> ActionRequest {
        let chain_id = call.chain_id.unwrap_or(wallet.chain_id);
        let target = AdapterTarget::new(
            &call.protocol,
            &call.contract_kind,
            MIGRATE,
            call.contract,
            chain_id,
        );
        let payload = call.amount.clone().map_or(Payload::None, Payload::Amount);

        self.with_wallet_id(
            ActionRequest::new(call.kind, &call.target_id, wallet, target).with_payload(payload),
        )
    }

    /// Execute the request built for the connected wallet. When the wallet
    /// is on the wrong chain it is asked to switch, once, and the request is
    /// rebuilt for the switched wallet.
    pub async fn execute(
        &self,
        build: impl Fn(WalletRef) -> ActionRequest,
    ) -> Result<Settlement, ActionError> {
        let wallet = self.wallet.current().ok_or(WalletError::NotConnected)?;

        match self.orchestrator.execute(build(wallet)).await {
            Err(
                ActionError::Wallet(WalletError::WrongNetwork { expected, .. })
                | ActionError::Adapter(AdapterError::NetworkMismatch { expected, .. }),
            ) => {
                info!(chain_id = expected, "Switching wallet network");
                let wallet = self.wallet.switch_network(expected).await?;
                self.orchestrator.execute(build(wallet)).await
            }
            result => result,
        }
    }

    /// Ask the scanner, when configured, to index a settled transaction.
    pub async fn scan_settlement(&self, chain_id: u64, settlement: &Settlement) {
        let Some(scanner) = &self.scanner else {
            return;
        };
        let tx_hash = &settlement.receipt.transaction_hash;
        match scanner.scan_transaction(&chain_id.to_string(), tx_hash).await {
            Ok(()) => debug!(chain_id, %tx_hash, "Scanner indexing requested"),
            Err(e) => warn!(chain_id, %tx_hash, error = %e, "Scanner indexing failed"),
        }
    }

    /// Voting power of the wallet on its chain's governance token.
    pub async fn voting_power(&self, wallet: &WalletRef) -> eyre::Result<Option<GovernanceVotes>> {
        let (_, token) = self.network.governance(wallet.chain_id)?;
        let votes = self
            .api
            .governance_votes(wallet.chain_id, &token.to_string(), &wallet.account.to_string())
            .await?;
        Ok(votes)
    }

    /// Wait up to `timeout` for rescan requests still in flight.
    pub async fn drain(&self, timeout: Duration) {
        let abandoned = self.orchestrator.drain_sync(timeout).await;
        if abandoned > 0 {
            warn!(abandoned, "Rescan requests did not finish before exit");
        }
    }

    /// Request for a vote on a governor proposal of the wallet's chain.
    pub fn vote_request(
        &self,
        wallet: WalletRef,
        proposal_id: u64,
        support: VoteSupport,
        reason: Option<String>,
    ) -> eyre::Result<ActionRequest> {
        let (governor, _) = self.network.governance(wallet.chain_id)?;
        let target = AdapterTarget::new(
            &self.config.governance_protocol,
            GOVERNOR_BRAVO,
            VOTE,
            governor,
            wallet.chain_id,
        );
        let payload = Payload::Vote {
            proposal_id,
            support,
            reason,
        };

        Ok(ActionRequest::new(ActionKind::Vote, proposal_id.to_string(), wallet, target)
            .with_payload(payload))
    }

    fn with_wallet_id(&self, request: ActionRequest) -> ActionRequest {
        match &self.config.wallet_id {
            Some(wallet_id) => request.with_wallet_id(wallet_id),
            None => request,
        }
    }

    /// Log every notice pushed by the orchestrator and the contract list.
    pub fn spawn_notice_logger(&self) -> JoinHandle<()> {
        let mut notices = self.orchestrator.notices().subscribe();

        tokio::spawn(async move {
            loop {
                match notices.recv().await {
                    Ok(notice) => match notice.level {
                        NoticeLevel::Error => error!(message = %notice.message, "Notice"),
                        NoticeLevel::Warning => warn!(message = %notice.message, "Notice"),
                        NoticeLevel::Info | NoticeLevel::Success => {
                            info!(message = %notice.message, "Notice");
                        }
                    },
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "Notices dropped"),
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adapter::AdapterKey;

    fn config() -> Config {
        toml::from_str(
            r#"
            api_url = "http://127.0.0.1:1/graphql"
            rpc_url = "http://127.0.0.1:1"
            network = "testnet"
            wallet_id = "wallet-1"

            [[governance]]
            chain_id = 5
            governor = "0x0000000000000000000000000000000000000a01"
            token = "0x0000000000000000000000000000000000000a02"

            [[automates]]
            protocol = "pancake"
            contract_kind = "MasterChefAutoRestake"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_registry_per_chain() {
        let config = config();
        let network = config.network_config();

        let registry = adapter_registry(&config, &network, 5);
        assert!(registry.contains(&AdapterKey::new("dfh", GOVERNOR_BRAVO, VOTE)));
        assert!(registry.contains(&AdapterKey::new("pancake", "MasterChefAutoRestake", MIGRATE)));

        let registry = adapter_registry(&config, &network, 424242);
        assert!(!registry.contains(&AdapterKey::new("dfh", GOVERNOR_BRAVO, VOTE)));
        assert_eq!(registry.len(), 1);
    }

    fn deposit(chain_id: Option<u64>) -> AutomateCall {
        AutomateCall {
            kind: ActionKind::Deposit,
            protocol: "pancake".to_string(),
            contract_kind: "MasterChefAutoRestake".to_string(),
            contract: Address::repeat_byte(2),
            target_id: "contract-1".to_string(),
            chain_id,
            amount: Some(Amount::parse("1.5")),
        }
    }

    #[tokio::test]
    async fn test_requests() {
        let app = App::new(config(), 5);
        let provider = client::connect("http://127.0.0.1:1").unwrap();
        let wallet = app.connect(Address::repeat_byte(1), 5, provider);

        let request = app.automate_request(wallet.clone(), &deposit(None));
        assert_eq!(request.target.action, MIGRATE);
        assert_eq!(request.target.chain_id, 5);
        assert_eq!(request.wallet_id.as_deref(), Some("wallet-1"));
        assert_eq!(request.key().to_string(), "contract-1:deposit");

        let request = app.automate_request(wallet.clone(), &deposit(Some(56)));
        assert_eq!(request.target.chain_id, 56);

        let vote = app
            .vote_request(wallet, 7, VoteSupport::For, None)
            .unwrap();
        assert_eq!(vote.target_id, "7");
        assert_eq!(vote.target.contract_kind, GOVERNOR_BRAVO);
        assert!(vote.wallet_id.is_none());
    }

    #[tokio::test]
    async fn test_execute_without_wallet() {
        let app = App::new(config(), 5);

        let err = app
            .execute(|wallet| app.automate_request(wallet, &deposit(None)))
            .await
            .unwrap_err();
        assert_eq!(err, ActionError::Wallet(WalletError::NotConnected));
    }

    #[tokio::test]
    async fn test_execute_asks_wallet_to_switch_chain() {
        let app = App::new(config(), 5);
        let provider = client::connect("http://127.0.0.1:1").unwrap();
        app.connect(Address::repeat_byte(1), 5, provider);

        // The unreachable RPC refuses the switch; the wallet stays on chain 5.
        let err = app
            .execute(|wallet| app.automate_request(wallet, &deposit(Some(56))))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Wallet(WalletError::SwitchRejected(_))));
        assert_eq!(app.wallet.current().unwrap().chain_id, 5);
    }

    #[test]
    fn test_chain_display_helpers() {
        let app = App::new(config(), 5);
        let settlement = Settlement {
            key: store::ActionKey::new("contract-1", ActionKind::Run),
            receipt: adapter::Receipt {
                transaction_hash: "0xabc".to_string(),
                block_number: Some(1),
                gas_used: None,
            },
        };

        assert_eq!(
            app.explorer_link(5, &settlement).as_deref(),
            Some("https://goerli.etherscan.io/tx/0xabc")
        );
        assert!(app.explorer_link(424242, &settlement).is_none());

        let balance = U256::from(1_500_000_000_000_000_000u128);
        assert_eq!(app.native_balance(5, balance), "1.5000 ETH");
        assert_eq!(app.native_balance(424242, balance), "1.5000");
    }
}
