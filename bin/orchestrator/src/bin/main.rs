use adapter::{ActionKind, VoteSupport};
use alloy_primitives::Address;
use alloy_provider::Provider;
use amount::Amount;
use clap::{Parser, Subcommand, ValueEnum};
use client::{Pagination, StopLoss};
use orchestrator::{
    metrics::{install_prometheus_exporter, Metrics},
    App, AutomateCall, Config, ContractFilter,
};
use std::{
    path::PathBuf,
    time::{Duration, Instant},
};
use tracing::{error, info, warn};

/// How long rescan requests may take to go out before exit.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "orchestrator", about = "Run dashboard actions against a wallet")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Private key of the wallet signing transactions
    #[arg(short = 'k', long, env = "PRIVATE_KEY", hide_env_values = true)]
    private_key: String,

    /// Overrides `rpc_url` from the configuration file
    #[arg(long, env = "RPC_URL")]
    rpc_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the protocol's staking contracts
    Contracts {
        #[arg(long)]
        protocol: String,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        #[arg(long, default_value_t = 20)]
        limit: u64,
        #[arg(long)]
        hidden: Option<bool>,
    },
    /// Run a restake automation action on a contract
    Action {
        /// approve, deposit, refund or run
        #[arg(long)]
        kind: ActionKind,
        #[arg(long)]
        protocol: String,
        #[arg(long)]
        contract_kind: String,
        #[arg(long)]
        contract: Address,
        /// API id of the contract
        #[arg(long)]
        target_id: String,
        /// Chain of the contract, when it differs from the wallet's
        #[arg(long)]
        chain_id: Option<u64>,
        #[arg(long)]
        amount: Option<String>,
    },
    /// Vote on a governor proposal
    Vote {
        #[arg(long)]
        proposal: u64,
        #[arg(long, value_enum)]
        support: Support,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Delete a staking contract
    DeleteContract {
        #[arg(long)]
        protocol: String,
        #[arg(long)]
        id: String,
    },
    /// Link the configured wallet to a staking contract
    ConnectWallet {
        #[arg(long)]
        protocol: String,
        #[arg(long)]
        contract: String,
    },
    /// Unlink the configured wallet from a staking contract
    DisconnectWallet {
        #[arg(long)]
        protocol: String,
        #[arg(long)]
        contract: String,
    },
    /// Arm or disarm the stop-loss of an automate contract
    StopLoss {
        #[arg(long)]
        protocol: String,
        /// API id of the automate contract
        #[arg(long)]
        contract: String,
        /// Swap path, from the staked token to the exit token
        #[arg(long, value_delimiter = ',')]
        path: Vec<Address>,
        #[arg(long, default_value = "0")]
        amount_out: String,
        #[arg(long, default_value = "0")]
        amount_out_min: String,
        #[arg(long)]
        disable: bool,
    },
    /// Keep the contract list fresh until interrupted
    Watch {
        #[arg(long)]
        protocol: String,
    },
    /// Show the block height the scanner has indexed for a contract
    SyncedBlock {
        #[arg(long)]
        network: String,
        #[arg(long)]
        address: Address,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Support {
    Against,
    For,
    Abstain,
}

impl From<Support> for VoteSupport {
    fn from(support: Support) -> Self {
        match support {
            Support::Against => Self::Against,
            Support::For => Self::For,
            Support::Abstain => Self::Abstain,
        }
    }
}

fn configured_wallet_id(app: &App) -> eyre::Result<String> {
    app.config
        .wallet_id
        .clone()
        .ok_or_else(|| eyre::eyre!("wallet_id is not configured"))
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    info!("Loading config: {}", cli.config.display());
    let mut config = Config::from_file(&cli.config)?;
    if let Some(rpc_url) = cli.rpc_url {
        config.rpc_url = rpc_url;
    }

    let metrics = Metrics::new();
    if let Some(port) = config.metrics_port {
        install_prometheus_exporter(port)?;
        info!(port, "Prometheus exporter listening");
    }

    let (account, provider) = client::connect_wallet(&config.rpc_url, &cli.private_key)?;
    let chain_id = provider.get_chain_id().await?;

    let balance = provider.get_balance(account).await?;
    let app = App::new(config, chain_id);
    info!(%account, balance = %app.native_balance(chain_id, balance), "Signer");
    let wallet = app.connect(account, chain_id, provider);
    let _notices = app.spawn_notice_logger();
    let _recorder = metrics.spawn_status_recorder(app.orchestrator.bus());

    match cli.command {
        Command::Contracts {
            protocol,
            offset,
            limit,
            hidden,
        } => {
            let store = app.contracts.store();
            let mut filter = ContractFilter::new(protocol.clone());
            filter.hidden = hidden;
            store.open(filter);
            store.set_page(Pagination { offset, limit });
            let connected = app.contracts.load_connected(&protocol).await;
            metrics.record_api_request("connected_contracts", connected.is_ok());
            if let Err(e) = &connected {
                warn!(error = %e, "Could not load connected contracts");
            }
            store.settled().await;

            let items = store.items();
            info!(count = store.count(), shown = items.len(), "Contracts");
            for contract in items {
                info!(
                    id = %contract.id,
                    name = %contract.name,
                    address = %contract.address,
                    tvl = %contract.metric.tvl,
                    apr = %contract.metric.apr_year,
                    staked = %contract.metric.my_staked,
                    connected = app.contracts.is_connected(&contract.id),
                    "Contract"
                );
            }
        }
        Command::Action {
            kind,
            protocol,
            contract_kind,
            contract,
            target_id,
            chain_id,
            amount,
        } => {
            let call = AutomateCall {
                kind,
                protocol,
                contract_kind,
                contract,
                target_id,
                chain_id,
                amount: amount.as_deref().map(Amount::parse),
            };
            let started = Instant::now();
            let result = app.execute(|wallet| app.automate_request(wallet, &call)).await;
            metrics.record_action_duration(kind.as_str(), started.elapsed());

            match result {
                Ok(settlement) => {
                    let chain_id = call
                        .chain_id
                        .or_else(|| app.wallet.current().map(|w| w.chain_id));
                    let explorer = chain_id.and_then(|id| app.explorer_link(id, &settlement));
                    info!(
                        key = %settlement.key,
                        tx_hash = %settlement.receipt.transaction_hash,
                        explorer = explorer.as_deref(),
                        "Action settled"
                    );
                    if let Some(chain_id) = chain_id {
                        app.scan_settlement(chain_id, &settlement).await;
                    }
                }
                Err(e) => error!(error = %e, "{}", e.user_message()),
            }
        }
        Command::Vote {
            proposal,
            support,
            reason,
        } => {
            match app.voting_power(&wallet).await {
                Ok(Some(votes)) if !votes.votes.is_zero() && !votes.votes.is_nan() => {
                    info!(votes = %votes.votes, delegates = %votes.delegates, "Voting power");
                }
                Ok(_) => warn!("Wallet has no delegated votes, the vote will not count"),
                Err(e) => warn!(error = %e, "Could not load voting power"),
            }

            let chain_id = wallet.chain_id;
            let request = app.vote_request(wallet, proposal, support.into(), reason)?;
            let started = Instant::now();
            let result = app.orchestrator.execute(request).await;
            metrics.record_action_duration(ActionKind::Vote.as_str(), started.elapsed());

            match result {
                Ok(settlement) => {
                    info!(
                        proposal,
                        tx_hash = %settlement.receipt.transaction_hash,
                        explorer = app.explorer_link(chain_id, &settlement).as_deref(),
                        "Vote cast"
                    );
                    app.scan_settlement(chain_id, &settlement).await;
                }
                Err(e) => error!(error = %e, "{}", e.user_message()),
            }
        }
        Command::DeleteContract { protocol, id } => {
            let store = app.contracts.store();
            store.open(ContractFilter::new(protocol));
            store.settled().await;

            let result = app.contracts.delete(&id).await;
            metrics.record_api_request("contract_delete", result.is_ok());
            info!(%id, deleted = result?, "Contract delete");
        }
        Command::ConnectWallet { protocol, contract } => {
            let wallet_id = configured_wallet_id(&app)?;
            let store = app.contracts.store();
            store.open(ContractFilter::new(protocol));

            let result = app.contracts.connect_wallet(&contract, &wallet_id).await;
            metrics.record_api_request("connect_wallet", result.is_ok());
            store.settled().await;
            info!(%contract, %wallet_id, linked = result?, "Wallet connect");
        }
        Command::DisconnectWallet { protocol, contract } => {
            let wallet_id = configured_wallet_id(&app)?;
            let store = app.contracts.store();
            store.open(ContractFilter::new(protocol));

            let result = app.contracts.disconnect_wallet(&contract, &wallet_id).await;
            metrics.record_api_request("disconnect_wallet", result.is_ok());
            store.settled().await;
            info!(%contract, %wallet_id, unlinked = result?, "Wallet disconnect");
        }
        Command::StopLoss {
            protocol,
            contract,
            path,
            amount_out,
            amount_out_min,
            disable,
        } => {
            let store = app.contracts.store();
            store.open(ContractFilter::new(protocol));

            let stop_loss = (!disable).then(|| StopLoss {
                path,
                amount_out: Amount::parse(&amount_out),
                amount_out_min: Amount::parse(&amount_out_min),
            });
            if let Some(stop_loss) = &stop_loss {
                if stop_loss.path.len() < 2 {
                    eyre::bail!("stop-loss path needs at least two tokens");
                }
                if stop_loss.amount_out_min.is_nan() {
                    eyre::bail!("invalid amount_out_min: {amount_out_min}");
                }
            }

            let started = Instant::now();
            let result = app.contracts.set_stop_loss(&contract, stop_loss.as_ref()).await;
            metrics.record_action_duration(ActionKind::StopLoss.as_str(), started.elapsed());
            metrics.record_api_request("stop_loss", result.is_ok());
            store.settled().await;
            info!(%contract, enabled = !disable, updated = result?, "Stop-loss");
        }
        Command::Watch { protocol } => {
            let wallet_ids: Vec<String> = app.config.wallet_id.iter().cloned().collect();
            let store = app.contracts.store();
            store.open(ContractFilter::new(protocol.clone()));
            if let Err(e) = app.contracts.load_connected(&protocol).await {
                warn!(error = %e, "Could not load connected contracts");
            }

            let interval = Duration::from_secs(app.config.refresh_interval_secs.max(1));
            let follower = app
                .contracts
                .follow_metrics(&app.subscriptions, &wallet_ids, interval)
                .await;
            info!(%protocol, interval_secs = interval.as_secs(), "Watching contracts, ctrl-c to stop");

            tokio::signal::ctrl_c().await?;
            follower.abort();
            store.settled().await;
            info!(count = store.count(), "Stopped watching");
        }
        Command::SyncedBlock { network, address } => {
            let Some(scanner) = &app.scanner else {
                eyre::bail!("scanner_host is not configured");
            };
            let result = scanner.synced_block(&network, address).await;
            metrics.record_api_request("synced_block", result.is_ok());
            info!(%network, %address, block = result?, "Scanner sync height");
        }
    }

    app.drain(DRAIN_TIMEOUT).await;

    Ok(())
}
