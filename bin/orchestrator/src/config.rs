use alloy_primitives::Address;
use config::{NetworkConfig, NetworkConfigBuilder, NetworkType};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Governance contracts for one chain, overriding the built-in table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceConfig {
    pub chain_id: u64,
    pub governor: Address,
    pub token: Address,
}

/// A restake automation adapter to register.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomateConfig {
    pub protocol: String,
    pub contract_kind: String,
}

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// GraphQL API endpoint url
    pub api_url: String,

    /// Bearer token for the API
    #[serde(default)]
    pub api_token: Option<String>,

    /// GraphQL subscription socket; derived from `api_url` when unset
    #[serde(default)]
    pub api_ws_url: Option<String>,

    /// Seconds between contract list reloads while watching
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// Wallet RPC endpoint url
    pub rpc_url: String,

    /// Host serving `{protocol}.json` adapter manifests
    #[serde(default)]
    pub adapters_host: Option<String>,

    /// Scanner (event indexer) host
    #[serde(default)]
    pub scanner_host: Option<String>,

    /// Network type (mainnet or testnet)
    #[serde(default = "default_network")]
    pub network: NetworkType,

    /// Port of the Prometheus exporter; disabled when unset
    #[serde(default)]
    pub metrics_port: Option<u16>,

    /// API id of the wallet, used to request metric rescans
    #[serde(default)]
    pub wallet_id: Option<String>,

    /// Protocol id the governance adapter is registered under
    #[serde(default = "default_governance_protocol")]
    pub governance_protocol: String,

    #[serde(default)]
    pub governance: Vec<GovernanceConfig>,

    #[serde(default)]
    pub automates: Vec<AutomateConfig>,
}

const fn default_network() -> NetworkType {
    NetworkType::Mainnet
}

const fn default_refresh_interval() -> u64 {
    15
}

fn default_governance_protocol() -> String {
    "dfh".to_string()
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;

        Ok(config)
    }

    /// Get the chain table for the configured network, with overrides applied.
    pub fn network_config(&self) -> NetworkConfig {
        let builder = match self.network {
            NetworkType::Mainnet => NetworkConfigBuilder::mainnet(),
            NetworkType::Testnet => NetworkConfigBuilder::testnet(),
        };

        self.governance
            .iter()
            .fold(builder, |builder, governance| {
                builder.governance(governance.chain_id, governance.governor, governance.token)
            })
            .build()
    }
}
