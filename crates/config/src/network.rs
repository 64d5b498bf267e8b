//! Chain configuration for wallet and adapter flows.
//!
//! Provides chain-specific parameters for the networks the dashboard supports
//! (mainnet and testnet sets).

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown chain id {0}")]
    UnknownChain(u64),

    #[error("No governor configured for chain {0}")]
    NoGovernor(u64),
}

/// Network type (mainnet or testnet).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Mainnet,
    Testnet,
}

/// Per-chain parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Chain ID
    pub chain_id: u64,
    /// Display name
    pub name: Cow<'static, str>,
    /// Block explorer base url, without trailing slash
    pub explorer_url: Cow<'static, str>,
    /// Native currency symbol
    pub native_symbol: Cow<'static, str>,
    /// Governor contract, when governance runs on this chain
    #[serde(default)]
    pub governor: Option<Address>,
    /// Token whose delegated votes count in governance
    #[serde(default)]
    pub governance_token: Option<Address>,
}

impl ChainConfig {
    /// Ethereum mainnet.
    pub const fn ethereum() -> Self {
        Self {
            chain_id: 1,
            name: Cow::Borrowed("Ethereum"),
            explorer_url: Cow::Borrowed("https://etherscan.io"),
            native_symbol: Cow::Borrowed("ETH"),
            governor: None,
            governance_token: None,
        }
    }

    /// Ethereum Goerli testnet.
    pub const fn goerli() -> Self {
        Self {
            chain_id: 5,
            name: Cow::Borrowed("Goerli"),
            explorer_url: Cow::Borrowed("https://goerli.etherscan.io"),
            native_symbol: Cow::Borrowed("ETH"),
            governor: None,
            governance_token: None,
        }
    }

    /// BNB Smart Chain.
    pub const fn bsc() -> Self {
        Self {
            chain_id: 56,
            name: Cow::Borrowed("BNB Chain"),
            explorer_url: Cow::Borrowed("https://bscscan.com"),
            native_symbol: Cow::Borrowed("BNB"),
            governor: None,
            governance_token: None,
        }
    }

    /// Polygon PoS.
    pub const fn polygon() -> Self {
        Self {
            chain_id: 137,
            name: Cow::Borrowed("Polygon"),
            explorer_url: Cow::Borrowed("https://polygonscan.com"),
            native_symbol: Cow::Borrowed("MATIC"),
            governor: None,
            governance_token: None,
        }
    }

    /// Avalanche C-Chain.
    pub const fn avalanche() -> Self {
        Self {
            chain_id: 43114,
            name: Cow::Borrowed("Avalanche"),
            explorer_url: Cow::Borrowed("https://snowtrace.io"),
            native_symbol: Cow::Borrowed("AVAX"),
            governor: None,
            governance_token: None,
        }
    }

    /// Explorer page for a transaction.
    pub fn tx_url(&self, tx_hash: &str) -> String {
        format!("{}/tx/{}", self.explorer_url, tx_hash)
    }

    /// Explorer page for an address.
    pub fn address_url(&self, address: Address) -> String {
        format!("{}/address/{}", self.explorer_url, address)
    }
}

/// The set of chains the application works with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network type (mainnet or testnet)
    pub network_type: NetworkType,
    /// Chain used when the wallet has not picked one
    pub default_chain_id: u64,
    /// Supported chains
    pub chains: Vec<ChainConfig>,
}

impl NetworkConfig {
    /// Create mainnet configuration.
    pub fn mainnet() -> Self {
        NetworkConfigBuilder::mainnet().build()
    }

    /// Create testnet configuration.
    pub fn testnet() -> Self {
        NetworkConfigBuilder::testnet().build()
    }

    /// Create configuration from network type.
    pub fn from_network_type(network_type: NetworkType) -> Self {
        match network_type {
            NetworkType::Mainnet => Self::mainnet(),
            NetworkType::Testnet => Self::testnet(),
        }
    }

    pub fn chain(&self, chain_id: u64) -> Result<&ChainConfig, ConfigError> {
        self.chains
            .iter()
            .find(|chain| chain.chain_id == chain_id)
            .ok_or(ConfigError::UnknownChain(chain_id))
    }

    pub fn is_supported(&self, chain_id: u64) -> bool {
        self.chain(chain_id).is_ok()
    }

    /// Governor and voting token addresses for a chain.
    pub fn governance(&self, chain_id: u64) -> Result<(Address, Address), ConfigError> {
        let chain = self.chain(chain_id)?;
        match (chain.governor, chain.governance_token) {
            (Some(governor), Some(token)) => Ok((governor, token)),
            _ => Err(ConfigError::NoGovernor(chain_id)),
        }
    }
}

/// Builder for custom network configurations.
#[derive(Debug, Clone)]
pub struct NetworkConfigBuilder {
    network_type: NetworkType,
    default_chain_id: u64,
    chains: Vec<ChainConfig>,
}

impl NetworkConfigBuilder {
    /// Start with mainnet defaults.
    pub fn mainnet() -> Self {
        Self {
            network_type: NetworkType::Mainnet,
            default_chain_id: 1,
            chains: vec![
                ChainConfig::ethereum(),
                ChainConfig::bsc(),
                ChainConfig::polygon(),
                ChainConfig::avalanche(),
            ],
        }
    }

    /// Start with testnet defaults.
    pub fn testnet() -> Self {
        Self {
            network_type: NetworkType::Testnet,
            default_chain_id: 5,
            chains: vec![ChainConfig::goerli()],
        }
    }

    pub const fn default_chain_id(mut self, chain_id: u64) -> Self {
        self.default_chain_id = chain_id;
        self
    }

    /// Add a chain, replacing any existing entry with the same id.
    pub fn chain(mut self, chain: ChainConfig) -> Self {
        self.chains.retain(|existing| existing.chain_id != chain.chain_id);
        self.chains.push(chain);
        self
    }

    /// Override governance contracts for a chain. Unknown chains are ignored.
    pub fn governance(mut self, chain_id: u64, governor: Address, token: Address) -> Self {
        if let Some(chain) = self.chains.iter_mut().find(|c| c.chain_id == chain_id) {
            chain.governor = Some(governor);
            chain.governance_token = Some(token);
        }
        self
    }

    /// Build the network configuration.
    pub fn build(self) -> NetworkConfig {
        NetworkConfig {
            network_type: self.network_type,
            default_chain_id: self.default_chain_id,
            chains: self.chains,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    #[test]
    fn test_mainnet_config() {
        let config = NetworkConfig::mainnet();
        assert_eq!(config.default_chain_id, 1);
        assert_eq!(config.network_type, NetworkType::Mainnet);
        assert!(config.is_supported(56));
        assert!(!config.is_supported(5));
    }

    #[test]
    fn test_testnet_config() {
        let config = NetworkConfig::testnet();
        assert_eq!(config.default_chain_id, 5);
        assert_eq!(config.chain(5).unwrap().name, "Goerli");
        assert_eq!(config.chain(1), Err(ConfigError::UnknownChain(1)));
    }

    #[test]
    fn test_custom_config_builder() {
        let governor = address!("1111111111111111111111111111111111111111");
        let token = address!("2222222222222222222222222222222222222222");

        let config = NetworkConfigBuilder::testnet()
            .governance(5, governor, token)
            .build();

        assert_eq!(config.governance(5), Ok((governor, token)));
        assert_eq!(
            NetworkConfig::testnet().governance(5),
            Err(ConfigError::NoGovernor(5))
        );
    }

    #[test]
    fn test_builder_replaces_chain() {
        let mut polygon = ChainConfig::polygon();
        polygon.explorer_url = Cow::Borrowed("https://explorer.example");

        let config = NetworkConfigBuilder::mainnet().chain(polygon).build();

        assert_eq!(config.chains.len(), 4);
        assert_eq!(
            config.chain(137).unwrap().tx_url("0xabc"),
            "https://explorer.example/tx/0xabc"
        );
    }

    #[test]
    fn test_chain_from_toml() {
        let chain: ChainConfig = toml::from_str(
            r#"
            chain_id = 10
            name = "Optimism"
            explorer_url = "https://optimistic.etherscan.io"
            native_symbol = "ETH"
            "#,
        )
        .unwrap();

        assert_eq!(chain.chain_id, 10);
        assert_eq!(chain.governor, None);
    }
}
