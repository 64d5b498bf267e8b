//! Clients for the services the orchestration layer talks to.
//!
//! - JSON-RPC providers for the chains the wallet signs on
//! - The GraphQL API that owns contracts, wallets and metrics
//! - The GraphQL subscription socket pushing metric updates
//! - The scanner HTTP service that indexes contract events

mod api;
mod graphql;
mod scanner;
mod subscription;

use alloy_network::EthereumWallet;
use alloy_primitives::Address;
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_signer_local::PrivateKeySigner;
pub use api::{
    Api, Contract, ContractAutomate, ContractList, ContractListParams, ContractMetric,
    ContractSortColumn, GovernanceVotes, Pagination, Sort, SortOrder, StopLoss,
};
pub use graphql::GraphQlClient;
pub use scanner::{EventListener, ScannerClient, ScannerContract};
pub use subscription::{MetricId, Subscription, SubscriptionClient, WalletMetricUpdated};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    /// Error parsing or validating URLs
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Error connecting to the endpoint
    #[error("Connection error: {0}")]
    Connection(String),

    /// Error with private key
    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    /// Non-success HTTP status
    #[error("Endpoint returned {status}: {body}")]
    Http { status: u16, body: String },

    /// GraphQL `errors` payload or missing `data`
    #[error("GraphQL error: {0}")]
    GraphQl(String),

    /// Response body did not match the expected shape
    #[error("Decode error: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Connection(err.to_string())
        }
    }
}

/// Convenience function to create an ethereum rpc provider from url.
pub async fn create_provider(rpc_url: &str) -> Result<impl Provider + Clone, ClientError> {
    let url = rpc_url
        .parse()
        .map_err(|e| ClientError::InvalidUrl(format!("{}", e)))?;
    let provider = ProviderBuilder::new().connect_http(url);

    Ok(provider)
}

/// Create a provider with wallet signing capability from a private key.
pub fn create_wallet_provider(
    rpc_url: &str,
    private_key: &str,
) -> Result<(Address, impl Provider + Clone), ClientError> {
    let url = rpc_url
        .parse()
        .map_err(|e| ClientError::InvalidUrl(format!("{}", e)))?;

    let signer: PrivateKeySigner = private_key
        .parse()
        .map_err(|e| ClientError::InvalidPrivateKey(format!("{}", e)))?;
    let account = signer.address();

    let wallet = EthereumWallet::from(signer);

    let provider = ProviderBuilder::new().wallet(wallet).connect_http(url);

    Ok((account, provider))
}

/// Type-erased read-only provider, as held by the wallet context.
pub fn connect(rpc_url: &str) -> Result<DynProvider, ClientError> {
    let url = rpc_url
        .parse()
        .map_err(|e| ClientError::InvalidUrl(format!("{}", e)))?;

    Ok(ProviderBuilder::new().connect_http(url).erased())
}

/// Type-erased signing provider and the account it signs for.
pub fn connect_wallet(
    rpc_url: &str,
    private_key: &str,
) -> Result<(Address, DynProvider), ClientError> {
    let (account, provider) = create_wallet_provider(rpc_url, private_key)?;
    Ok((account, provider.erased()))
}
