//! Typed operations against the dashboard GraphQL API.

use crate::{ClientError, GraphQlClient};
use alloy_primitives::Address;
use amount::Amount;
use serde::{Deserialize, Serialize};
use serde_json::json;

const CONTRACT_LIST: &str = r#"
query StakingContractList(
  $filter: ProtocolQueryFilterInputType!
  $contractFilter: ContractListFilterInputType
  $contractSort: [ContractListSortInputType!]
  $contractPagination: ContractListPaginationInputType
) {
  protocol(filter: $filter) {
    contracts(filter: $contractFilter, sort: $contractSort, pagination: $contractPagination) {
      list {
        id
        adapter
        name
        address
        network
        blockchain
        hidden
        automate { adapters autorestake }
        metric { tvl aprYear myStaked myEarned }
      }
      pagination { count }
    }
  }
}
"#;

const CONTRACT_DELETE: &str = r#"
mutation StakingContractDelete($id: UuidType!) {
  contractDelete(id: $id)
}
"#;

const CONTRACT_WALLET_LINK: &str = r#"
mutation StakingConnectWallet($contract: UuidType!, $wallet: UuidType!) {
  contractWalletLink(contract: $contract, wallet: $wallet)
}
"#;

const CONTRACT_WALLET_UNLINK: &str = r#"
mutation StakingDisconnectWallet($contract: UuidType!, $wallet: UuidType!) {
  contractWalletUnlink(contract: $contract, wallet: $wallet)
}
"#;

const CONNECTED_CONTRACTS: &str = r#"
query StakingConnectedContracts($protocol: UuidType!) {
  me {
    wallets {
      list {
        contracts(filter: { protocol: $protocol }) {
          list { id }
        }
      }
    }
  }
}
"#;

const STOP_LOSS_ENABLE: &str = r#"
mutation AutomateContractStopLossEnable($input: AutomateContractStopLossEnableInputType!) {
  automateContractStopLossEnable(input: $input)
}
"#;

const STOP_LOSS_DISABLE: &str = r#"
mutation AutomateContractStopLossDisable($input: AutomateContractStopLossDisableInputType!) {
  automateContractStopLossDisable(input: $input)
}
"#;

const WALLET_METRIC_SCAN: &str = r#"
mutation WalletMetricScan($wallet: UuidType!, $contract: UuidType!, $txId: String) {
  walletMetricScan(wallet: $wallet, contract: $contract, txId: $txId)
}
"#;

const GOVERNANCE_VOTES: &str = r#"
query GovernanceVotes($filter: GovVotesFilterInputType!) {
  govVotes(filter: $filter) {
    votes
    delegates
  }
}
"#;

/// Offset/limit page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub offset: u64,
    pub limit: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContractSortColumn {
    Id,
    Name,
    Address,
    CreatedAt,
    Tvl,
    AprYear,
    MyStaked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    pub column: ContractSortColumn,
    pub order: SortOrder,
}

/// Parameters of the staking contract list query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractListParams {
    pub protocol_id: String,
    pub hidden: Option<bool>,
    pub pagination: Pagination,
    /// Primary sort; ties are broken by APR then name.
    pub sort: Option<Sort>,
}

impl ContractListParams {
    pub fn new(protocol_id: impl Into<String>) -> Self {
        Self {
            protocol_id: protocol_id.into(),
            hidden: None,
            pagination: Pagination::default(),
            sort: None,
        }
    }

    fn sort_columns(&self) -> Vec<Sort> {
        let primary = self.sort.unwrap_or(Sort {
            column: ContractSortColumn::MyStaked,
            order: SortOrder::Desc,
        });

        vec![
            primary,
            Sort {
                column: ContractSortColumn::AprYear,
                order: SortOrder::Desc,
            },
            Sort {
                column: ContractSortColumn::Name,
                order: SortOrder::Asc,
            },
        ]
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContractAutomate {
    #[serde(default)]
    pub adapters: Vec<String>,
    /// Contract kind of the restake automation, when available
    pub autorestake: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractMetric {
    pub tvl: Amount,
    pub apr_year: Amount,
    pub my_staked: Amount,
    pub my_earned: Amount,
}

/// A staking contract as listed under a protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub id: String,
    pub adapter: String,
    pub name: String,
    pub address: String,
    pub network: String,
    pub blockchain: String,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub automate: ContractAutomate,
    pub metric: ContractMetric,
}

#[derive(Debug, Clone, Default)]
pub struct ContractList {
    pub list: Vec<Contract>,
    pub count: u64,
}

/// Swap route and limits the backend sells a position through when it falls
/// below `amount_out`.
#[derive(Debug, Clone)]
pub struct StopLoss {
    pub path: Vec<Address>,
    pub amount_out: Amount,
    pub amount_out_min: Amount,
}

impl StopLoss {
    fn variables(&self, contract: &str) -> serde_json::Value {
        json!({
            "input": {
                "contract": contract,
                "path": self.path,
                "amountOut": self.amount_out,
                "amountOutMin": self.amount_out_min,
            }
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GovernanceVotes {
    pub votes: Amount,
    pub delegates: String,
}

/// Typed facade over [`GraphQlClient`].
#[derive(Debug, Clone)]
pub struct Api {
    graphql: GraphQlClient,
}

impl Api {
    pub const fn new(graphql: GraphQlClient) -> Self {
        Self { graphql }
    }

    /// Contracts of a protocol, one page at a time.
    pub async fn contract_list(
        &self,
        params: &ContractListParams,
    ) -> Result<ContractList, ClientError> {
        #[derive(Deserialize)]
        struct Data {
            protocol: Option<Protocol>,
        }
        #[derive(Deserialize)]
        struct Protocol {
            contracts: Contracts,
        }
        #[derive(Deserialize)]
        struct Contracts {
            list: Vec<Contract>,
            pagination: Count,
        }
        #[derive(Deserialize)]
        struct Count {
            count: u64,
        }

        let variables = json!({
            "filter": { "id": params.protocol_id },
            "contractFilter": { "hidden": params.hidden },
            "contractPagination": params.pagination,
            "contractSort": params.sort_columns(),
        });

        let data: Data = self.graphql.execute(CONTRACT_LIST, variables).await?;

        Ok(data
            .protocol
            .map(|protocol| ContractList {
                list: protocol.contracts.list,
                count: protocol.contracts.pagination.count,
            })
            .unwrap_or_default())
    }

    pub async fn contract_delete(&self, id: &str) -> Result<bool, ClientError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Data {
            contract_delete: bool,
        }

        let data: Data = self
            .graphql
            .execute(CONTRACT_DELETE, json!({ "id": id }))
            .await?;
        Ok(data.contract_delete)
    }

    /// Link a user wallet to a contract so its metrics get collected.
    pub async fn connect_wallet(&self, contract: &str, wallet: &str) -> Result<bool, ClientError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Data {
            contract_wallet_link: bool,
        }

        let data: Data = self
            .graphql
            .execute(
                CONTRACT_WALLET_LINK,
                json!({ "contract": contract, "wallet": wallet }),
            )
            .await?;
        Ok(data.contract_wallet_link)
    }

    pub async fn disconnect_wallet(
        &self,
        contract: &str,
        wallet: &str,
    ) -> Result<bool, ClientError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Data {
            contract_wallet_unlink: bool,
        }

        let data: Data = self
            .graphql
            .execute(
                CONTRACT_WALLET_UNLINK,
                json!({ "contract": contract, "wallet": wallet }),
            )
            .await?;
        Ok(data.contract_wallet_unlink)
    }

    /// Ids of the protocol's contracts linked to any of the user's wallets.
    pub async fn connected_contracts(&self, protocol_id: &str) -> Result<Vec<String>, ClientError> {
        #[derive(Deserialize)]
        struct Data {
            me: Option<Me>,
        }
        #[derive(Deserialize)]
        struct Me {
            wallets: List<Wallet>,
        }
        #[derive(Deserialize)]
        struct Wallet {
            contracts: List<Id>,
        }
        #[derive(Deserialize)]
        struct List<T> {
            list: Vec<T>,
        }
        #[derive(Deserialize)]
        struct Id {
            id: String,
        }

        let data: Data = self
            .graphql
            .execute(CONNECTED_CONTRACTS, json!({ "protocol": protocol_id }))
            .await?;

        let mut ids: Vec<String> = data
            .me
            .into_iter()
            .flat_map(|me| me.wallets.list)
            .flat_map(|wallet| wallet.contracts.list)
            .map(|contract| contract.id)
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    /// Arm the stop-loss of an automate contract.
    pub async fn stop_loss_enable(
        &self,
        contract: &str,
        stop_loss: &StopLoss,
    ) -> Result<bool, ClientError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Data {
            automate_contract_stop_loss_enable: bool,
        }

        let data: Data = self
            .graphql
            .execute(STOP_LOSS_ENABLE, stop_loss.variables(contract))
            .await?;
        Ok(data.automate_contract_stop_loss_enable)
    }

    pub async fn stop_loss_disable(&self, contract: &str) -> Result<bool, ClientError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Data {
            automate_contract_stop_loss_disable: bool,
        }

        let data: Data = self
            .graphql
            .execute(
                STOP_LOSS_DISABLE,
                json!({ "input": { "contract": contract } }),
            )
            .await?;
        Ok(data.automate_contract_stop_loss_disable)
    }

    /// Ask the backend to rescan a wallet's position after a transaction.
    pub async fn wallet_metric_scan(
        &self,
        wallet: &str,
        contract: &str,
        tx_id: &str,
    ) -> Result<bool, ClientError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Data {
            wallet_metric_scan: bool,
        }

        let data: Data = self
            .graphql
            .execute(
                WALLET_METRIC_SCAN,
                json!({ "wallet": wallet, "contract": contract, "txId": tx_id }),
            )
            .await?;
        Ok(data.wallet_metric_scan)
    }

    /// Voting power of `wallet` on the governance token of `network`.
    pub async fn governance_votes(
        &self,
        network: u64,
        contract: &str,
        wallet: &str,
    ) -> Result<Option<GovernanceVotes>, ClientError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Data {
            gov_votes: Option<GovernanceVotes>,
        }

        let data: Data = self
            .graphql
            .execute(
                GOVERNANCE_VOTES,
                json!({
                    "filter": { "network": network, "contract": contract, "wallet": wallet }
                }),
            )
            .await?;
        Ok(data.gov_votes)
    }
}
