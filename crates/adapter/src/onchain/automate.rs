//! Restake automation adapter.
//!
//! Moving a position into an automate contract is a two-step flow: approve the
//! staking token for the automate contract, then deposit. `refund` unwinds it
//! and `run` restakes the rewards without waiting for the automation service.

use super::{erc20::token_units, Approve, EthPending};
use crate::{
    ActionKind, AdapterContext, AdapterFactory, AdapterHandle, Capability, Payload,
    PendingTransaction, Precondition,
};
use alloy_primitives::{Address, U256};
use alloy_provider::DynProvider;
use async_trait::async_trait;
use binding::{automate::IAutomate, token::IERC20};
use tracing::{debug, info};

fn deposit_check(units: U256, balance: U256, allowance: U256) -> Precondition {
    if balance < units {
        Precondition::rejected("Insufficient balance")
    } else if allowance < units {
        Precondition::rejected("Insufficient allowance, approve first")
    } else {
        Precondition::Allowed
    }
}

fn refund_check(owner: Address, account: Address, staked: U256) -> Precondition {
    if owner != account {
        Precondition::rejected("Only the owner can refund")
    } else if staked.is_zero() {
        Precondition::rejected("Nothing to refund")
    } else {
        Precondition::Allowed
    }
}

fn run_check(staked: U256) -> Precondition {
    if staked.is_zero() {
        Precondition::rejected("Not enough money")
    } else {
        Precondition::Allowed
    }
}

/// Builds the approve, deposit, refund and run groups of an automate contract.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutomateFactory;

#[async_trait]
impl AdapterFactory for AutomateFactory {
    async fn build(&self, context: &AdapterContext) -> eyre::Result<AdapterHandle> {
        let provider = context.wallet.provider.clone();
        let owner = context.wallet.account;
        let automate = context.contract;

        let token = IAutomate::new(automate, &provider)
            .stakingToken()
            .call()
            .await?;
        debug!(%automate, %token, "Loaded automate contract");

        Ok(AdapterHandle::new()
            .with(
                ActionKind::Approve,
                Approve::new(provider.clone(), token, owner, automate),
            )
            .with(
                ActionKind::Deposit,
                AutomateDeposit {
                    provider: provider.clone(),
                    automate,
                    token,
                    owner,
                },
            )
            .with(
                ActionKind::Refund,
                AutomateRefund {
                    provider: provider.clone(),
                    automate,
                    account: owner,
                },
            )
            .with(ActionKind::Run, AutomateRun { provider, automate }))
    }
}

pub struct AutomateDeposit {
    provider: DynProvider,
    automate: Address,
    token: Address,
    owner: Address,
}

impl AutomateDeposit {
    async fn units(&self, payload: &Payload) -> eyre::Result<Result<U256, String>> {
        let decimals = IERC20::new(self.token, &self.provider)
            .decimals()
            .call()
            .await?;
        Ok(token_units(payload, decimals))
    }
}

#[async_trait]
impl Capability for AutomateDeposit {
    async fn can(&self, payload: &Payload) -> eyre::Result<Precondition> {
        let units = match self.units(payload).await? {
            Ok(units) => units,
            Err(reason) => return Ok(Precondition::Rejected(reason)),
        };

        let token = IERC20::new(self.token, &self.provider);
        let balance = token.balanceOf(self.owner).call().await?;
        let allowance = token.allowance(self.owner, self.automate).call().await?;

        Ok(deposit_check(units, balance, allowance))
    }

    async fn send(&self, payload: &Payload) -> eyre::Result<Box<dyn PendingTransaction>> {
        let units = self.units(payload).await?.map_err(|reason| eyre::eyre!(reason))?;

        info!(automate = %self.automate, %units, "Depositing into automate contract");

        let pending = IAutomate::new(self.automate, &self.provider)
            .deposit(units)
            .send()
            .await?;
        Ok(Box::new(EthPending::new(pending)))
    }

    fn description(&self, payload: &Payload) -> String {
        let amount = payload.amount().map(ToString::to_string).unwrap_or_default();
        format!("Deposit {amount} into automate {}", self.automate)
    }
}

pub struct AutomateRefund {
    provider: DynProvider,
    automate: Address,
    account: Address,
}

#[async_trait]
impl Capability for AutomateRefund {
    async fn can(&self, _payload: &Payload) -> eyre::Result<Precondition> {
        let automate = IAutomate::new(self.automate, &self.provider);
        let owner = automate.owner().call().await?;
        let staked = automate.staked().call().await?;

        Ok(refund_check(owner, self.account, staked))
    }

    async fn send(&self, _payload: &Payload) -> eyre::Result<Box<dyn PendingTransaction>> {
        info!(automate = %self.automate, "Refunding automate contract");

        let pending = IAutomate::new(self.automate, &self.provider)
            .refund()
            .send()
            .await?;
        Ok(Box::new(EthPending::new(pending)))
    }

    fn description(&self, _payload: &Payload) -> String {
        format!("Refund automate {}", self.automate)
    }
}

pub struct AutomateRun {
    provider: DynProvider,
    automate: Address,
}

#[async_trait]
impl Capability for AutomateRun {
    async fn can(&self, _payload: &Payload) -> eyre::Result<Precondition> {
        let staked = IAutomate::new(self.automate, &self.provider)
            .staked()
            .call()
            .await?;
        Ok(run_check(staked))
    }

    async fn send(&self, _payload: &Payload) -> eyre::Result<Box<dyn PendingTransaction>> {
        info!(automate = %self.automate, "Running automate contract");

        let pending = IAutomate::new(self.automate, &self.provider)
            .run()
            .send()
            .await?;
        Ok(Box::new(EthPending::new(pending)))
    }

    fn description(&self, _payload: &Payload) -> String {
        format!("Restake rewards of automate {}", self.automate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    const OWNER: Address = address!("00000000000000000000000000000000000a11ce");
    const OTHER: Address = address!("0000000000000000000000000000000000000b0b");

    #[test]
    fn test_deposit_check() {
        let units = U256::from(100);
        assert_eq!(
            deposit_check(units, U256::from(100), U256::from(100)),
            Precondition::Allowed
        );
        assert_eq!(
            deposit_check(units, U256::from(99), U256::MAX),
            Precondition::rejected("Insufficient balance")
        );
        assert_eq!(
            deposit_check(units, U256::from(500), U256::from(10)),
            Precondition::rejected("Insufficient allowance, approve first")
        );
    }

    #[test]
    fn test_refund_check() {
        assert_eq!(refund_check(OWNER, OWNER, U256::from(1)), Precondition::Allowed);
        assert_eq!(
            refund_check(OWNER, OTHER, U256::from(1)),
            Precondition::rejected("Only the owner can refund")
        );
        assert_eq!(
            refund_check(OWNER, OWNER, U256::ZERO),
            Precondition::rejected("Nothing to refund")
        );
    }

    #[test]
    fn test_run_check() {
        assert_eq!(run_check(U256::from(1)), Precondition::Allowed);
        assert_eq!(run_check(U256::ZERO), Precondition::rejected("Not enough money"));
    }
}
