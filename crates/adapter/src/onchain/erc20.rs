use super::EthPending;
use crate::{Capability, Payload, PendingTransaction, Precondition};
use alloy_primitives::{Address, U256};
use alloy_provider::DynProvider;
use async_trait::async_trait;
use binding::token::IERC20;
use tracing::info;

/// Convert the payload amount to token units.
///
/// Errors are user-facing rejection reasons.
pub(crate) fn token_units(payload: &Payload, decimals: u8) -> Result<U256, String> {
    let amount = payload
        .amount()
        .ok_or_else(|| "Amount required".to_string())?;
    let units = amount
        .to_units(decimals)
        .ok_or_else(|| format!("Invalid amount: {amount}"))?;
    if units.is_zero() {
        return Err("Amount must be positive".to_string());
    }
    Ok(units)
}

/// ERC20 `approve` of `spender` for the payload amount.
pub struct Approve {
    provider: DynProvider,
    token: Address,
    owner: Address,
    spender: Address,
}

impl Approve {
    pub const fn new(provider: DynProvider, token: Address, owner: Address, spender: Address) -> Self {
        Self {
            provider,
            token,
            owner,
            spender,
        }
    }
}

#[async_trait]
impl Capability for Approve {
    async fn can(&self, payload: &Payload) -> eyre::Result<Precondition> {
        let token = IERC20::new(self.token, &self.provider);
        let decimals = token.decimals().call().await?;

        let units = match token_units(payload, decimals) {
            Ok(units) => units,
            Err(reason) => return Ok(Precondition::Rejected(reason)),
        };

        let allowance = token.allowance(self.owner, self.spender).call().await?;
        if allowance >= units {
            return Ok(Precondition::rejected("Already approved"));
        }
        Ok(Precondition::Allowed)
    }

    async fn send(&self, payload: &Payload) -> eyre::Result<Box<dyn PendingTransaction>> {
        let token = IERC20::new(self.token, &self.provider);
        let decimals = token.decimals().call().await?;
        let units = token_units(payload, decimals).map_err(|reason| eyre::eyre!(reason))?;

        info!(token = %self.token, spender = %self.spender, %units, "Approving token");

        let pending = token.approve(self.spender, units).send().await?;
        Ok(Box::new(EthPending::new(pending)))
    }

    fn description(&self, payload: &Payload) -> String {
        let amount = payload.amount().map(ToString::to_string).unwrap_or_default();
        format!("Approve {amount} of {} for {}", self.token, self.spender)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amount::Amount;

    #[test]
    fn test_token_units() {
        let payload = Payload::Amount(Amount::parse("1.5"));
        assert_eq!(
            token_units(&payload, 18).unwrap(),
            U256::from(1_500_000_000_000_000_000u128)
        );
        assert_eq!(token_units(&payload, 6).unwrap(), U256::from(1_500_000u64));
    }

    #[test]
    fn test_token_units_rejections() {
        assert_eq!(token_units(&Payload::None, 18).unwrap_err(), "Amount required");
        assert_eq!(
            token_units(&Payload::Amount(Amount::zero()), 18).unwrap_err(),
            "Amount must be positive"
        );
        assert!(token_units(&Payload::Amount(Amount::nan()), 18)
            .unwrap_err()
            .starts_with("Invalid amount"));
        assert!(token_units(&Payload::Amount(Amount::parse("-1")), 18).is_err());
    }
}
