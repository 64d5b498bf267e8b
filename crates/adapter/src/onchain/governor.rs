use super::EthPending;
use crate::{
    ActionKind, AdapterContext, AdapterFactory, AdapterHandle, Capability, Payload,
    PendingTransaction, Precondition, VoteSupport,
};
use alloy_primitives::{Address, U256};
use alloy_provider::DynProvider;
use async_trait::async_trait;
use binding::governor::{IGovernanceToken, IGovernorBravo, PROPOSAL_ACTIVE};
use tracing::info;

struct VoteArgs<'a> {
    proposal_id: U256,
    support: VoteSupport,
    reason: Option<&'a str>,
}

fn vote_args(payload: &Payload) -> Result<VoteArgs<'_>, String> {
    match payload {
        Payload::Vote {
            proposal_id,
            support,
            reason,
        } => Ok(VoteArgs {
            proposal_id: U256::from(*proposal_id),
            support: *support,
            reason: reason.as_deref().filter(|reason| !reason.trim().is_empty()),
        }),
        _ => Err("Vote payload required".to_string()),
    }
}

fn vote_check(state: u8, votes: U256) -> Precondition {
    if state != PROPOSAL_ACTIVE {
        Precondition::rejected("Proposal is not active")
    } else if votes.is_zero() {
        Precondition::rejected("No voting power")
    } else {
        Precondition::Allowed
    }
}

/// Builds the vote group of a governor, with voting power read from `token`.
#[derive(Debug, Clone, Copy)]
pub struct GovernorFactory {
    token: Address,
}

impl GovernorFactory {
    pub const fn new(token: Address) -> Self {
        Self { token }
    }
}

#[async_trait]
impl AdapterFactory for GovernorFactory {
    async fn build(&self, context: &AdapterContext) -> eyre::Result<AdapterHandle> {
        Ok(AdapterHandle::new().with(
            ActionKind::Vote,
            CastVote {
                provider: context.wallet.provider.clone(),
                governor: context.contract,
                token: self.token,
                voter: context.wallet.account,
            },
        ))
    }
}

pub struct CastVote {
    provider: DynProvider,
    governor: Address,
    token: Address,
    voter: Address,
}

#[async_trait]
impl Capability for CastVote {
    async fn can(&self, payload: &Payload) -> eyre::Result<Precondition> {
        let args = match vote_args(payload) {
            Ok(args) => args,
            Err(reason) => return Ok(Precondition::Rejected(reason)),
        };

        let state = IGovernorBravo::new(self.governor, &self.provider)
            .state(args.proposal_id)
            .call()
            .await?;
        let votes = IGovernanceToken::new(self.token, &self.provider)
            .getCurrentVotes(self.voter)
            .call()
            .await?;

        Ok(vote_check(state, votes))
    }

    async fn send(&self, payload: &Payload) -> eyre::Result<Box<dyn PendingTransaction>> {
        let args = vote_args(payload).map_err(|reason| eyre::eyre!(reason))?;
        let governor = IGovernorBravo::new(self.governor, &self.provider);
        let support = args.support.as_u8();

        info!(
            governor = %self.governor,
            proposal_id = %args.proposal_id,
            support,
            "Casting vote"
        );

        let pending = match args.reason {
            Some(reason) => {
                governor
                    .castVoteWithReason(args.proposal_id, support, reason.to_string())
                    .send()
                    .await?
            }
            None => governor.castVote(args.proposal_id, support).send().await?,
        };
        Ok(Box::new(EthPending::new(pending)))
    }

    fn description(&self, payload: &Payload) -> String {
        match vote_args(payload) {
            Ok(args) => format!(
                "Vote {:?} on proposal {} at {}",
                args.support, args.proposal_id, self.governor
            ),
            Err(_) => format!("Vote at {}", self.governor),
        }
    }
}
