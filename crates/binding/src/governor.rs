//! Governor Bravo governance bindings.

use alloy_sol_types::sol;

sol! {
    #[sol(rpc)]
    interface IGovernorBravo {
        /// Proposal lifecycle: 0 Pending, 1 Active, 2 Canceled, 3 Defeated,
        /// 4 Succeeded, 5 Queued, 6 Expired, 7 Executed
        function state(uint256 proposalId) external view returns (uint8);

        /// Support: 0 against, 1 for, 2 abstain
        function castVote(uint256 proposalId, uint8 support) external;

        function castVoteWithReason(uint256 proposalId, uint8 support, string calldata reason) external;

        event VoteCast(
            address indexed voter,
            uint256 proposalId,
            uint8 support,
            uint256 votes,
            string reason
        );
    }

    #[sol(rpc)]
    interface IGovernanceToken {
        /// Current delegated voting power (uint96 on-chain)
        function getCurrentVotes(address account) external view returns (uint256);
    }
}

/// `state()` value of a proposal open for voting.
pub const PROPOSAL_ACTIVE: u8 = 1;
