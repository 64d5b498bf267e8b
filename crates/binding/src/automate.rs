//! Restake automation contract bindings.
//!
//! An automate contract is deployed per user and staking contract. The owner
//! deposits staking tokens into it and the automation service restakes the
//! rewards. `run` restakes on demand and `refund` returns the staked tokens to
//! the owner.

use alloy_sol_types::sol;

sol! {
    #[sol(rpc)]
    interface IAutomate {
        /// Account allowed to deposit and refund
        function owner() external view returns (address);

        /// Token accepted by `deposit`
        function stakingToken() external view returns (address);

        /// Amount currently staked through the automate contract
        function staked() external view returns (uint256);

        /// Pull `amount` staking tokens from the owner and stake them
        function deposit(uint256 amount) external;

        /// Unstake everything and send it back to the owner
        function refund() external;

        /// Claim the pending rewards and restake them now
        function run() external;
    }
}
