//! ERC20 token contract bindings.

use alloy_sol_types::sol;

sol! {
    /// The subset of ERC20 used by deposit and approve adapters.
    #[sol(rpc)]
    interface IERC20 {
        event Approval(
            address indexed owner,
            address indexed spender,
            uint256 value
        );

        function balanceOf(address account) external view returns (uint256);

        function allowance(address owner, address spender) external view returns (uint256);

        function approve(address spender, uint256 amount) external returns (bool);

        function decimals() external view returns (uint8);

        function symbol() external view returns (string memory);
    }
}
