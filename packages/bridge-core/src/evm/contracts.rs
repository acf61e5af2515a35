//! ERC20 bindings used for token-pair releases, deposits and balance queries.

use alloy::sol;

sol! {
    /// Standard ERC20 interface
    #[sol(rpc)]
    contract ERC20 {
        function decimals() external view returns (uint8);
        function totalSupply() external view returns (uint256);
        function balanceOf(address account) external view returns (uint256);
        function transfer(address to, uint256 amount) external returns (bool);

        event Transfer(address indexed from, address indexed to, uint256 value);
    }
}
