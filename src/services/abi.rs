//! Contract bindings for the product factory, product contracts and ERC-20 tokens

use alloy::sol;

// Factory contract: announces new products
sol! {
    #[sol(rpc)]
    interface IProductFactory {
        event ProductCreated(address indexed product, string name, string underlying, uint256 maxCapacity);
        event ProductUpdated(address indexed product, string name);
    }
}

// Product contract: lifecycle events and state reads
sol! {
    #[sol(rpc)]
    interface IProduct {
        event Deposit(address indexed _user, uint256 _amount, uint256 _tokenId, uint256 _supply);
        event WithdrawPrincipal(address indexed _user, uint256 _amount, uint256 _tokenId, uint256 _supply);
        event WithdrawCoupon(address indexed _user, uint256 _amount);
        event WithdrawOption(address indexed _user, uint256 _amount);
        event OptionPayout(address indexed _user, uint256 _amount);
        event FundAccept(uint256 _timestamp);
        event FundLock(uint256 _timestamp);
        event Issuance(uint256 _timestamp);
        event Mature(uint256 _timestamp);
        event Paused(address account);
        event Unpaused(address account);

        function currentCapacity() external view returns (uint256);
        function maxCapacity() external view returns (uint256);
        function status() external view returns (uint8);
        function tokenAddress() external view returns (address);
        function PT() external view returns (address);
        function market() external view returns (address);
        function currencyAddress() external view returns (address);
        function principalBalance(address _user) external view returns (uint256);
        function issuanceCycle() external view returns (
            uint256 underlyingSpotRef,
            uint256 optionMinOrderSize,
            uint256 participation,
            uint256 unwindMargin,
            string subAccountId
        );
        function storeOptionPosition(address[] _users, uint256[] _amounts) external;
    }
}

// User-facing product entrypoints; only their selectors are used, to classify
// webhook transactions
sol! {
    interface IProductActions {
        function fundAccept() external;
        function fundLock() external;
        function issuance() external;
        function mature() external;
        function deposit(uint256 _amount, bool _isOptionMode) external;
        function withdrawPrincipal() external;
        function optionWithdrawalPaid(uint256 _amount) external;
    }
}

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function decimals() external view returns (uint8);
        function balanceOf(address owner) external view returns (uint256);
    }
}
