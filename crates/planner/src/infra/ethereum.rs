use {
    crate::domain::eth::{Address, U256},
    anyhow::Result,
};

/// Blur's ETH pool token. Deposits there are spendable on Blur fills, so
/// the native balance check counts BETH when Blur listings are in the cart.
pub const BETH: Address = alloy_primitives::address!("0x0000000000A39bb272e79075ade125fd351887Ac");

/// The handful of chain reads the planner needs. Everything else about the
/// node connection lives with the embedding service.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Ethereum: Send + Sync {
    async fn native_balance(&self, owner: Address) -> Result<U256>;

    async fn erc20_balance(&self, token: Address, owner: Address) -> Result<U256>;

    async fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256>;

    /// Whether `account` already passed the ERC721-C transfer validator's
    /// EOA verification.
    async fn is_verified_eoa(&self, validator: Address, account: Address) -> Result<bool>;

    /// Current fast gas price, used for the response's gas fee summary
    /// when the caller did not pin `maxFeePerGas`.
    async fn gas_price(&self) -> Result<U256>;
}
