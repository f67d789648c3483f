use {
    serde::{Deserialize, Serialize},
    serde_with::{serde_as, DisplayFromStr},
};

pub use alloy_primitives::{keccak256, utils::format_units, Address, Bytes, B256, U256};

/// Placeholder ERC20 address for the chain's native currency. The native
/// currency is not an ERC20 token, but the ecosystem-wide convention is to
/// represent it with this address wherever a token address is expected.
pub const NATIVE_TOKEN: Address = Address::repeat_byte(0xee);

/// Reference to one NFT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenRef {
    pub contract: Address,
    pub id: U256,
}

/// The token standard of an NFT contract. ERC721 tokens are unique, so at
/// most one unit of a (contract, id) pair can ever be bought; ERC1155
/// tokens carry quantities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStandard {
    Erc721,
    Erc1155,
}

/// Metadata of a payment currency, resolved from the indexed currency table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrencyInfo {
    pub address: Address,
    pub symbol: Option<String>,
    pub decimals: u8,
}

impl CurrencyInfo {
    pub fn is_native(&self) -> bool {
        self.address == NATIVE_TOKEN
    }
}

/// A transaction payload handed to the client for submission. The planner
/// only ever emits these, it never settles anything on chain itself.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
    #[serde_as(as = "DisplayFromStr")]
    pub value: U256,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub max_fee_per_gas: Option<U256>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub max_priority_fee_per_gas: Option<U256>,
}

/// Renders an on-chain amount as a decimal number in the currency's display
/// unit. Only used for the human-facing `quote` fields; all accounting is
/// done on raw [`U256`] amounts.
pub fn display_amount(amount: U256, decimals: u8) -> f64 {
    format_units(amount, decimals)
        .ok()
        .and_then(|formatted| formatted.parse().ok())
        .unwrap_or_default()
}
