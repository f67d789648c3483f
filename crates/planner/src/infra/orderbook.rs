//! Read-only queries against the indexed order/token/mint tables. The
//! ingestion pipeline that populates them is an external collaborator; the
//! planner only ever reads, except for the raw-order ingestion sub-call
//! which is a direct function call into the ingestion API rather than a
//! reentrant HTTP request.

use {
    crate::domain::{
        eth::{Address, CurrencyInfo, TokenRef, U256},
        mint::Mint,
        order::{Order, OrderId},
    },
    anyhow::Result,
};

/// ERC721-C transfer-validator configuration of a collection. Collections
/// enforcing one require the taker to be a verified EOA before transfers
/// settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Erc721cConfig {
    pub transfer_validator: Address,
}

/// Outcome of a per-wallet mint eligibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MintEligibility {
    /// The wallet may mint up to `remaining` more units in this stage.
    Eligible { remaining: u64 },
    /// The stage is allowlist-gated and the wallet is not on it.
    NotAllowlisted,
}

#[async_trait::async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait OrderBook: Send + Sync {
    async fn order(&self, id: OrderId) -> Result<Option<Order>>;

    /// Active sell orders for one token, cheapest first as stored. The
    /// resolver re-sorts; the limit caps pathological token sets.
    async fn active_listings(&self, token: TokenRef, limit: usize) -> Result<Vec<Order>>;

    /// The cheapest `limit` tokens of a collection by floor ask value.
    async fn floor_tokens(&self, collection: Address, limit: usize) -> Result<Vec<TokenRef>>;

    /// How many tokens of the collection currently have at least one
    /// active listing.
    async fn floor_listing_count(&self, collection: Address) -> Result<u64>;

    async fn currency(&self, address: Address) -> Result<CurrencyInfo>;

    /// The maker's balance of one token at request start.
    async fn maker_balance(&self, maker: Address, token: TokenRef) -> Result<u64>;

    /// Open mints of a collection, optionally restricted to one stage.
    async fn open_mints(&self, collection: Address, stage: Option<String>) -> Result<Vec<Mint>>;

    async fn mint_eligibility(&self, mint: Mint, wallet: Address) -> Result<MintEligibility>;

    /// The pool's published marginal price schedule.
    async fn pool_prices(&self, pool: Address) -> Result<Vec<U256>>;

    /// OFAC sanctions screen.
    async fn is_sanctioned(&self, address: Address) -> Result<bool>;

    async fn erc721c_config(&self, contract: Address) -> Result<Option<Erc721cConfig>>;
}

#[async_trait::async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait OrderIngest: Send + Sync {
    /// Validates and persists a raw third-party order, returning the id it
    /// is now indexed under.
    async fn ingest(&self, kind: String, data: serde_json::Value) -> Result<OrderId>;
}
