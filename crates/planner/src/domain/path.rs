use {
    super::{
        eth::{self, Address, CurrencyInfo, U256},
        mint::Mint,
        order::{FeeKind, Order, OrderId, Protocol, Source},
        pool::PoolTracker,
    },
    crate::infra::{
        orderbook::OrderBook,
        router::{self, ListingDetail, MintDetail, Router},
    },
    serde::Serialize,
    serde_with::{serde_as, DisplayFromStr},
    std::{collections::HashMap, sync::Arc},
};

/// One fee line of a path item, either baked into the order or a royalty
/// top-up added under normalization.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeBreakdown {
    pub kind: FeeKind,
    pub recipient: Address,
    pub bps: u32,
    pub amount: f64,
    #[serde_as(as = "DisplayFromStr")]
    pub raw_amount: U256,
}

/// A caller-supplied global fee's share attributed to this item.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeOnTop {
    pub recipient: Address,
    /// Absent when the fee exceeds the whole item price (the bps clamp).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bps: Option<u32>,
    pub amount: f64,
    #[serde_as(as = "DisplayFromStr")]
    pub raw_amount: U256,
}

/// Conversion of the item into the request's buy-in currency.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuyIn {
    #[serde(rename = "buyInCurrency")]
    pub currency: Address,
    #[serde(rename = "buyInCurrencySymbol", skip_serializing_if = "Option::is_none")]
    pub currency_symbol: Option<String>,
    #[serde(rename = "buyInCurrencyDecimals")]
    pub currency_decimals: u8,
    #[serde(rename = "buyInQuote")]
    pub quote: f64,
    #[serde_as(as = "DisplayFromStr")]
    #[serde(rename = "buyInRawQuote")]
    pub raw_quote: U256,
}

/// One line of the resolved cart.
#[serde_as]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathItem {
    pub order_id: OrderId,
    pub contract: Address,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<U256>,
    pub quantity: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    pub currency: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency_symbol: Option<String>,
    pub currency_decimals: u8,
    pub quote: f64,
    #[serde_as(as = "DisplayFromStr")]
    pub raw_quote: U256,
    pub built_in_fees: Vec<FeeBreakdown>,
    pub fees_on_top: Vec<FeeOnTop>,
    #[serde(flatten)]
    pub buy_in: Option<BuyIn>,
    pub total_price: f64,
    #[serde_as(as = "DisplayFromStr")]
    pub total_raw_price: U256,
    pub is_native_off_chain_cancellable: bool,
    #[serde(skip)]
    pub protocol: Protocol,
    #[serde(skip)]
    pub token_standard: eth::TokenStandard,
    #[serde(skip)]
    pub unit_price: U256,
}

impl PathItem {
    /// Re-establishes `total_raw_price = raw_quote + sum(fees_on_top)`
    /// after fee attribution.
    pub fn recompute_totals(&mut self) {
        self.total_raw_price = self
            .fees_on_top
            .iter()
            .fold(self.raw_quote, |total, fee| {
                total.saturating_add(fee.raw_amount)
            });
        self.total_price = eth::display_amount(self.total_raw_price, self.currency_decimals);
    }
}

/// Why a candidate could not be appended.
#[derive(Debug, thiserror::Error)]
pub enum AppendError {
    /// The order cannot cover the requested quantity on top of what the
    /// cart already holds.
    #[error("order quantity exhausted")]
    QuantityUnavailable,
    /// Earlier cart lines already consumed the maker's inventory of this
    /// token; the candidate is skipped, not fatal.
    #[error("maker inventory exhausted")]
    MakerInventoryExhausted,
    /// The pool has no (further) published price.
    #[error("pool price schedule exhausted")]
    PoolExhausted,
    /// The calldata pre-commit failed; the append was rolled back.
    #[error(transparent)]
    Build(router::Error),
    #[error(transparent)]
    Boundary(#[from] anyhow::Error),
}

/// Builds the canonical `path` one candidate at a time, doing the
/// quantity, maker-inventory and pool-cursor bookkeeping that later
/// candidates must observe. All mutation is strictly sequenced with
/// candidate iteration; every decision is a function of the previous ones.
pub struct PathBuilder {
    orderbook: Arc<dyn OrderBook>,
    router: Arc<Router>,
    normalize_royalties: bool,
    pools: PoolTracker,
    filled: HashMap<OrderId, u64>,
    maker_inventory: HashMap<(Address, Address, U256), u64>,
    currencies: HashMap<Address, CurrencyInfo>,
    items: Vec<PathItem>,
    listings: Vec<ListingDetail>,
    mints: Vec<MintDetail>,
}

impl PathBuilder {
    pub fn new(orderbook: Arc<dyn OrderBook>, router: Arc<Router>, normalize_royalties: bool) -> Self {
        Self {
            orderbook,
            router,
            normalize_royalties,
            pools: PoolTracker::default(),
            filled: HashMap::new(),
            maker_inventory: HashMap::new(),
            currencies: HashMap::new(),
            items: Vec::new(),
            listings: Vec::new(),
            mints: Vec::new(),
        }
    }

    pub fn items(&self) -> &[PathItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Units committed across the whole path. Grows on every successful
    /// append, merged lines included.
    pub fn total_quantity(&self) -> u64 {
        self.items.iter().map(|item| item.quantity).sum()
    }

    pub fn filled(&self, order: &OrderId) -> u64 {
        self.filled.get(order).copied().unwrap_or(0)
    }

    /// How many more units of this order the cart can still take.
    pub fn available(&self, order: &Order) -> u64 {
        order.quantity_remaining.saturating_sub(self.filled(&order.id))
    }

    pub fn has_blur_listings(&self) -> bool {
        self.items.iter().any(|item| item.protocol == Protocol::Blur)
    }

    pub fn contracts(&self) -> Vec<Address> {
        let mut contracts: Vec<_> = self.items.iter().map(|item| item.contract).collect();
        contracts.sort();
        contracts.dedup();
        contracts
    }

    /// Remaining published depth of a pool, for preview bounds.
    pub async fn pool_depth(&mut self, pool: Address) -> anyhow::Result<u64> {
        self.seed_pool(pool).await?;
        Ok(self.pools.depth(pool) as u64)
    }

    pub fn into_parts(self) -> (Vec<PathItem>, Vec<ListingDetail>, Vec<MintDetail>) {
        (self.items, self.listings, self.mints)
    }

    /// Appends a listing candidate. Pool-backed orders are split into one
    /// line per unit, each priced by its own step of the pool curve.
    pub async fn append_listing(
        &mut self,
        order: &Order,
        token_id: Option<U256>,
        quantity: u64,
    ) -> Result<(), AppendError> {
        if self.available(order) < quantity {
            return Err(AppendError::QuantityUnavailable);
        }
        self.reserve_maker_inventory(order, token_id, quantity)
            .await?;

        if order.pool().is_some() {
            // Pool appends release their own reservations: units already
            // committed to the path keep theirs.
            self.append_pool_units(order, token_id, quantity).await
        } else {
            let result = self
                .append_line(order, token_id, quantity, order.unit_price(self.normalize_royalties))
                .await;
            if result.is_err() {
                self.release_maker_inventory(order, token_id, quantity);
            }
            result
        }
    }

    async fn append_pool_units(
        &mut self,
        order: &Order,
        token_id: Option<U256>,
        quantity: u64,
    ) -> Result<(), AppendError> {
        let pool = order.pool().expect("checked by caller");
        self.seed_pool(pool).await?;
        for unit in 0..quantity {
            let Some(unit_price) = self.pools.next_price(pool) else {
                // Anything already appended for earlier units stays; the
                // caller sees the shortfall through its own accounting.
                self.release_maker_inventory(order, token_id, quantity - unit);
                return Err(AppendError::PoolExhausted);
            };
            if let Err(err) = self.append_line(order, token_id, 1, unit_price).await {
                self.pools.release(pool, 1);
                self.release_maker_inventory(order, token_id, quantity - unit);
                return Err(err);
            }
        }
        Ok(())
    }

    async fn append_line(
        &mut self,
        order: &Order,
        token_id: Option<U256>,
        quantity: u64,
        unit_price: U256,
    ) -> Result<(), AppendError> {
        let detail = self
            .router
            .listing_detail(order, token_id, quantity, unit_price)
            .map_err(AppendError::Build)?;
        let currency = self.currency(order.currency).await?;

        *self.filled.entry(order.id.clone()).or_default() += quantity;

        // The same (order, token) pair appended again merges into its
        // existing line instead of duplicating it.
        let merged = order.pool().is_none()
            && self.merge_into_existing(&order.id, token_id, quantity, unit_price);
        if merged {
            return Ok(());
        }

        let raw_quote = unit_price.saturating_mul(U256::from(quantity));
        let mut item = PathItem {
            order_id: order.id.clone(),
            contract: order.contract,
            token_id,
            quantity,
            source: order.source.clone(),
            currency: currency.address,
            currency_symbol: currency.symbol.clone(),
            currency_decimals: currency.decimals,
            quote: eth::display_amount(raw_quote, currency.decimals),
            raw_quote,
            built_in_fees: self.fee_breakdown(order, unit_price, quantity, currency.decimals),
            fees_on_top: Vec::new(),
            buy_in: None,
            total_price: 0.0,
            total_raw_price: U256::ZERO,
            is_native_off_chain_cancellable: order.is_native_off_chain_cancellable(),
            protocol: order.protocol(),
            token_standard: order.token_standard,
            unit_price,
        };
        item.recompute_totals();
        self.items.push(item);
        self.listings.push(detail);
        Ok(())
    }

    fn merge_into_existing(
        &mut self,
        order_id: &OrderId,
        token_id: Option<U256>,
        quantity: u64,
        unit_price: U256,
    ) -> bool {
        let Some(item) = self
            .items
            .iter_mut()
            .find(|item| item.order_id == *order_id && item.token_id == token_id)
        else {
            return false;
        };
        let extra = unit_price.saturating_mul(U256::from(quantity));
        item.quantity += quantity;
        item.raw_quote = item.raw_quote.saturating_add(extra);
        item.quote = eth::display_amount(item.raw_quote, item.currency_decimals);
        for fee in &mut item.built_in_fees {
            let raw = scale_bps(extra, fee.bps);
            fee.raw_amount = fee.raw_amount.saturating_add(raw);
            fee.amount = eth::display_amount(fee.raw_amount, item.currency_decimals);
        }
        item.recompute_totals();
        if let Some(listing) = self
            .listings
            .iter_mut()
            .find(|listing| listing.order_id == *order_id && listing.token_id == token_id)
        {
            listing.quantity += quantity;
            listing.price = listing.price.saturating_add(extra);
        }
        true
    }

    /// Appends a mint participation. Units of the same mint aggregate
    /// under one line and one transaction.
    pub async fn append_mint(&mut self, mint: &Mint, quantity: u64) -> Result<(), AppendError> {
        let order = mint.to_order();
        if self.available(&order) < quantity {
            return Err(AppendError::QuantityUnavailable);
        }
        let currency = self.currency(mint.currency).await?;
        *self.filled.entry(order.id.clone()).or_default() += quantity;

        let extra = mint.price.saturating_mul(U256::from(quantity));
        if let Some(item) = self
            .items
            .iter_mut()
            .find(|item| item.order_id == order.id)
        {
            item.quantity += quantity;
            item.raw_quote = item.raw_quote.saturating_add(extra);
            item.quote = eth::display_amount(item.raw_quote, item.currency_decimals);
            item.recompute_totals();
            if let Some(detail) = self
                .mints
                .iter_mut()
                .find(|detail| detail.order_id == order.id)
            {
                detail.quantity += quantity;
                detail.price = detail.price.saturating_add(extra);
            }
            return Ok(());
        }

        let mut item = PathItem {
            order_id: order.id.clone(),
            contract: mint.contract,
            token_id: mint.token_id,
            quantity,
            source: None,
            currency: currency.address,
            currency_symbol: currency.symbol.clone(),
            currency_decimals: currency.decimals,
            quote: eth::display_amount(extra, currency.decimals),
            raw_quote: extra,
            built_in_fees: Vec::new(),
            fees_on_top: Vec::new(),
            buy_in: None,
            total_price: 0.0,
            total_raw_price: U256::ZERO,
            is_native_off_chain_cancellable: false,
            protocol: Protocol::Mint,
            token_standard: order.token_standard,
            unit_price: mint.price,
        };
        item.recompute_totals();
        self.items.push(item);
        self.mints.push(MintDetail {
            order_id: order.id,
            contract: mint.contract,
            token_id: mint.token_id,
            quantity,
            currency: mint.currency,
            price: extra,
            tx: mint.tx.clone(),
        });
        Ok(())
    }

    fn fee_breakdown(
        &self,
        order: &Order,
        unit_price: U256,
        quantity: u64,
        decimals: u8,
    ) -> Vec<FeeBreakdown> {
        let total = unit_price.saturating_mul(U256::from(quantity));
        let mut fees: Vec<_> = order
            .built_in_fees
            .iter()
            .map(|fee| {
                let raw_amount = scale_bps(total, fee.bps);
                FeeBreakdown {
                    kind: fee.kind,
                    recipient: fee.recipient,
                    bps: fee.bps,
                    amount: eth::display_amount(raw_amount, decimals),
                    raw_amount,
                }
            })
            .collect();
        if self.normalize_royalties {
            fees.extend(order.missing_royalties.iter().map(|royalty| {
                let raw_amount = royalty.amount.saturating_mul(U256::from(quantity));
                FeeBreakdown {
                    kind: FeeKind::Royalty,
                    recipient: royalty.recipient,
                    bps: derive_bps(royalty.amount, unit_price),
                    amount: eth::display_amount(raw_amount, decimals),
                    raw_amount,
                }
            }));
        }
        fees
    }

    async fn reserve_maker_inventory(
        &mut self,
        order: &Order,
        token_id: Option<U256>,
        quantity: u64,
    ) -> Result<(), AppendError> {
        let Some(token_id) = token_id else {
            return Ok(());
        };
        let key = (order.maker, order.contract, token_id);
        let available = match self.maker_inventory.get(&key) {
            Some(available) => *available,
            None => {
                let balance = self
                    .orderbook
                    .maker_balance(
                        order.maker,
                        eth::TokenRef {
                            contract: order.contract,
                            id: token_id,
                        },
                    )
                    .await?;
                self.maker_inventory.insert(key, balance);
                balance
            }
        };
        if available < quantity {
            return Err(AppendError::MakerInventoryExhausted);
        }
        self.maker_inventory.insert(key, available - quantity);
        Ok(())
    }

    fn release_maker_inventory(&mut self, order: &Order, token_id: Option<U256>, quantity: u64) {
        let Some(token_id) = token_id else { return };
        if let Some(available) = self
            .maker_inventory
            .get_mut(&(order.maker, order.contract, token_id))
        {
            *available += quantity;
        }
    }

    async fn seed_pool(&mut self, pool: Address) -> anyhow::Result<()> {
        if !self.pools.is_seeded(pool) {
            let prices = self.orderbook.pool_prices(pool).await?;
            self.pools.seed(pool, prices);
        }
        Ok(())
    }

    async fn currency(&mut self, address: Address) -> anyhow::Result<CurrencyInfo> {
        if let Some(info) = self.currencies.get(&address) {
            return Ok(info.clone());
        }
        let info = self.orderbook.currency(address).await?;
        self.currencies.insert(address, info.clone());
        Ok(info)
    }
}

pub(crate) fn scale_bps(amount: U256, bps: u32) -> U256 {
    amount
        .saturating_mul(U256::from(bps))
        .wrapping_div(U256::from(10_000u64))
}

fn derive_bps(amount: U256, unit_price: U256) -> u32 {
    if unit_price.is_zero() {
        return 0;
    }
    amount
        .saturating_mul(U256::from(10_000u64))
        .wrapping_div(unit_price)
        .try_into()
        .unwrap_or(u32::MAX)
}
