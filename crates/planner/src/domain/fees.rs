//! Built-in fee decomposition lives with the path builder; this module
//! owns everything that spans the whole cart: buy-in currency selection,
//! pro-rata attribution of the caller's global fees-on-top and per-item
//! conversion into the buy-in currency.

use {
    super::{
        eth::{self, Address, CurrencyInfo, U256},
        order::Protocol,
        path::{BuyIn, FeeOnTop, PathItem},
    },
    crate::infra::{oracle::PriceOracle, router::{FeeAmount, ListingDetail}},
    anyhow::{Context, Result},
    chrono::{DateTime, Utc},
    std::str::FromStr,
};

/// A caller-supplied fee added on top of the cart, denominated in the
/// buy-in currency. Parsed from `recipient:raw_amount` strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalFee {
    pub recipient: Address,
    pub amount: U256,
}

impl FromStr for GlobalFee {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        let (recipient, amount) = raw
            .split_once(':')
            .context("fee must be `recipient:amount`")?;
        Ok(Self {
            recipient: recipient.parse().context("malformed fee recipient")?,
            amount: U256::from_str(amount).context("malformed fee amount")?,
        })
    }
}

/// The currency the whole cart is quoted (and paid) in: the caller's
/// explicit choice, else the one currency every path item already shares,
/// else the chain's native currency.
pub fn select_buy_in(requested: Option<Address>, items: &[PathItem]) -> Address {
    if let Some(currency) = requested {
        return currency;
    }
    let mut currencies = items.iter().map(|item| item.currency);
    match currencies.next() {
        Some(first) if currencies.all(|currency| currency == first) => first,
        _ => eth::NATIVE_TOKEN,
    }
}

/// Whether an item participates in global fee attribution. Blur listings
/// never do; and once any Blur listing is in the cart, OpenSea ERC721
/// listings drop out too so mixed carts do not charge the referrer twice.
fn eligible_for_global_fees(item: &PathItem, cart_has_blur: bool) -> bool {
    if item.protocol == Protocol::Blur {
        return false;
    }
    if cart_has_blur
        && item.protocol == Protocol::Seaport
        && item.token_standard == eth::TokenStandard::Erc721
        && item.source.as_ref().is_some_and(|source| source.is_opensea())
    {
        return false;
    }
    true
}

/// Splits each global fee evenly across the eligible items and records the
/// share on both the path item and its listing detail. Fee amounts landing
/// on an item are converted into that item's currency first, so the item's
/// `total_raw_price` invariant stays within one currency.
pub async fn apply_global_fees(
    items: &mut [PathItem],
    listings: &mut [ListingDetail],
    fees: &[GlobalFee],
    buy_in: Address,
    oracle: &dyn PriceOracle,
    now: DateTime<Utc>,
) -> Result<()> {
    if fees.is_empty() {
        return Ok(());
    }
    let cart_has_blur = items.iter().any(|item| item.protocol == Protocol::Blur);
    let eligible: Vec<usize> = (0..items.len())
        .filter(|i| eligible_for_global_fees(&items[*i], cart_has_blur))
        .collect();
    if eligible.is_empty() {
        return Ok(());
    }

    for fee in fees {
        for &index in &eligible {
            let item = &mut items[index];
            let quantity = U256::from(item.quantity.max(1));
            let mut per_unit = fee.amount.wrapping_div(quantity);
            let mut adjusted = per_unit.wrapping_div(U256::from(eligible.len() as u64));
            if item.currency != buy_in {
                per_unit = convert(oracle, buy_in, item.currency, per_unit, now).await?;
                adjusted = convert(oracle, buy_in, item.currency, adjusted, now).await?;
            }

            let bps = (!item.raw_quote.is_zero())
                .then(|| {
                    per_unit
                        .saturating_mul(U256::from(10_000u64))
                        .wrapping_div(item.raw_quote)
                })
                .and_then(|bps| u32::try_from(bps).ok())
                .filter(|bps| *bps <= 10_000);

            let raw_amount = adjusted.saturating_mul(quantity);
            item.fees_on_top.push(FeeOnTop {
                recipient: fee.recipient,
                bps,
                amount: eth::display_amount(raw_amount, item.currency_decimals),
                raw_amount,
            });
            item.recompute_totals();

            if let Some(listing) = listings
                .iter_mut()
                .find(|listing| listing.order_id == item.order_id && listing.token_id == item.token_id)
            {
                listing.fees.push(FeeAmount {
                    recipient: fee.recipient,
                    amount: raw_amount,
                });
            }
        }
    }
    Ok(())
}

/// Attaches the buy-in conversion block to every item priced in another
/// currency. Display conversions accept stale prices; a missing price is
/// still an error.
pub async fn convert_to_buy_in(
    items: &mut [PathItem],
    buy_in: &CurrencyInfo,
    oracle: &dyn PriceOracle,
    now: DateTime<Utc>,
) -> Result<()> {
    for item in items {
        if item.currency == buy_in.address {
            continue;
        }
        let raw_quote = convert(oracle, item.currency, buy_in.address, item.total_raw_price, now)
            .await?;
        item.buy_in = Some(BuyIn {
            currency: buy_in.address,
            currency_symbol: buy_in.symbol.clone(),
            currency_decimals: buy_in.decimals,
            quote: eth::display_amount(raw_quote, buy_in.decimals),
            raw_quote,
        });
    }
    Ok(())
}

async fn convert(
    oracle: &dyn PriceOracle,
    from: Address,
    to: Address,
    amount: U256,
    now: DateTime<Utc>,
) -> Result<U256> {
    oracle
        .convert(from, to, amount, now, true)
        .await?
        .with_context(|| format!("no conversion rate from {from} to {to}"))
}
