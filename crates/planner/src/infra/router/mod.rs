//! Dispatch to the per-protocol calldata builders and aggregation of the
//! bundles they produce. The builders themselves are external pure
//! functions; this driver owns grouping, per-order failure accounting,
//! swap price validation, the mint router/direct fallback and the final
//! balance check.

use {
    crate::{
        domain::{
            eth::{self, Address, TokenStandard, U256},
            order::{Kind, Order, OrderId, Protocol, Source},
            plan::{ErrorCode, ItemError, SignRequest},
        },
        infra::ethereum::{self, Ethereum},
    },
    anyhow::{Context, Result},
    itertools::Itertools,
    serde::{Deserialize, Serialize},
    std::{
        collections::{BTreeMap, HashMap, HashSet},
        sync::Arc,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwapProvider {
    #[default]
    Uniswap,
    Relay,
}

/// Everything a calldata builder needs to encode one fill, pre-committed
/// by the path builder while the cart is assembled.
#[derive(Debug, Clone)]
pub struct ListingDetail {
    pub order_id: OrderId,
    pub kind: Kind,
    pub contract: Address,
    pub token_id: Option<U256>,
    pub token_standard: TokenStandard,
    pub quantity: u64,
    pub currency: Address,
    /// Total raw price of the line (unit price x quantity).
    pub price: U256,
    pub source: Option<Source>,
    /// Fees-on-top the fill must forward, appended by the fee engine.
    pub fees: Vec<FeeAmount>,
}

impl ListingDetail {
    pub fn protocol(&self) -> Protocol {
        self.kind.protocol()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeAmount {
    pub recipient: Address,
    pub amount: U256,
}

/// One mint participation to execute.
#[derive(Debug, Clone)]
pub struct MintDetail {
    pub order_id: OrderId,
    pub contract: Address,
    pub token_id: Option<U256>,
    pub quantity: u64,
    pub currency: Address,
    /// Total raw price of the line.
    pub price: U256,
    pub tx: eth::Transaction,
}

impl MintDetail {
    /// ERC20-priced mints need an approval, which forces direct filling.
    pub fn needs_approval(&self) -> bool {
        self.currency != eth::NATIVE_TOKEN
    }
}

/// An ERC20 approval the taker must hold before the fill settles.
#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub currency: Address,
    pub owner: Address,
    pub spender: Address,
    pub amount: U256,
    pub tx: eth::Transaction,
}

/// An ERC20 permit that can replace the approval transaction when the
/// caller opted into permits.
#[derive(Debug, Clone)]
pub struct PermitRequest {
    pub currency: Address,
    pub owner: Address,
    pub spender: Address,
    pub amount: U256,
    pub domain: serde_json::Value,
    pub types: serde_json::Value,
    pub value: serde_json::Value,
}

/// Byte range inside a bundle's calldata reserved for a taker signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalldataSlot {
    pub offset: usize,
    pub len: usize,
}

/// A taker-side signature a protocol requires inside the fill calldata.
#[derive(Debug, Clone)]
pub struct PreSignatureRequest {
    /// E.g. `payment-processor-take-order`.
    pub kind: String,
    /// Uniquely identifies the signed payload within the request; part of
    /// the content-addressed store id.
    pub unique_id: String,
    pub sign: SignRequest,
    pub order_ids: Vec<OrderId>,
    /// Where the signature lands once the client produced it.
    pub slot: CalldataSlot,
}

/// A currency conversion embedded in a bundle.
#[derive(Debug, Clone)]
pub struct SwapLeg {
    pub to_token: Address,
    /// Amount the swap is quoted to return.
    pub out_amount: U256,
    /// The path items this swap funds.
    pub order_ids: Vec<OrderId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxTags {
    pub listings: u32,
    pub mints: u32,
    pub swaps: u32,
    pub fees_on_top: u32,
}

impl TxTags {
    /// Swap-only transactions get their own step ahead of the sale.
    pub fn is_swap_only(&self) -> bool {
        self.swaps > 0 && self.listings == 0 && self.mints == 0
    }
}

/// One transaction the client will submit, with everything that must
/// happen before it.
#[derive(Debug, Clone)]
pub struct TxBundle {
    pub tx: eth::Transaction,
    pub approvals: Vec<ApprovalRequest>,
    pub permits: Vec<PermitRequest>,
    pub pre_signatures: Vec<PreSignatureRequest>,
    pub swaps: Vec<SwapLeg>,
    pub tags: TxTags,
    pub order_ids: Vec<OrderId>,
    pub gas_estimate: u64,
}

impl TxBundle {
    /// Splices a cached taker signature into the reserved calldata slot.
    pub fn inject_pre_signature(&mut self, slot: CalldataSlot, signature: &str) -> Result<()> {
        let bytes = alloy_primitives::hex::decode(signature).context("malformed signature")?;
        anyhow::ensure!(bytes.len() == slot.len, "signature length mismatch");
        let mut data = self.tx.data.to_vec();
        let range = slot.offset..slot.offset + slot.len;
        anyhow::ensure!(data.len() >= range.end, "signature slot out of bounds");
        data[range].copy_from_slice(&bytes);
        self.tx.data = data.into();
        Ok(())
    }
}

/// Caller context forwarded to every builder.
#[derive(Debug, Clone, Default)]
pub struct FillOptions {
    pub taker: Address,
    pub relayer: Option<Address>,
    pub buy_in_currency: Address,
    pub source: Option<String>,
    pub referrer: Option<Address>,
    /// Relay channel for gasless forwarding, when the embedding service
    /// supports one.
    pub forwarder_channel: Option<String>,
    pub swap_provider: SwapProvider,
    pub conduit_key: Option<eth::B256>,
    pub force_router: bool,
    pub use_permit: bool,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
    /// Opaque per-protocol API keys, forwarded untouched.
    pub api_keys: BTreeMap<String, String>,
}

impl FillOptions {
    /// Fills are submitted by the relayer when one is set.
    pub fn sender(&self) -> Address {
        self.relayer.unwrap_or(self.taker)
    }
}

/// Encodes fills for one protocol family. Implementations are pure: same
/// details, same bundles.
#[async_trait::async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait FillBuilder: Send + Sync {
    /// Pre-commits one candidate to a listing detail. Failing here rolls
    /// the candidate back out of the path before anything is emitted.
    fn listing_detail(
        &self,
        order: &Order,
        token_id: Option<U256>,
        quantity: u64,
        unit_price: U256,
    ) -> Result<ListingDetail>;

    async fn fill(&self, details: &[ListingDetail], opts: &FillOptions) -> Result<Vec<TxBundle>>;
}

#[derive(Debug, Clone)]
pub struct MintFill {
    pub bundles: Vec<TxBundle>,
    /// Whether the mints were routed through the aggregation router (as
    /// opposed to direct contract calls).
    pub via_router: bool,
}

#[async_trait::async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait MintFiller: Send + Sync {
    async fn fill_mints(
        &self,
        details: &[MintDetail],
        opts: &FillOptions,
        force_direct: bool,
    ) -> Result<MintFill>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub contract: Address,
    pub token_id: Option<U256>,
    pub from: Address,
    pub to: Address,
}

#[async_trait::async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait Simulator: Send + Sync {
    /// NFT `Transfer` events the transaction would emit.
    async fn transfers(&self, tx: &eth::Transaction, from: Address) -> Result<Vec<TransferEvent>>;
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no calldata builder for protocol {0}")]
    UnsupportedProtocol(Protocol),
    #[error("calldata build failed for order {0}")]
    Build(OrderId, #[source] anyhow::Error),
    #[error("swap received amount outside the slippage tolerance")]
    SwapOutsideTolerance,
    #[error("mint simulation failed")]
    MintSimulationFailed,
    #[error("insufficient balance to cover the cart")]
    BalanceTooLow,
    #[error(transparent)]
    Boundary(#[from] anyhow::Error),
}

#[derive(Debug, Default)]
pub struct FillOutput {
    pub bundles: Vec<TxBundle>,
    /// Order ids that made it into a bundle; the path is filtered down to
    /// these.
    pub success: HashSet<OrderId>,
    pub errors: Vec<ItemError>,
}

pub struct Router {
    builders: HashMap<Protocol, Arc<dyn FillBuilder>>,
    mint_filler: Arc<dyn MintFiller>,
    simulator: Arc<dyn Simulator>,
    eth: Arc<dyn Ethereum>,
    /// Tolerance for swap-received amounts, as bps of the expected quote.
    slippage_bps: u32,
}

impl Router {
    pub fn new(
        builders: HashMap<Protocol, Arc<dyn FillBuilder>>,
        mint_filler: Arc<dyn MintFiller>,
        simulator: Arc<dyn Simulator>,
        eth: Arc<dyn Ethereum>,
        slippage_bps: u32,
    ) -> Self {
        Self {
            builders,
            mint_filler,
            simulator,
            eth,
            slippage_bps,
        }
    }

    fn builder(&self, protocol: Protocol) -> Result<&Arc<dyn FillBuilder>, Error> {
        self.builders
            .get(&protocol)
            .ok_or(Error::UnsupportedProtocol(protocol))
    }

    /// Pre-commit hook used by the path builder for every candidate.
    pub fn listing_detail(
        &self,
        order: &Order,
        token_id: Option<U256>,
        quantity: u64,
        unit_price: U256,
    ) -> Result<ListingDetail, Error> {
        self.builder(order.protocol())?
            .listing_detail(order, token_id, quantity, unit_price)
            .map_err(|err| Error::Build(order.id.clone(), err))
    }

    /// Builds every fill transaction. `expected_costs` maps order ids to
    /// their total buy-in cost, the reference for swap validation.
    pub async fn fill(
        &self,
        listings: &[ListingDetail],
        mints: &[MintDetail],
        opts: &FillOptions,
        partial: bool,
        expected_costs: &HashMap<OrderId, U256>,
    ) -> Result<FillOutput, Error> {
        let mut output = FillOutput::default();

        // Group by protocol, preserving the order of first appearance so
        // identical requests produce identical bundle sequences.
        let groups = listings
            .iter()
            .map(|detail| (detail.protocol(), detail.clone()))
            .into_group_map()
            .into_iter()
            .sorted_by_key(|(protocol, _)| {
                listings
                    .iter()
                    .position(|detail| detail.protocol() == *protocol)
            })
            .collect::<Vec<_>>();

        for (protocol, details) in groups {
            let builder = self.builder(protocol)?;
            match builder.fill(&details, opts).await {
                Ok(bundles) => {
                    for bundle in bundles {
                        self.validate_swaps(&bundle, expected_costs, partial, &mut output)?;
                    }
                }
                Err(err) if partial => {
                    tracing::warn!(%protocol, ?err, "fill builder failed, dropping its orders");
                    output.errors.extend(details.iter().map(|detail| {
                        ItemError::new(Some(detail.order_id.clone()), ErrorCode::CalldataBuildFailed)
                    }));
                }
                Err(err) => {
                    return Err(Error::Build(
                        details[0].order_id.clone(),
                        err.context("fill builder failed"),
                    ));
                }
            }
        }

        if !mints.is_empty() {
            let fill = self.fill_mints(mints, opts, partial, &mut output).await?;
            if let Some(fill) = fill {
                for bundle in fill.bundles {
                    output.success.extend(bundle.order_ids.iter().cloned());
                    output.bundles.push(bundle);
                }
            }
        }

        Ok(output)
    }

    fn validate_swaps(
        &self,
        bundle: &TxBundle,
        expected_costs: &HashMap<OrderId, U256>,
        partial: bool,
        output: &mut FillOutput,
    ) -> Result<(), Error> {
        for swap in &bundle.swaps {
            let expected = swap
                .order_ids
                .iter()
                .filter_map(|id| expected_costs.get(id))
                .fold(U256::ZERO, |total, cost| total.saturating_add(*cost));
            if !self.within_slippage(swap.out_amount, expected) {
                tracing::warn!(
                    out = %swap.out_amount,
                    %expected,
                    "swap quote outside tolerance"
                );
                if partial {
                    output.errors.extend(bundle.order_ids.iter().map(|id| {
                        ItemError::new(Some(id.clone()), ErrorCode::SwapOutsideTolerance)
                    }));
                    return Ok(());
                }
                return Err(Error::SwapOutsideTolerance);
            }
        }
        output.success.extend(bundle.order_ids.iter().cloned());
        output.bundles.push(bundle.clone());
        Ok(())
    }

    fn within_slippage(&self, received: U256, expected: U256) -> bool {
        if expected.is_zero() {
            return true;
        }
        let tolerance = expected
            .saturating_mul(U256::from(self.slippage_bps))
            .wrapping_div(U256::from(10_000u64));
        received >= expected.saturating_sub(tolerance)
            && received <= expected.saturating_add(tolerance)
    }

    async fn fill_mints(
        &self,
        mints: &[MintDetail],
        opts: &FillOptions,
        partial: bool,
        output: &mut FillOutput,
    ) -> Result<Option<MintFill>, Error> {
        // ERC20-priced mints carry an approval the router cannot forward;
        // fill those directly from the start.
        let force_direct = mints.iter().any(MintDetail::needs_approval);
        let fill = self.mint_filler.fill_mints(mints, opts, force_direct).await;
        let fill = match fill {
            Ok(fill) => fill,
            Err(err) if partial => {
                tracing::warn!(?err, "mint fill failed, dropping mints");
                output.errors.extend(mints.iter().map(|mint| {
                    ItemError::new(Some(mint.order_id.clone()), ErrorCode::CalldataBuildFailed)
                }));
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        if !fill.via_router || self.minted_tokens_reach_taker(&fill, mints, opts.taker).await? {
            return Ok(Some(fill));
        }

        // Routed mints whose simulation does not land every token with the
        // taker are retried as direct contract calls.
        match self.mint_filler.fill_mints(mints, opts, true).await {
            Ok(fill) => Ok(Some(fill)),
            Err(err) if partial => {
                tracing::warn!(?err, "direct mint fallback failed, dropping mints");
                output.errors.extend(mints.iter().map(|mint| {
                    ItemError::new(Some(mint.order_id.clone()), ErrorCode::MintSimulationFailed)
                }));
                Ok(None)
            }
            Err(_) => Err(Error::MintSimulationFailed),
        }
    }

    /// Simulates the routed mint transactions and verifies that (a) at
    /// least one NFT transfer happens and (b) every minted token's final
    /// owner is the taker.
    async fn minted_tokens_reach_taker(
        &self,
        fill: &MintFill,
        mints: &[MintDetail],
        taker: Address,
    ) -> Result<bool, Error> {
        let minted_contracts: HashSet<_> = mints.iter().map(|mint| mint.contract).collect();
        for bundle in &fill.bundles {
            let transfers = self.simulator.transfers(&bundle.tx, taker).await?;
            if transfers.is_empty() {
                return Ok(false);
            }
            let mut final_owner = HashMap::new();
            for transfer in &transfers {
                final_owner.insert((transfer.contract, transfer.token_id), transfer.to);
            }
            if final_owner
                .iter()
                .any(|((contract, _), to)| minted_contracts.contains(contract) && *to != taker)
            {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Verifies the taker can cover the cart. For native buy-in this sums
    /// the transaction values (counting BETH as spendable when Blur
    /// listings are present); for ERC20 buy-in it sums approval amounts.
    /// Skipping is refused when Blur listings are in the cart, because
    /// Blur fills revert unrecoverably on missing funds.
    pub async fn check_balances(
        &self,
        bundles: &[TxBundle],
        taker: Address,
        buy_in: Address,
        has_blur: bool,
        skip_requested: bool,
    ) -> Result<(), Error> {
        if skip_requested && !has_blur {
            return Ok(());
        }

        if buy_in == eth::NATIVE_TOKEN {
            let required = bundles
                .iter()
                .fold(U256::ZERO, |total, bundle| {
                    total.saturating_add(bundle.tx.value)
                });
            let mut available = self.eth.native_balance(taker).await?;
            if has_blur {
                available =
                    available.saturating_add(self.eth.erc20_balance(ethereum::BETH, taker).await?);
            }
            if available < required {
                return Err(Error::BalanceTooLow);
            }
        } else {
            let required = bundles
                .iter()
                .flat_map(|bundle| &bundle.approvals)
                .fold(U256::ZERO, |total, approval| {
                    total.saturating_add(approval.amount)
                });
            if self.eth.erc20_balance(buy_in, taker).await? < required {
                return Err(Error::BalanceTooLow);
            }
        }
        Ok(())
    }
}
