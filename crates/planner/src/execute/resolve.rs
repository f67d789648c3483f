//! Candidate resolution: turns the cart's intent queue into path entries.
//!
//! The queue has strict FIFO semantics. Collection intents expand into
//! token intents appended to the back, so expansions of item i run after
//! every original intent and later intents always observe the inventory,
//! pool cursors and per-order fills earlier ones committed.

use {
    super::Error,
    crate::{
        domain::{
            eth::{Address, TokenRef, TokenStandard, U256},
            intent::{FillType, Intent, RawOrder, Target},
            mint::{Mint, MintDescriptor},
            order::{ApprovalStatus, Fillability, Order, OrderId},
            path::{AppendError, PathBuilder},
            plan::{ErrorCode, ItemError, MaxQuantity},
        },
        infra::{
            config::Config,
            orderbook::{MintEligibility, OrderBook, OrderIngest},
        },
    },
    std::{collections::VecDeque, sync::Arc},
};

/// A quantity budget shared by every token intent one collection intent
/// expanded into; the redundant floor tokens stop filling once it runs
/// dry.
#[derive(Debug)]
struct Budget {
    item_index: usize,
    remaining: u64,
    filled: u64,
}

#[derive(Debug, Default)]
pub struct Resolution {
    pub errors: Vec<ItemError>,
    /// The most recent per-intent failure, surfaced to partial callers.
    pub last_error: Option<ErrorCode>,
    pub max_quantities: Vec<MaxQuantity>,
}

impl Resolution {
    fn record(&mut self, order_id: Option<OrderId>, code: ErrorCode) {
        self.last_error = Some(code);
        self.errors.push(ItemError::new(order_id, code));
    }
}

/// A per-intent failure: recorded and skipped under `partial`, fatal
/// otherwise.
enum IntentError {
    Code(ErrorCode, Option<OrderId>),
    Fatal(Error),
}

impl From<anyhow::Error> for IntentError {
    fn from(err: anyhow::Error) -> Self {
        Self::Fatal(Error::Internal(err))
    }
}

pub struct Resolver<'a> {
    pub orderbook: Arc<dyn OrderBook>,
    pub ingest: Arc<dyn OrderIngest>,
    pub config: &'a Config,
    pub taker: Address,
    pub partial: bool,
    pub allow_inactive_order_ids: bool,
    pub exclude_eoa: bool,
    pub normalize_royalties: bool,
    pub preview: bool,
    pub path: &'a mut PathBuilder,
}

impl Resolver<'_> {
    pub async fn resolve(&mut self, intents: Vec<Intent>) -> Result<Resolution, Error> {
        let mut queue: VecDeque<Intent> = intents.into();
        let mut budgets: Vec<Budget> = Vec::new();
        let mut resolution = Resolution::default();

        while let Some(intent) = queue.pop_front() {
            let committed = self.path.total_quantity();
            let result = self
                .resolve_intent(&intent, &mut queue, &mut budgets, &mut resolution)
                .await;
            if self.path.total_quantity() > committed {
                super::metrics().resolved_intents.inc();
            }
            match result {
                Ok(()) => {}
                // Failures of budgeted (expanded) intents are absorbed by
                // the redundancy factor; the budget sweep below reports the
                // collection-level shortfall.
                Err(IntentError::Code(..)) if intent.budget.is_some() => {}
                Err(IntentError::Code(code, order_id)) if self.partial => {
                    tracing::debug!(item = intent.item_index, %code, "skipping intent");
                    resolution.record(order_id, code);
                }
                Err(IntentError::Code(code, order_id)) => {
                    return Err(Error::Item { code, order_id });
                }
                Err(IntentError::Fatal(err)) => return Err(err),
            }
        }

        for budget in budgets {
            if budget.remaining > 0 {
                let code = if budget.filled == 0 {
                    ErrorCode::NoFillableOrders
                } else {
                    ErrorCode::QuantityUnavailable
                };
                tracing::debug!(item = budget.item_index, %code, "collection shortfall");
                if !self.partial {
                    return Err(Error::Item {
                        code,
                        order_id: None,
                    });
                }
                resolution.record(None, code);
            }
        }
        Ok(resolution)
    }

    async fn resolve_intent(
        &mut self,
        intent: &Intent,
        queue: &mut VecDeque<Intent>,
        budgets: &mut Vec<Budget>,
        resolution: &mut Resolution,
    ) -> Result<(), IntentError> {
        match &intent.target {
            Target::Order(id) => self.resolve_order_id(intent, id.clone(), resolution).await,
            Target::Token(token) => {
                self.resolve_token(intent, *token, budgets, resolution).await
            }
            Target::Collection(collection) => {
                self.resolve_collection(intent, *collection, queue, budgets, resolution)
                    .await
            }
            Target::Raw(raw) => self.resolve_raw(intent, raw.clone(), resolution).await,
        }
    }

    async fn resolve_order_id(
        &mut self,
        intent: &Intent,
        id: OrderId,
        resolution: &mut Resolution,
    ) -> Result<(), IntentError> {
        let order = self
            .orderbook
            .order(id.clone())
            .await?
            .ok_or(IntentError::Code(ErrorCode::NoFillableOrders, Some(id)))?;
        self.validate_order(&order)?;

        if self.preview {
            let mut max = self.path.available(&order);
            if let Some(pool) = order.pool() {
                max = max.min(self.path.pool_depth(pool).await.map_err(IntentError::from)?);
            }
            resolution.max_quantities.push(MaxQuantity {
                item_index: intent.item_index,
                max_quantity: max,
            });
        }

        self.fill_from_order(&order, intent.quantity).await
    }

    /// Direct order validation; skipped checks come back as error codes
    /// the caller attributes to the order.
    fn validate_order(&self, order: &Order) -> Result<(), IntentError> {
        let failure = |code| IntentError::Code(code, Some(order.id.clone()));
        if !self.allow_inactive_order_ids {
            match order.fillability {
                Fillability::Fillable => {}
                Fillability::Filled => return Err(failure(ErrorCode::OrderFilled)),
                Fillability::Cancelled => return Err(failure(ErrorCode::OrderCancelled)),
                Fillability::Expired => return Err(failure(ErrorCode::OrderExpired)),
                Fillability::NoBalance => return Err(failure(ErrorCode::OrderInactive)),
            }
            if order.approval == ApprovalStatus::NoApproval {
                return Err(failure(ErrorCode::OrderInactive));
            }
        }
        if order.maker == self.taker {
            return Err(failure(ErrorCode::SelfFill));
        }
        if self.exclude_eoa && order.is_blur() {
            return Err(failure(ErrorCode::NoFillableOrders));
        }
        Ok(())
    }

    /// Appends as much of `requested` as the order can still deliver,
    /// reporting a shortfall as quantity-unavailable.
    async fn fill_from_order(&mut self, order: &Order, requested: u64) -> Result<(), IntentError> {
        let failure = |code| IntentError::Code(code, Some(order.id.clone()));
        let available = self.path.available(order);
        if available == 0 {
            return Err(failure(ErrorCode::QuantityUnavailable));
        }
        let take = requested.min(available);
        match self.path.append_listing(order, order.token_id, take).await {
            Ok(()) => {}
            Err(AppendError::QuantityUnavailable)
            | Err(AppendError::MakerInventoryExhausted)
            | Err(AppendError::PoolExhausted) => {
                return Err(failure(ErrorCode::QuantityUnavailable));
            }
            Err(AppendError::Build(err)) => {
                tracing::warn!(order = %order.id, ?err, "calldata pre-commit failed");
                return Err(failure(ErrorCode::CalldataBuildFailed));
            }
            Err(AppendError::Boundary(err)) => return Err(err.into()),
        }
        if take < requested {
            return Err(failure(ErrorCode::QuantityUnavailable));
        }
        Ok(())
    }

    async fn resolve_token(
        &mut self,
        intent: &Intent,
        token: TokenRef,
        budgets: &mut [Budget],
        resolution: &mut Resolution,
    ) -> Result<(), IntentError> {
        let mut remaining = match intent.budget {
            Some(id) => intent.quantity.min(budgets[id].remaining),
            None => intent.quantity,
        };
        if remaining == 0 {
            return Ok(());
        }
        let requested = remaining;

        let mut mints_found = false;
        let mut mints_capped = false;
        if intent.wants_mints() {
            (mints_found, mints_capped) = self
                .fill_mints(intent, token.contract, Some(token), &mut remaining, resolution)
                .await?;
            if intent.fill_type == FillType::Mint && remaining > 0 {
                let code = if mints_found {
                    ErrorCode::MintQuotaExceeded
                } else {
                    ErrorCode::CollectionNoEligibleMints
                };
                return Err(IntentError::Code(code, None));
            }
        }

        let mut candidates = Vec::new();
        if remaining > 0 && intent.wants_listings() {
            candidates = self
                .orderbook
                .active_listings(token, self.config.max_intent_listings)
                .await?;
            candidates.retain(|order| {
                order.is_fillable()
                    && order.maker != self.taker
                    && !intent.exclusions.contains(&order.id)
                    && intent.source_filter.admits(order.source.as_ref())
                    && !(self.exclude_eoa && order.is_blur())
            });
            candidates.truncate(self.config.max_intent_listings);
            // Cheapest first; ties go to the preferred source, then to the
            // lower built-in fee burden.
            candidates.sort_by_key(|order| {
                (
                    order.unit_price(self.normalize_royalties),
                    !intent.source_filter.prefers(order.source.as_ref()),
                    order.fee_bps(),
                )
            });
        }

        if self.preview && intent.budget.is_none() {
            resolution.max_quantities.push(MaxQuantity {
                item_index: intent.item_index,
                max_quantity: self.token_max_quantity(&candidates, mints_found),
            });
        }

        for order in &candidates {
            if remaining == 0 {
                break;
            }
            let available = self.path.available(order);
            if available == 0 {
                continue;
            }
            let take = match order.token_standard {
                TokenStandard::Erc721 => 1,
                TokenStandard::Erc1155 => remaining.min(available),
            };
            match self.path.append_listing(order, Some(token.id), take).await {
                Ok(()) => remaining -= take,
                Err(
                    AppendError::QuantityUnavailable
                    | AppendError::MakerInventoryExhausted
                    | AppendError::PoolExhausted,
                ) => continue,
                Err(AppendError::Build(err)) if self.partial => {
                    tracing::warn!(order = %order.id, ?err, "calldata pre-commit failed");
                    resolution.record(Some(order.id.clone()), ErrorCode::CalldataBuildFailed);
                    continue;
                }
                Err(AppendError::Build(_)) => {
                    return Err(IntentError::Code(
                        ErrorCode::CalldataBuildFailed,
                        Some(order.id.clone()),
                    ));
                }
                Err(AppendError::Boundary(err)) => return Err(err.into()),
            }
        }

        let filled = requested - remaining;
        if let Some(id) = intent.budget {
            budgets[id].remaining -= filled;
            budgets[id].filled += filled;
            return Ok(());
        }
        if remaining > 0 {
            let code = if filled == 0 && !mints_capped {
                ErrorCode::NoFillableOrders
            } else {
                ErrorCode::QuantityUnavailable
            };
            return Err(IntentError::Code(code, None));
        }
        Ok(())
    }

    fn token_max_quantity(&self, candidates: &[Order], mints_found: bool) -> u64 {
        let listed: u64 = candidates
            .iter()
            .map(|order| self.path.available(order))
            .sum();
        match candidates.first().map(|order| order.token_standard) {
            // One specific ERC721 token can only ever be bought once.
            Some(TokenStandard::Erc721) => listed.min(1) + u64::from(mints_found),
            Some(TokenStandard::Erc1155) => listed,
            None => u64::from(mints_found),
        }
    }

    async fn resolve_collection(
        &mut self,
        intent: &Intent,
        collection: Address,
        queue: &mut VecDeque<Intent>,
        budgets: &mut Vec<Budget>,
        resolution: &mut Resolution,
    ) -> Result<(), IntentError> {
        let mut remaining = intent.quantity;

        if intent.wants_mints() {
            let (found, _capped) = self
                .fill_mints(intent, collection, None, &mut remaining, resolution)
                .await?;
            if intent.fill_type == FillType::Mint {
                if self.preview {
                    resolution.max_quantities.push(MaxQuantity {
                        item_index: intent.item_index,
                        max_quantity: intent.quantity - remaining,
                    });
                }
                if remaining > 0 {
                    let code = if found {
                        ErrorCode::MintQuotaExceeded
                    } else {
                        ErrorCode::CollectionNoEligibleMints
                    };
                    return Err(IntentError::Code(code, None));
                }
                return Ok(());
            }
        }

        if self.preview {
            let listed = self.orderbook.floor_listing_count(collection).await?;
            resolution.max_quantities.push(MaxQuantity {
                item_index: intent.item_index,
                max_quantity: listed + (intent.quantity - remaining),
            });
        }

        if remaining == 0 {
            return Ok(());
        }

        // Fetch more floor tokens than needed; the surplus absorbs tokens
        // that turn out ineligible, and the shared budget stops the
        // expansion from overshooting.
        let fetch = (remaining.saturating_mul(self.config.floor_redundancy)) as usize;
        let tokens = self.orderbook.floor_tokens(collection, fetch).await?;
        if tokens.is_empty() {
            return Err(IntentError::Code(ErrorCode::NoFillableOrders, None));
        }

        let budget = budgets.len();
        budgets.push(Budget {
            item_index: intent.item_index,
            remaining,
            filled: 0,
        });
        for token in tokens {
            queue.push_back(Intent {
                item_index: intent.item_index,
                target: Target::Token(token),
                quantity: remaining,
                fill_type: FillType::Trade,
                preferred_mint_stage: None,
                source_filter: intent.source_filter.clone(),
                exclusions: intent.exclusions.clone(),
                budget: Some(budget),
            });
        }
        Ok(())
    }

    async fn resolve_raw(
        &mut self,
        intent: &Intent,
        raw: RawOrder,
        resolution: &mut Resolution,
    ) -> Result<(), IntentError> {
        match raw.kind.as_str() {
            // Blur partials come with everything needed to fill; they are
            // never persisted through the ingest API.
            "blur-partial" => {
                let data: BlurPartialData = serde_json::from_value(raw.data)
                    .map_err(|err| invalid_raw(&raw.kind, err))?;
                let order = data.into_order();
                self.validate_order(&order)?;
                self.fill_from_order(&order, intent.quantity).await
            }
            // Pool references translate to the deterministic id the pool
            // is indexed under.
            "sudoswap" | "sudoswap-v2" | "nftx" | "nftx-v3" | "zora-v4" => {
                let data: PoolReference = serde_json::from_value(raw.data)
                    .map_err(|err| invalid_raw(&raw.kind, err))?;
                let id = OrderId::new(format!("{}:{}", raw.kind, data.pool));
                self.resolve_order_id(intent, id, resolution).await
            }
            // Mint descriptors become candidates directly.
            "mint" => {
                let descriptor: MintDescriptor = serde_json::from_value(raw.data)
                    .map_err(|err| invalid_raw(&raw.kind, err))?;
                let mint = descriptor.into_mint();
                let mut remaining = match mint.token_id {
                    Some(_) => 1,
                    None => intent.quantity,
                };
                self.fill_mint_candidate(&mint, &mut remaining, &mut false)
                    .await?;
                if remaining > 0 {
                    return Err(IntentError::Code(ErrorCode::MintQuotaExceeded, None));
                }
                Ok(())
            }
            // Everything else round-trips through the ingestion API and is
            // then handled like an order-id intent.
            _ => {
                let id = self
                    .ingest
                    .ingest(raw.kind.clone(), raw.data.clone())
                    .await
                    .map_err(|err| {
                        tracing::warn!(kind = %raw.kind, ?err, "raw order ingestion failed");
                        IntentError::Code(ErrorCode::NoFillableOrders, None)
                    })?;
                self.resolve_order_id(intent, id, resolution).await
            }
        }
    }

    /// Walks the open mints of a collection (or one token), minting into
    /// the path until the intent is satisfied or eligibility runs out.
    /// Returns whether any open mint exists and whether a wallet cap got
    /// in the way. Allowlist misses are skipped silently.
    async fn fill_mints(
        &mut self,
        intent: &Intent,
        collection: Address,
        token: Option<TokenRef>,
        remaining: &mut u64,
        resolution: &mut Resolution,
    ) -> Result<(bool, bool), IntentError> {
        let mut mints = self
            .orderbook
            .open_mints(collection, intent.preferred_mint_stage.clone())
            .await?;
        if let Some(token) = token {
            mints.retain(|mint| mint.matches_token(token));
        }
        let found = !mints.is_empty();
        let mut capped = false;

        if self.preview && intent.fill_type == FillType::Mint && intent.budget.is_none() {
            let mut max = 0u64;
            for mint in &mints {
                if let MintEligibility::Eligible { remaining } = self
                    .orderbook
                    .mint_eligibility(mint.clone(), self.taker)
                    .await?
                {
                    max += remaining;
                }
            }
            resolution.max_quantities.push(MaxQuantity {
                item_index: intent.item_index,
                max_quantity: match token {
                    Some(_) => max.min(1),
                    None => max,
                },
            });
        }

        for mint in &mints {
            if *remaining == 0 {
                break;
            }
            self.fill_mint_candidate(mint, remaining, &mut capped).await?;
        }
        Ok((found, capped))
    }

    async fn fill_mint_candidate(
        &mut self,
        mint: &Mint,
        remaining: &mut u64,
        capped: &mut bool,
    ) -> Result<(), IntentError> {
        let eligibility = self
            .orderbook
            .mint_eligibility(mint.clone(), self.taker)
            .await?;
        let cap = match eligibility {
            MintEligibility::Eligible { remaining } => remaining,
            MintEligibility::NotAllowlisted => {
                tracing::debug!(contract = %mint.contract, "taker not allowlisted, skipping mint");
                return Ok(());
            }
        };
        let mut take = (*remaining).min(cap);
        if mint.token_id.is_some() {
            take = take.min(1);
        }
        if take == 0 {
            *capped = true;
            return Ok(());
        }
        match self.path.append_mint(mint, take).await {
            Ok(()) => {
                *remaining -= take;
                Ok(())
            }
            Err(AppendError::QuantityUnavailable) => {
                *capped = true;
                Ok(())
            }
            Err(AppendError::Boundary(err)) => Err(err.into()),
            Err(err) => Err(IntentError::Fatal(Error::Internal(anyhow::anyhow!(err)))),
        }
    }
}

fn invalid_raw(kind: &str, err: serde_json::Error) -> IntentError {
    IntentError::Fatal(Error::InvalidRequest(format!(
        "malformed {kind} raw order: {err}"
    )))
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct PoolReference {
    pool: Address,
}

/// The caller-supplied shape of a Blur partial listing.
#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlurPartialData {
    contract: Address,
    #[serde(with = "u256_decimal")]
    token_id: U256,
    #[serde(with = "u256_decimal")]
    price: U256,
    maker: Address,
}

impl BlurPartialData {
    fn into_order(self) -> Order {
        use crate::domain::order;
        Order {
            id: OrderId::new(format!("blur:{}:{}", self.contract, self.token_id)),
            kind: order::Kind::Blur(order::BlurData { partial: true }),
            maker: self.maker,
            contract: self.contract,
            token_id: Some(self.token_id),
            token_standard: TokenStandard::Erc721,
            currency: crate::domain::eth::NATIVE_TOKEN,
            price: self.price,
            native_price: self.price,
            quantity_remaining: 1,
            fillability: Fillability::Fillable,
            approval: ApprovalStatus::Approved,
            source: Some(order::Source::new("blur.io")),
            built_in_fees: vec![],
            missing_royalties: vec![],
        }
    }
}

mod u256_decimal {
    use {super::U256, serde::Deserialize, std::str::FromStr};

    pub fn deserialize<'de, D: serde::Deserializer<'de>>(de: D) -> Result<U256, D::Error> {
        let raw = String::deserialize(de)?;
        U256::from_str(&raw).map_err(serde::de::Error::custom)
    }
}
