//! The planning flow: cart in, resumable execution plan out.

use {
    crate::{
        domain::{
            eth::{Address, CurrencyInfo, U256},
            fees,
            order::{OrderId, Protocol},
            path::{PathBuilder, PathItem},
            plan::{
                Check, ErrorCode, ExecutionPlan, FeesSummary, Post, SignRequest, Status,
                StepData, StepItem,
            },
        },
        infra::{
            config::Config,
            ethereum::Ethereum,
            oracle::{Clock, PriceOracle},
            orderbook::{OrderBook, OrderIngest},
            router::{self, ApprovalRequest, FillOptions, Router, TxBundle},
            signatures::{self, AuthScope, CachedPermit, SignatureStore},
            AuthChallenger,
        },
        util,
    },
    anyhow::Context,
    futures::{StreamExt, TryStreamExt},
    itertools::Itertools,
    std::{collections::HashMap, sync::Arc},
};

mod request;
mod resolve;
mod sequence;

pub use request::{Request, RequestItem};

/// How long a freshly issued permit stays signable.
fn permit_validity() -> chrono::Duration {
    chrono::Duration::minutes(30)
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Maps to HTTP 400.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Maps to HTTP 401: sanctioned address or restricted source.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Maps to HTTP 400, with the offending order in the body.
    #[error("{code}")]
    Item {
        code: ErrorCode,
        order_id: Option<OrderId>,
    },
    /// Maps to HTTP 400.
    #[error("balance too low to cover the cart")]
    BalanceTooLow,
    /// Maps to HTTP 408: the request-level deadline expired.
    #[error("request deadline exceeded")]
    DeadlineExceeded,
    /// Maps to HTTP 500; logged with the request payload for correlation.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(prometheus_metric_storage::MetricStorage)]
#[metric(subsystem = "execution_planner")]
struct Metrics {
    /// Execution plans successfully built.
    plans: prometheus::IntCounter,

    /// Cart intents that resolved into at least one path entry.
    resolved_intents: prometheus::IntCounter,

    /// Cart items skipped during resolution, by error code.
    #[metric(labels("reason"))]
    skipped_items: prometheus::IntCounterVec,
}

fn metrics() -> &'static Metrics {
    Metrics::instance(crate::observe::metrics::get_storage_registry())
        .expect("the planner metrics instance is unique")
}

/// The order aggregation and fill-routing core. Stateless per request
/// apart from the externally backed signature stores.
pub struct Planner {
    orderbook: Arc<dyn OrderBook>,
    ingest: Arc<dyn OrderIngest>,
    oracle: Arc<dyn PriceOracle>,
    clock: Arc<dyn Clock>,
    eth: Arc<dyn Ethereum>,
    router: Arc<Router>,
    store: Arc<dyn SignatureStore>,
    challenger: Arc<dyn AuthChallenger>,
    config: Config,
}

impl Planner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        orderbook: Arc<dyn OrderBook>,
        ingest: Arc<dyn OrderIngest>,
        oracle: Arc<dyn PriceOracle>,
        clock: Arc<dyn Clock>,
        eth: Arc<dyn Ethereum>,
        router: Arc<Router>,
        store: Arc<dyn SignatureStore>,
        challenger: Arc<dyn AuthChallenger>,
        config: Config,
    ) -> Self {
        Self {
            orderbook,
            ingest,
            oracle,
            clock,
            eth,
            router,
            store,
            challenger,
            config,
        }
    }

    pub async fn plan(&self, request: Request) -> Result<ExecutionPlan, Error> {
        let request_id = signatures::request_id(&request.payload());
        let result = tokio::time::timeout(self.config.deadline, self.plan_inner(&request))
            .await
            .map_err(|_| Error::DeadlineExceeded)?;
        match result {
            Ok(plan) => {
                metrics().plans.inc();
                Ok(plan)
            }
            Err(Error::Internal(err)) => {
                // The request id doubles as the correlation id surfaced to
                // the client on 500s.
                tracing::error!(
                    %request_id,
                    payload = %request.payload(),
                    ?err,
                    "internal error while planning"
                );
                Err(Error::Internal(err))
            }
            Err(err) => Err(err),
        }
    }

    async fn plan_inner(&self, request: &Request) -> Result<ExecutionPlan, Error> {
        self.screen(request).await?;
        let global_fees = request.global_fees()?;
        let payload = request.payload();
        let request_id = signatures::request_id(&payload);
        let now = self.clock.now();

        // Resolve the cart into the path.
        let preview = request.is_preview();
        let default_quantity = if preview { self.config.preview_quantity } else { 1 };
        let intents = request.intents(default_quantity)?;
        let mut path = PathBuilder::new(
            self.orderbook.clone(),
            self.router.clone(),
            request.normalize_royalties,
        );
        let mut resolver = resolve::Resolver {
            orderbook: self.orderbook.clone(),
            ingest: self.ingest.clone(),
            config: &self.config,
            taker: request.taker,
            partial: request.partial,
            allow_inactive_order_ids: request.allow_inactive_order_ids,
            exclude_eoa: request.exclude_eoa,
            normalize_royalties: request.normalize_royalties,
            preview,
            path: &mut path,
        };
        let resolution = resolver.resolve(intents).await?;
        for error in &resolution.errors {
            let reason = error.message.to_string();
            metrics()
                .skipped_items
                .with_label_values(&[reason.as_str()])
                .inc();
        }
        if path.is_empty() {
            return Err(Error::Item {
                code: resolution.last_error.unwrap_or(ErrorCode::NoFillableOrders),
                order_id: None,
            });
        }

        // Fees and buy-in conversion.
        let has_blur = path.has_blur_listings();
        let contracts = path.contracts();
        let (mut items, mut listings, mints) = path.into_parts();
        let buy_in_currency = fees::select_buy_in(request.currency, &items);
        let buy_in = self
            .orderbook
            .currency(buy_in_currency)
            .await
            .context("buy-in currency metadata")?;
        fees::apply_global_fees(
            &mut items,
            &mut listings,
            &global_fees,
            buy_in.address,
            self.oracle.as_ref(),
            now,
        )
        .await?;
        fees::convert_to_buy_in(&mut items, &buy_in, self.oracle.as_ref(), now).await?;

        let mut errors = resolution.errors;
        let max_quantities = preview.then_some(resolution.max_quantities);

        // Marketplace auth gates everything: without it no calldata can be
        // built, so the client gets just the challenge and polls again.
        let auth = self.auth_state(request, has_blur, &contracts).await?;
        if !auth.challenges.is_empty() {
            return Ok(ExecutionPlan {
                request_id,
                steps: sequence::auth_gate(auth.challenges),
                errors,
                path: items,
                max_quantities,
                fees: FeesSummary::default(),
            });
        }

        if request.only_path {
            return Ok(ExecutionPlan {
                request_id,
                steps: vec![],
                errors,
                path: items,
                max_quantities,
                fees: FeesSummary::default(),
            });
        }

        // Drive the router.
        let opts = FillOptions {
            taker: request.taker,
            relayer: request.relayer,
            buy_in_currency: buy_in.address,
            source: request.source.clone(),
            referrer: request.referrer,
            forwarder_channel: request.forwarder_channel.clone(),
            swap_provider: request.swap_provider,
            conduit_key: request.conduit_key,
            force_router: request.force_router,
            use_permit: request.use_permit,
            max_fee_per_gas: request.max_fee_per_gas,
            max_priority_fee_per_gas: request.max_priority_fee_per_gas,
            api_keys: request.api_keys.clone(),
        };
        let expected_costs = expected_costs(&items);
        let mut fill = util::bounded(
            self.config.external_call_timeout,
            async {
                self.router
                    .fill(&listings, &mints, &opts, request.partial, &expected_costs)
                    .await
                    .map_err(anyhow::Error::new)
            },
        )
        .await
        .map_err(flatten_router_error)?;
        errors.append(&mut fill.errors);
        items.retain(|item| fill.success.contains(&item.order_id));
        if items.is_empty() {
            return Err(Error::Item {
                code: errors
                    .last()
                    .map(|error| error.message)
                    .unwrap_or(ErrorCode::NoFillableOrders),
                order_id: None,
            });
        }

        // Balance check before any step is handed out.
        self.router
            .check_balances(
                &fill.bundles,
                request.taker,
                buy_in.address,
                has_blur,
                request.skip_balance_check,
            )
            .await
            .map_err(from_router)?;

        let steps = self
            .steps(request, &payload, &buy_in, &mut fill.bundles, &listings, auth, now)
            .await?;
        let fees = self.fees_summary(request, &fill.bundles).await?;

        Ok(ExecutionPlan {
            request_id,
            steps,
            errors,
            path: items,
            max_quantities,
            fees,
        })
    }

    /// Sanctions and restricted-source screening; both map to 401.
    async fn screen(&self, request: &Request) -> Result<(), Error> {
        for address in [Some(request.taker), request.relayer].into_iter().flatten() {
            if self
                .orderbook
                .is_sanctioned(address)
                .await
                .context("sanctions screen")?
            {
                return Err(Error::Unauthorized(format!("address {address} is blocked")));
            }
        }
        if let Some(source) = &request.source {
            if let Some(required) = self.config.restricted_sources.get(source) {
                if request.api_keys.get(source) != Some(required) {
                    return Err(Error::Unauthorized(format!(
                        "source {source} requires its API key"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Collects the marketplace-auth situation: unsigned challenges (Blur
    /// signed-login, ERC721-C EOA challenges) and the verification
    /// transactions for challenges already signed.
    async fn auth_state(
        &self,
        request: &Request,
        has_blur: bool,
        contracts: &[Address],
    ) -> Result<AuthState, Error> {
        let mut state = AuthState::default();
        let taker = request.taker;

        if has_blur
            && self
                .store
                .auth(AuthScope::Blur, taker)
                .await
                .context("auth cache")?
                .is_none()
        {
            let challenge = util::bounded(
                self.config.external_call_timeout,
                self.challenger.blur_challenge(taker),
            )
            .await
            .context("blur auth challenge")?;
            state.challenges.push(StepItem {
                status: Status::Incomplete,
                order_ids: vec![],
                data: Some(StepData::Sign {
                    sign: SignRequest::Eip191 {
                        message: challenge.message,
                    },
                    post: Post::new(
                        "/execute/auth-signature/v1",
                        serde_json::json!({ "kind": "blur", "id": challenge.id }),
                    ),
                }),
                check: None,
            });
        }

        // Independent per-contract lookups, bounded but concurrent.
        let orderbook = &self.orderbook;
        let configs: Vec<_> = futures::stream::iter(contracts.iter().copied().map(|contract| {
            let orderbook = orderbook.clone();
            async move { orderbook.erc721c_config(contract).await }
        }))
        .buffered(self.config.concurrency.max(1))
        .try_collect()
        .await
        .context("erc721c configs")?;

        let validators: Vec<_> = configs
            .into_iter()
            .flatten()
            .map(|config| config.transfer_validator)
            .unique()
            .collect();
        for validator in validators {
            if self
                .eth
                .is_verified_eoa(validator, taker)
                .await
                .context("eoa verification status")?
            {
                continue;
            }
            state.erc721c_pending = true;
            match self
                .store
                .auth(AuthScope::Erc721c { validator }, taker)
                .await
                .context("auth cache")?
            {
                Some(auth) => {
                    let tx = self
                        .challenger
                        .erc721c_verification_tx(validator, taker, auth.signature)
                        .await
                        .context("erc721c verification transaction")?;
                    state.verification_txs.push(StepItem {
                        status: Status::Incomplete,
                        order_ids: vec![],
                        data: Some(StepData::Transaction(tx)),
                        check: None,
                    });
                }
                None => {
                    let challenge = util::bounded(
                        self.config.external_call_timeout,
                        self.challenger.erc721c_challenge(validator, taker),
                    )
                    .await
                    .context("erc721c auth challenge")?;
                    state.challenges.push(StepItem {
                        status: Status::Incomplete,
                        order_ids: vec![],
                        data: Some(StepData::Sign {
                            sign: SignRequest::Eip191 {
                                message: challenge.message,
                            },
                            post: Post::new(
                                "/execute/auth-signature/v1",
                                serde_json::json!({ "kind": "erc721c", "id": challenge.id }),
                            ),
                        }),
                        check: None,
                    });
                }
            }
        }
        Ok(state)
    }

    /// Builds every step item and hands the lot to the sequencer.
    #[allow(clippy::too_many_arguments)]
    async fn steps(
        &self,
        request: &Request,
        payload: &serde_json::Value,
        buy_in: &CurrencyInfo,
        bundles: &mut [TxBundle],
        listings: &[router::ListingDetail],
        auth: AuthState,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<crate::domain::plan::Step>, Error> {
        let request_id = signatures::request_id(payload);

        let approvals = if request.use_permit {
            vec![]
        } else {
            self.approval_items(request.taker, bundles).await?
        };
        let permits = if request.use_permit {
            self.permit_items(payload, bundles, now).await?
        } else {
            vec![]
        };
        let pre_signatures = self.pre_signature_items(payload, bundles).await?;

        let mut swaps = Vec::new();
        let mut sales = Vec::new();
        for bundle in bundles.iter() {
            let mut tx = bundle.tx.clone();
            tx.max_fee_per_gas = request.max_fee_per_gas.or(tx.max_fee_per_gas);
            tx.max_priority_fee_per_gas = request
                .max_priority_fee_per_gas
                .or(tx.max_priority_fee_per_gas);
            let item = StepItem {
                status: Status::Incomplete,
                order_ids: bundle.order_ids.clone(),
                data: Some(StepData::Transaction(tx)),
                check: Some(Check::status(&request_id)),
            };
            if bundle.tags.is_swap_only() {
                swaps.push(item);
            } else {
                sales.push(item);
            }
        }

        Ok(sequence::sequence(sequence::StepInputs {
            auth: vec![],
            approvals,
            permits,
            pre_signatures,
            auth_transactions: auth.verification_txs,
            swaps,
            sales,
            buy_in_is_native: buy_in.is_native(),
            use_permit: request.use_permit,
            erc721c_pending: auth.erc721c_pending,
            has_payment_processor: listings
                .iter()
                .any(|listing| listing.protocol() == Protocol::PaymentProcessor),
        }))
    }

    /// One approval item per (currency, spender), amounts summed across
    /// bundles; already-sufficient allowances show up complete.
    async fn approval_items(
        &self,
        taker: Address,
        bundles: &[TxBundle],
    ) -> Result<Vec<StepItem>, Error> {
        let mut items = Vec::new();
        for approval in aggregate_approvals(bundles) {
            let allowance = self
                .eth
                .allowance(approval.currency, taker, approval.spender)
                .await
                .context("allowance lookup")?;
            let satisfied = allowance >= approval.amount;
            items.push(StepItem {
                status: if satisfied {
                    Status::Complete
                } else {
                    Status::Incomplete
                },
                order_ids: vec![],
                data: (!satisfied).then(|| StepData::Transaction(approval.tx.clone())),
                check: None,
            });
        }
        Ok(items)
    }

    /// Permit items keyed by the content-addressed permit id; a permit the
    /// client already signed comes back complete on every later poll.
    async fn permit_items(
        &self,
        payload: &serde_json::Value,
        bundles: &[TxBundle],
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<StepItem>, Error> {
        let mut grouped: HashMap<(Address, Address), router::PermitRequest> = HashMap::new();
        for permit in bundles.iter().flat_map(|bundle| &bundle.permits) {
            grouped
                .entry((permit.currency, permit.spender))
                .and_modify(|merged| merged.amount = merged.amount.saturating_add(permit.amount))
                .or_insert_with(|| permit.clone());
        }

        let mut items = Vec::new();
        for ((currency, _spender), permit) in grouped.into_iter().sorted_by_key(|(key, _)| *key) {
            let id = signatures::permit_id(payload, currency, permit.amount);
            let cached = match self
                .store
                .permit(id.clone())
                .await
                .context("permit cache")?
            {
                Some(cached) => cached,
                None => {
                    let fresh = CachedPermit {
                        token: permit.currency,
                        amount: permit.amount,
                        spender: permit.spender,
                        deadline: now + permit_validity(),
                        domain: permit.domain.clone(),
                        types: permit.types.clone(),
                        value: permit.value.clone(),
                        signature: None,
                    };
                    self.store
                        .save_permit(id.clone(), fresh.clone())
                        .await
                        .context("permit cache")?;
                    fresh
                }
            };
            let signed = cached.signature.is_some();
            items.push(StepItem {
                status: if signed {
                    Status::Complete
                } else {
                    Status::Incomplete
                },
                order_ids: vec![],
                data: Some(StepData::Sign {
                    sign: SignRequest::Eip712 {
                        domain: cached.domain.clone(),
                        types: cached.types.clone(),
                        value: cached.value.clone(),
                    },
                    post: Post::new(
                        "/execute/permit-signature/v1",
                        serde_json::json!({ "id": id }),
                    ),
                }),
                check: None,
            });
        }
        Ok(items)
    }

    /// Pre-signature items; cached signatures are spliced back into their
    /// transaction's calldata and surface as complete.
    async fn pre_signature_items(
        &self,
        payload: &serde_json::Value,
        bundles: &mut [TxBundle],
    ) -> Result<Vec<StepItem>, Error> {
        let mut items = Vec::new();
        for bundle in bundles.iter_mut() {
            for request in bundle.pre_signatures.clone() {
                let id = signatures::pre_signature_id(payload, &request.unique_id);
                let cached = self
                    .store
                    .pre_signature(id.clone())
                    .await
                    .context("pre-signature cache")?;
                let status = match cached {
                    Some(signature) => {
                        bundle
                            .inject_pre_signature(request.slot, &signature)
                            .context("pre-signature injection")?;
                        Status::Complete
                    }
                    None => Status::Incomplete,
                };
                items.push(StepItem {
                    status,
                    order_ids: request.order_ids.clone(),
                    data: Some(StepData::Sign {
                        sign: request.sign.clone(),
                        post: Post::new(
                            "/execute/pre-signature/v1",
                            serde_json::json!({ "id": id, "kind": request.kind }),
                        ),
                    }),
                    check: None,
                });
            }
        }
        Ok(items)
    }

    /// Estimated total gas cost: summed bundle estimates priced at the
    /// caller's fee cap or the oracle's fast price.
    async fn fees_summary(
        &self,
        request: &Request,
        bundles: &[TxBundle],
    ) -> Result<FeesSummary, Error> {
        let total_gas: u64 = bundles.iter().map(|bundle| bundle.gas_estimate).sum();
        let gas_price = match request.max_fee_per_gas {
            Some(price) => price,
            None => self.eth.gas_price().await.context("gas price")?,
        };
        Ok(FeesSummary {
            gas: gas_price.saturating_mul(U256::from(total_gas)),
        })
    }
}

#[derive(Debug, Default)]
struct AuthState {
    challenges: Vec<StepItem>,
    verification_txs: Vec<StepItem>,
    erc721c_pending: bool,
}

/// Per-order total cost in the buy-in currency, the reference quote for
/// swap validation. Pool orders contribute one entry per path line, summed
/// here.
fn expected_costs(items: &[PathItem]) -> HashMap<OrderId, U256> {
    let mut costs: HashMap<OrderId, U256> = HashMap::new();
    for item in items {
        let cost = item
            .buy_in
            .as_ref()
            .map(|buy_in| buy_in.raw_quote)
            .unwrap_or(item.total_raw_price);
        costs
            .entry(item.order_id.clone())
            .and_modify(|total| *total = total.saturating_add(cost))
            .or_insert(cost);
    }
    costs
}

fn aggregate_approvals(bundles: &[TxBundle]) -> Vec<ApprovalRequest> {
    let mut grouped: Vec<ApprovalRequest> = Vec::new();
    for approval in bundles.iter().flat_map(|bundle| &bundle.approvals) {
        match grouped
            .iter_mut()
            .find(|merged| {
                merged.currency == approval.currency && merged.spender == approval.spender
            }) {
            Some(merged) => merged.amount = merged.amount.saturating_add(approval.amount),
            None => grouped.push(approval.clone()),
        }
    }
    grouped
}

fn from_router(err: router::Error) -> Error {
    match err {
        router::Error::BalanceTooLow => Error::BalanceTooLow,
        router::Error::SwapOutsideTolerance => Error::Item {
            code: ErrorCode::SwapOutsideTolerance,
            order_id: None,
        },
        router::Error::MintSimulationFailed => Error::Item {
            code: ErrorCode::MintSimulationFailed,
            order_id: None,
        },
        router::Error::Build(order_id, _) => Error::Item {
            code: ErrorCode::CalldataBuildFailed,
            order_id: Some(order_id),
        },
        err @ router::Error::UnsupportedProtocol(_) => Error::Internal(anyhow::anyhow!(err)),
        router::Error::Boundary(err) => Error::Internal(err),
    }
}

fn flatten_router_error(err: anyhow::Error) -> Error {
    match err.downcast::<router::Error>() {
        Ok(err) => from_router(err),
        Err(err) => Error::Internal(err),
    }
}
