use {
    super::Error,
    crate::{
        domain::{
            eth::{Address, TokenRef, B256, U256},
            fees::GlobalFee,
            intent::{FillType, Intent, RawOrder, SourceFilter, Target},
            order::{OrderId, Source},
        },
        infra::router::SwapProvider,
    },
    serde::{Deserialize, Serialize},
    serde_with::{serde_as, DisplayFromStr},
    std::{collections::BTreeMap, str::FromStr},
};

/// The deserialized buy request. Transport-level concerns (HTTP, rate
/// limits) live with the embedding service; everything semantic about the
/// request is validated here.
#[serde_as]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct Request {
    pub items: Vec<RequestItem>,
    pub taker: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relayer: Option<Address>,
    pub only_path: bool,
    pub force_router: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forwarder_channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<Address>,
    pub normalize_royalties: bool,
    pub allow_inactive_order_ids: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fees_on_top: Vec<String>,
    pub partial: bool,
    pub skip_balance_check: bool,
    /// Excludes Blur, whose fills revert for smart-contract takers.
    pub exclude_eoa: bool,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<U256>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<U256>,
    pub use_permit: bool,
    pub swap_provider: SwapProvider,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conduit_key: Option<B256>,
    /// Opaque per-protocol API keys, forwarded untouched to the calldata
    /// builders.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub api_keys: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct RequestItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<Address>,
    /// `contract:tokenId`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_order: Option<RawOrder>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill_type: Option<FillType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_mint_stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_order_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exact_order_source: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exclusions: Vec<OrderId>,
}

impl Request {
    /// Preview mode: the caller wants the path and true quantity bounds
    /// without committing to amounts. A `quantity` of zero counts as
    /// absent, so both omitted and zeroed items get the preview default.
    pub fn is_preview(&self) -> bool {
        self.only_path
            && self.partial
            && self
                .items
                .iter()
                .all(|item| item.effective_quantity().is_none())
    }

    /// The canonical payload every content-addressed id derives from.
    pub fn payload(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("request serialization is infallible")
    }

    pub fn global_fees(&self) -> Result<Vec<GlobalFee>, Error> {
        self.fees_on_top
            .iter()
            .map(|raw| {
                raw.parse()
                    .map_err(|err| Error::InvalidRequest(format!("feesOnTop: {err}")))
            })
            .collect()
    }

    /// Validates every item shape and builds the initial intent queue.
    pub fn intents(&self, default_quantity: u64) -> Result<Vec<Intent>, Error> {
        if self.items.is_empty() {
            return Err(Error::InvalidRequest("items must not be empty".to_string()));
        }
        self.items
            .iter()
            .enumerate()
            .map(|(index, item)| item.intent(index, default_quantity))
            .collect()
    }
}

impl RequestItem {
    /// The requested quantity, with zero treated the same as absent.
    fn effective_quantity(&self) -> Option<u64> {
        self.quantity.filter(|quantity| *quantity != 0)
    }

    fn intent(&self, index: usize, default_quantity: u64) -> Result<Intent, Error> {
        let targets = [
            self.collection.map(Target::Collection),
            self.token
                .as_deref()
                .map(parse_token)
                .transpose()?
                .map(Target::Token),
            self.order_id.clone().map(Target::Order),
            self.raw_order.clone().map(Target::Raw),
        ];
        let mut targets = targets.into_iter().flatten();
        let target = targets.next().ok_or_else(|| {
            Error::InvalidRequest(format!(
                "item {index}: one of collection, token, orderId, rawOrder is required"
            ))
        })?;
        if targets.next().is_some() {
            return Err(Error::InvalidRequest(format!(
                "item {index}: collection, token, orderId, rawOrder are mutually exclusive"
            )));
        }

        let source_filter = match (&self.preferred_order_source, &self.exact_order_source) {
            (Some(_), Some(_)) => {
                return Err(Error::InvalidRequest(format!(
                    "item {index}: preferredOrderSource and exactOrderSource are mutually exclusive"
                )));
            }
            (Some(preferred), None) => SourceFilter::Preferred(Source::new(preferred.clone())),
            (None, Some(exact)) => SourceFilter::Exact(Source::new(exact.clone())),
            (None, None) => SourceFilter::None,
        };

        Ok(Intent {
            item_index: index,
            target,
            quantity: self.effective_quantity().unwrap_or(default_quantity),
            fill_type: self.fill_type.unwrap_or_default(),
            preferred_mint_stage: self.preferred_mint_stage.clone(),
            source_filter,
            exclusions: self.exclusions.clone(),
            budget: None,
        })
    }
}

fn parse_token(raw: &str) -> Result<TokenRef, Error> {
    let invalid = || Error::InvalidRequest(format!("malformed token `{raw}`, want contract:tokenId"));
    let (contract, id) = raw.split_once(':').ok_or_else(invalid)?;
    Ok(TokenRef {
        contract: contract.parse().map_err(|_| invalid())?,
        id: U256::from_str(id).map_err(|_| invalid())?,
    })
}
