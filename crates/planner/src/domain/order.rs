use {
    super::eth::{self, Address, B256, U256},
    serde::{Deserialize, Serialize},
    std::fmt,
};

/// Identifies an order across every indexed protocol. For on-chain orders
/// this is the protocol's content hash of the signed order struct; pool and
/// mint orders use synthetic ids derived from the pool or contract address.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    derive_more::From,
    derive_more::Into,
    Serialize,
    Deserialize,
)]
pub struct OrderId(pub String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The marketplace domain an order was originally listed on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::From, Serialize, Deserialize)]
pub struct Source(pub String);

impl Source {
    pub fn new(domain: impl Into<String>) -> Self {
        Self(domain.into())
    }

    pub fn is_opensea(&self) -> bool {
        self.0 == "opensea.io"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Fillability {
    Fillable,
    NoBalance,
    Filled,
    Cancelled,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalStatus {
    Approved,
    NoApproval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeKind {
    Marketplace,
    Royalty,
}

/// A fee already baked into the order's price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltInFee {
    pub kind: FeeKind,
    pub recipient: Address,
    pub bps: u32,
}

/// A royalty the order itself does not pay. Only consulted when the caller
/// asks for royalty normalization, in which case the aggregator tops the
/// price up by these amounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingRoyalty {
    pub recipient: Address,
    pub amount: U256,
}

/// Flat protocol discriminant, used to pick the calldata builder and for
/// fee-eligibility decisions. [`Kind`] carries the per-protocol payload.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Protocol {
    Seaport,
    Blur,
    LooksRare,
    X2y2,
    Element,
    Rarible,
    Sudoswap,
    SudoswapV2,
    Nftx,
    NftxV3,
    ZoraV4,
    PaymentProcessor,
    Mint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SeaportVersion {
    V14,
    V15,
    V16,
}

/// Seaport family order payload. `off_chain_cancellable` is set for orders
/// whose zone enforces the off-chain cancellation oracle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeaportData {
    pub version: SeaportVersion,
    pub zone: Address,
    pub conduit_key: B256,
    pub off_chain_cancellable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlurData {
    /// Blur partial listings are filled through Blur's calldata API and
    /// require a signed-in taker.
    pub partial: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LooksRareData {
    pub strategy: Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct X2y2Data {
    pub delegate: Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementData {
    pub hash_nonce: U256,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaribleData {
    pub data_type: String,
}

/// AMM-style pool order payload. The price moves along the pool's published
/// curve as units are consumed, see [`super::pool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolData {
    pub pool: Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentProcessorData {
    /// Payment-processor fills embed a taker-side signature into the
    /// calldata before submission.
    pub cosigned: bool,
    /// The collection's ERC721-C transfer validator, when the collection
    /// enforces one.
    pub transfer_validator: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintData {
    pub stage: Option<String>,
}

/// Protocol tag plus the concrete payload the calldata builders consume.
/// The planner itself only inspects the payload for pool repricing,
/// pre-signature needs and cancellation semantics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Kind {
    Seaport(SeaportData),
    Blur(BlurData),
    LooksRare(LooksRareData),
    X2y2(X2y2Data),
    Element(ElementData),
    Rarible(RaribleData),
    Sudoswap(PoolData),
    SudoswapV2(PoolData),
    Nftx(PoolData),
    NftxV3(PoolData),
    ZoraV4(PoolData),
    PaymentProcessor(PaymentProcessorData),
    Mint(MintData),
}

impl Kind {
    pub fn protocol(&self) -> Protocol {
        match self {
            Self::Seaport(_) => Protocol::Seaport,
            Self::Blur(_) => Protocol::Blur,
            Self::LooksRare(_) => Protocol::LooksRare,
            Self::X2y2(_) => Protocol::X2y2,
            Self::Element(_) => Protocol::Element,
            Self::Rarible(_) => Protocol::Rarible,
            Self::Sudoswap(_) => Protocol::Sudoswap,
            Self::SudoswapV2(_) => Protocol::SudoswapV2,
            Self::Nftx(_) => Protocol::Nftx,
            Self::NftxV3(_) => Protocol::NftxV3,
            Self::ZoraV4(_) => Protocol::ZoraV4,
            Self::PaymentProcessor(_) => Protocol::PaymentProcessor,
            Self::Mint(_) => Protocol::Mint,
        }
    }

    /// The pool backing this order, for kinds whose price moves along a
    /// published curve.
    pub fn pool(&self) -> Option<Address> {
        match self {
            Self::Sudoswap(data)
            | Self::SudoswapV2(data)
            | Self::Nftx(data)
            | Self::NftxV3(data)
            | Self::ZoraV4(data) => Some(data.pool),
            _ => None,
        }
    }
}

/// A fillable sell-side offer from some protocol. Only listings are in
/// scope for the buy flow; bids never reach the planner.
#[derive(Debug, Clone)]
pub struct Order {
    pub id: OrderId,
    pub kind: Kind,
    pub maker: Address,
    pub contract: Address,
    /// The listed token. `None` for pool orders, which deliver whichever
    /// token the pool holds at fill time.
    pub token_id: Option<U256>,
    pub token_standard: eth::TokenStandard,
    pub currency: Address,
    /// Price in `currency`.
    pub price: U256,
    /// Price converted to the chain's native currency at indexing time.
    pub native_price: U256,
    pub quantity_remaining: u64,
    pub fillability: Fillability,
    pub approval: ApprovalStatus,
    pub source: Option<Source>,
    pub built_in_fees: Vec<BuiltInFee>,
    pub missing_royalties: Vec<MissingRoyalty>,
}

impl Order {
    pub fn protocol(&self) -> Protocol {
        self.kind.protocol()
    }

    pub fn pool(&self) -> Option<Address> {
        self.kind.pool()
    }

    /// Total built-in fee bps, the final tie-break when ranking candidates.
    pub fn fee_bps(&self) -> u32 {
        self.built_in_fees.iter().map(|fee| fee.bps).sum()
    }

    pub fn missing_royalties_total(&self) -> U256 {
        self.missing_royalties
            .iter()
            .fold(U256::ZERO, |total, royalty| {
                total.saturating_add(royalty.amount)
            })
    }

    /// The effective unit price the buyer pays. Under royalty normalization
    /// this includes the missing-royalty top-ups, which is also the value
    /// candidates are ranked by.
    pub fn unit_price(&self, normalize_royalties: bool) -> U256 {
        if normalize_royalties {
            self.price.saturating_add(self.missing_royalties_total())
        } else {
            self.price
        }
    }

    pub fn is_fillable(&self) -> bool {
        self.fillability == Fillability::Fillable && self.approval == ApprovalStatus::Approved
    }

    pub fn is_blur(&self) -> bool {
        matches!(self.kind, Kind::Blur(_))
    }

    /// Seaport-family listings placed through OpenSea on ERC721 contracts.
    /// These are excluded from global fees whenever a Blur listing shares
    /// the cart, so mixed carts do not double-charge the referrer.
    pub fn is_opensea_seaport_erc721(&self) -> bool {
        matches!(self.kind, Kind::Seaport(_))
            && self.token_standard == eth::TokenStandard::Erc721
            && self.source.as_ref().is_some_and(Source::is_opensea)
    }

    pub fn requires_pre_signature(&self) -> bool {
        matches!(self.kind, Kind::PaymentProcessor(_))
    }

    pub fn is_native_off_chain_cancellable(&self) -> bool {
        match &self.kind {
            Kind::Seaport(data) => data.off_chain_cancellable,
            Kind::PaymentProcessor(data) => data.cosigned,
            _ => false,
        }
    }
}
