use {
    super::{
        eth::{Address, TokenRef},
        order::{OrderId, Source},
    },
    serde::{Deserialize, Serialize},
};

/// How a cart item wants to be filled. `Mint` only considers open mints,
/// `Trade` only secondary listings, `PreferMint` exhausts mints first and
/// falls back to listings for the residual quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FillType {
    #[default]
    Trade,
    Mint,
    PreferMint,
}

/// Order-source constraint of an intent. `Preferred` only breaks ties
/// between equally priced candidates, `Exact` is a hard filter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SourceFilter {
    #[default]
    None,
    Preferred(Source),
    Exact(Source),
}

impl SourceFilter {
    pub fn admits(&self, source: Option<&Source>) -> bool {
        match self {
            Self::Exact(wanted) => source == Some(wanted),
            _ => true,
        }
    }

    pub fn prefers(&self, source: Option<&Source>) -> bool {
        match self {
            Self::Preferred(wanted) => source == Some(wanted),
            _ => false,
        }
    }
}

/// A raw third-party order payload handed in with the cart. Pool references
/// and mints are translated locally; everything else goes through the
/// order-book ingestion API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RawOrder {
    pub kind: String,
    pub data: serde_json::Value,
}

/// What a single cart intent points at.
#[derive(Debug, Clone)]
pub enum Target {
    Collection(Address),
    Token(TokenRef),
    Order(OrderId),
    Raw(RawOrder),
}

/// One unit of work on the resolver's FIFO queue. Collection intents expand
/// into token intents appended to the back of the queue; expanded intents
/// share their ancestor's quantity budget so a collection buy of N never
/// overshoots, however many redundant floor tokens were fetched.
#[derive(Debug, Clone)]
pub struct Intent {
    /// Index of the originating request item, for error attribution and
    /// preview max-quantities.
    pub item_index: usize,
    pub target: Target,
    pub quantity: u64,
    pub fill_type: FillType,
    pub preferred_mint_stage: Option<String>,
    pub source_filter: SourceFilter,
    pub exclusions: Vec<OrderId>,
    /// Budget slot shared by the token intents a collection intent
    /// expanded into. `None` for intents straight from the request.
    pub budget: Option<usize>,
}

impl Intent {
    pub fn wants_mints(&self) -> bool {
        matches!(self.fill_type, FillType::Mint | FillType::PreferMint)
    }

    pub fn wants_listings(&self) -> bool {
        matches!(self.fill_type, FillType::Trade | FillType::PreferMint)
    }
}
