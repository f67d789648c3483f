use {
    super::{
        eth::{self, Address, U256},
        order::{self, Order, OrderId},
    },
    serde::Deserialize,
    serde_with::{serde_as, DisplayFromStr},
};

/// An open primary-market issuance, discovered from the mint index or handed
/// in as a raw mint descriptor. Treated as a synthetic listing whose maker
/// is the token contract.
#[derive(Debug, Clone)]
pub struct Mint {
    pub collection: Address,
    pub contract: Address,
    /// Set for token-bound mints, which can only ever fill one unit per
    /// cart item.
    pub token_id: Option<U256>,
    pub currency: Address,
    /// Unit price, including any protocol mint fee.
    pub price: U256,
    pub stage: Option<String>,
    pub max_per_wallet: Option<u64>,
    /// Whether the current stage is gated by an allowlist.
    pub allowlist: bool,
    /// Transaction template minting a single unit; the mint filler scales
    /// quantity and price.
    pub tx: eth::Transaction,
}

impl Mint {
    /// Synthetic id aggregating every unit minted from the same stage of
    /// the same contract under one path entry.
    pub fn order_id(&self) -> OrderId {
        match &self.stage {
            Some(stage) => OrderId::new(format!("mint:{}:{stage}", self.contract)),
            None => OrderId::new(format!("mint:{}", self.contract)),
        }
    }

    /// The order the path builder books this mint under.
    pub fn to_order(&self) -> Order {
        Order {
            id: self.order_id(),
            kind: order::Kind::Mint(order::MintData {
                stage: self.stage.clone(),
            }),
            maker: self.contract,
            contract: self.contract,
            token_id: self.token_id,
            token_standard: eth::TokenStandard::Erc721,
            currency: self.currency,
            price: self.price,
            native_price: self.price,
            quantity_remaining: self.max_per_wallet.unwrap_or(u64::MAX),
            fillability: order::Fillability::Fillable,
            approval: order::ApprovalStatus::Approved,
            source: None,
            built_in_fees: vec![],
            missing_royalties: vec![],
        }
    }

    pub fn matches_token(&self, token: eth::TokenRef) -> bool {
        self.contract == token.contract && self.token_id.is_none_or(|id| id == token.id)
    }
}

/// Raw mint descriptor accepted in the cart, bypassing the mint index.
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MintDescriptor {
    pub contract: Address,
    #[serde(default)]
    pub collection: Option<Address>,
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[serde(default)]
    pub token_id: Option<U256>,
    #[serde(default)]
    pub currency: Option<Address>,
    #[serde_as(as = "DisplayFromStr")]
    pub price: U256,
    #[serde(default)]
    pub stage: Option<String>,
    pub tx: eth::Transaction,
}

impl MintDescriptor {
    pub fn into_mint(self) -> Mint {
        Mint {
            collection: self.collection.unwrap_or(self.contract),
            contract: self.contract,
            token_id: self.token_id,
            currency: self.currency.unwrap_or(eth::NATIVE_TOKEN),
            price: self.price,
            stage: self.stage,
            max_per_wallet: None,
            allowlist: false,
            tx: self.tx,
        }
    }
}
