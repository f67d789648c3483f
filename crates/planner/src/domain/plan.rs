use {
    super::{
        eth::{self, U256},
        order::OrderId,
        path::PathItem,
    },
    serde::Serialize,
    serde_with::{serde_as, DisplayFromStr},
};

/// Canonical step ids, in the order steps are allowed to appear. Pruning
/// removes entries but never reorders them, so a client polling by index is
/// not disturbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, Serialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum StepId {
    Auth,
    CurrencyApproval,
    CurrencyPermit,
    PreSignature,
    AuthTransaction,
    Swap,
    Sale,
}

impl StepId {
    pub const CANONICAL_ORDER: [StepId; 7] = [
        StepId::Auth,
        StepId::CurrencyApproval,
        StepId::CurrencyPermit,
        StepId::PreSignature,
        StepId::AuthTransaction,
        StepId::Swap,
        StepId::Sale,
    ];

    pub fn kind(&self) -> StepKind {
        match self {
            StepId::Auth | StepId::CurrencyPermit | StepId::PreSignature => StepKind::Signature,
            StepId::CurrencyApproval | StepId::AuthTransaction | StepId::Swap | StepId::Sale => {
                StepKind::Transaction
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Signature,
    Transaction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Complete,
    Incomplete,
}

/// A signing request handed to the client wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "signatureKind", rename_all = "camelCase")]
pub enum SignRequest {
    #[serde(rename = "eip191")]
    Eip191 { message: String },
    #[serde(rename = "eip712")]
    Eip712 {
        domain: serde_json::Value,
        types: serde_json::Value,
        value: serde_json::Value,
    },
}

/// Where the client POSTs the produced signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Post {
    pub endpoint: String,
    pub method: String,
    pub body: serde_json::Value,
}

impl Post {
    pub fn new(endpoint: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: "POST".to_string(),
            body,
        }
    }
}

/// Descriptor the client polls to observe a transaction's confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Check {
    pub endpoint: String,
    pub method: String,
    pub body: serde_json::Value,
}

impl Check {
    pub fn status(request_id: &str) -> Self {
        Self {
            endpoint: "/execute/status/v1".to_string(),
            method: "POST".to_string(),
            body: serde_json::json!({ "requestId": request_id }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum StepData {
    Sign {
        sign: SignRequest,
        post: Post,
    },
    Transaction(eth::Transaction),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepItem {
    pub status: Status,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub order_ids: Vec<OrderId>,
    /// Withheld while an earlier signature step is incomplete; the client
    /// signs, re-requests the plan and only then sees the payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<StepData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check: Option<Check>,
}

impl StepItem {
    pub fn is_incomplete(&self) -> bool {
        self.status == Status::Incomplete
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Step {
    pub id: StepId,
    pub action: String,
    pub description: String,
    pub kind: StepKind,
    pub items: Vec<StepItem>,
}

impl Step {
    pub fn new(id: StepId, action: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id,
            action: action.into(),
            description: description.into(),
            kind: id.kind(),
            items: Vec::new(),
        }
    }

    pub fn has_incomplete_items(&self) -> bool {
        self.items.iter().any(StepItem::is_incomplete)
    }
}

/// Codes for per-order and per-item failures surfaced in `errors[]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, Serialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    NoFillableOrders,
    OrderInactive,
    OrderFilled,
    OrderCancelled,
    OrderExpired,
    SelfFill,
    QuantityUnavailable,
    CollectionNoEligibleMints,
    MintQuotaExceeded,
    CalldataBuildFailed,
    SwapOutsideTolerance,
    MintSimulationFailed,
    BalanceTooLow,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,
    pub message: ErrorCode,
}

impl ItemError {
    pub fn new(order_id: Option<OrderId>, message: ErrorCode) -> Self {
        Self { order_id, message }
    }
}

/// The true upper bound a preview reports for one request item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaxQuantity {
    pub item_index: usize,
    pub max_quantity: u64,
}

#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeesSummary {
    /// Estimated total gas cost of every emitted transaction, in native
    /// currency.
    #[serde_as(as = "DisplayFromStr")]
    pub gas: U256,
}

/// What the client receives; the whole point of the exercise. The plan is
/// reconstructed from scratch on every poll, with completed signature steps
/// recovered from the idempotent caches.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub request_id: String,
    pub steps: Vec<Step>,
    pub errors: Vec<ItemError>,
    pub path: Vec<PathItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_quantities: Option<Vec<MaxQuantity>>,
    pub fees: FeesSummary,
}
