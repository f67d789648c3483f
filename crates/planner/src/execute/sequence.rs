//! Assembles the client-facing step list: canonical order, data gating
//! behind unsigned signature steps, and pruning of irrelevant steps.

use crate::domain::plan::{Step, StepId, StepItem, StepKind};

/// Everything the sequencer needs, grouped per canonical step. Items are
/// built by the planner where the underlying data lives; the sequencer
/// owns ordering, gating and pruning.
#[derive(Debug, Default)]
pub struct StepInputs {
    pub auth: Vec<StepItem>,
    pub approvals: Vec<StepItem>,
    pub permits: Vec<StepItem>,
    pub pre_signatures: Vec<StepItem>,
    pub auth_transactions: Vec<StepItem>,
    pub swaps: Vec<StepItem>,
    pub sales: Vec<StepItem>,
    pub buy_in_is_native: bool,
    pub use_permit: bool,
    pub erc721c_pending: bool,
    pub has_payment_processor: bool,
}

fn step(id: StepId, items: Vec<StepItem>) -> Step {
    let (action, description) = match id {
        StepId::Auth => ("Sign in", "Authenticate with the marketplace to access your listings"),
        StepId::CurrencyApproval => (
            "Approve currency",
            "Approve the exchange to spend your payment currency",
        ),
        StepId::CurrencyPermit => (
            "Sign permit",
            "Authorize spending your payment currency without an approval transaction",
        ),
        StepId::PreSignature => ("Sign order data", "Sign the order data required by the exchange"),
        StepId::AuthTransaction => (
            "Verify wallet",
            "Submit the on-chain wallet verification required by the collection",
        ),
        StepId::Swap => ("Swap currency", "Convert your balance into the payment currency"),
        StepId::Sale => ("Confirm purchase", "Confirm the purchase in your wallet"),
    };
    Step {
        items,
        ..Step::new(id, action, description)
    }
}

/// The auth-gated early response: the client must sign in before any
/// calldata is built, so the plan carries only the challenge plus a
/// poll-again placeholder in the approval slot.
pub fn auth_gate(auth: Vec<StepItem>) -> Vec<Step> {
    vec![
        step(StepId::Auth, auth),
        step(
            StepId::CurrencyApproval,
            vec![StepItem {
                status: crate::domain::plan::Status::Incomplete,
                order_ids: vec![],
                data: None,
                check: None,
            }],
        ),
    ]
}

pub fn sequence(inputs: StepInputs) -> Vec<Step> {
    let StepInputs {
        auth,
        approvals,
        permits,
        pre_signatures,
        auth_transactions,
        swaps,
        sales,
        buy_in_is_native,
        use_permit,
        erc721c_pending,
        has_payment_processor,
    } = inputs;

    let mut steps = vec![
        step(StepId::Auth, auth),
        step(StepId::CurrencyApproval, approvals),
        step(StepId::CurrencyPermit, permits),
        step(StepId::PreSignature, pre_signatures),
        step(StepId::AuthTransaction, auth_transactions),
        step(StepId::Swap, swaps),
        step(StepId::Sale, sales),
    ];

    withhold_gated_data(&mut steps);

    steps.retain(|step| {
        // Never prune a step the client still has work in.
        if step.has_incomplete_items() {
            return true;
        }
        match step.id {
            StepId::Auth => !step.items.is_empty(),
            StepId::CurrencyApproval => {
                !step.items.is_empty() && !(buy_in_is_native && !erc721c_pending)
            }
            StepId::CurrencyPermit => use_permit && !step.items.is_empty(),
            StepId::PreSignature => has_payment_processor && !step.items.is_empty(),
            StepId::AuthTransaction => erc721c_pending && !step.items.is_empty(),
            StepId::Swap => !step.items.is_empty(),
            StepId::Sale => !step.items.is_empty(),
        }
    });
    steps
}

/// Transaction payloads that embed yet-unproduced signatures are withheld:
/// while any earlier signature step has an incomplete item, later
/// transaction items expose their status but no data. The client signs,
/// polls again, and the rebuilt plan carries the payload.
fn withhold_gated_data(steps: &mut [Step]) {
    let mut unsigned_before = false;
    for step in steps.iter_mut() {
        match step.kind {
            StepKind::Signature => {
                unsigned_before |= step.has_incomplete_items();
            }
            StepKind::Transaction => {
                if unsigned_before {
                    for item in &mut step.items {
                        item.data = None;
                    }
                }
            }
        }
    }
}
