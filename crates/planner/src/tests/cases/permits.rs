//! ERC20 buy-in with permits: the approval transaction is replaced by a
//! permit signature whose id is stable across polls, so the client's
//! posted signature flips the step to complete.

use {
    crate::{
        domain::plan::{Status, StepData, StepId},
        infra::signatures::SignatureStore,
        tests::setup::{self, Fixture, USDC},
    },
    alloy_primitives::U256,
};

fn erc20_fixture() -> Fixture {
    let mut order = setup::listing("0x01", 1, 5_000_000);
    order.currency = USDC;
    Fixture::default().with_order(order)
}

fn permit_request() -> crate::execute::Request {
    let mut request = setup::request(vec![setup::token_item(1)]);
    request.currency = Some(USDC);
    request.use_permit = true;
    request
}

#[tokio::test]
async fn permit_replaces_the_approval_step() {
    let plan = erc20_fixture().plan(permit_request()).await.unwrap();

    let ids: Vec<_> = plan.steps.iter().map(|step| step.id).collect();
    assert_eq!(ids, vec![StepId::CurrencyPermit, StepId::Sale]);

    let permit = &plan.steps[0].items[0];
    assert_eq!(permit.status, Status::Incomplete);
    assert!(matches!(
        permit.data,
        Some(StepData::Sign {
            sign: crate::domain::plan::SignRequest::Eip712 { .. },
            ..
        })
    ));
    // The unsigned permit withholds the sale payload.
    let sale = &plan.steps[1].items[0];
    assert!(sale.data.is_none());
}

#[tokio::test]
async fn permit_id_is_stable_and_signing_completes_the_step() {
    let fixture = erc20_fixture();

    let first = fixture.plan(permit_request()).await.unwrap();
    let second = fixture.plan(permit_request()).await.unwrap();
    let post_body = |plan: &crate::ExecutionPlan| match &plan.steps[0].items[0].data {
        Some(StepData::Sign { post, .. }) => post.body.clone(),
        other => panic!("expected sign data, got {other:?}"),
    };
    // Identical payloads address the same cached permit.
    assert_eq!(post_body(&first), post_body(&second));

    // The companion endpoint stores the signature under that id ...
    let id = post_body(&first)["id"].as_str().unwrap().to_string();
    let mut cached = fixture
        .store
        .permit(id.clone())
        .await
        .unwrap()
        .expect("planning created the permit");
    assert_eq!(cached.amount, U256::from(5_000_000));
    cached.signature = Some("0xpermit-signature".to_string());
    // Bypass the first-write-wins guard the way the companion endpoint
    // does: signed writes always land.
    fixture.store.save_permit(id, cached).await.unwrap();

    // ... and the next poll sees the permit complete and the sale data
    // unlocked.
    let resumed = fixture.plan(permit_request()).await.unwrap();
    assert_eq!(resumed.steps[0].items[0].status, Status::Complete);
    assert!(resumed.steps[1].items[0].data.is_some());
}

#[tokio::test]
async fn approvals_are_used_without_permits() {
    let fixture = erc20_fixture();
    let mut request = permit_request();
    request.use_permit = false;

    let plan = fixture.plan(request).await.unwrap();

    let ids: Vec<_> = plan.steps.iter().map(|step| step.id).collect();
    assert_eq!(ids, vec![StepId::CurrencyApproval, StepId::Sale]);
    let approval = &plan.steps[0].items[0];
    assert_eq!(approval.status, Status::Incomplete);
    assert!(matches!(approval.data, Some(StepData::Transaction(_))));
}
