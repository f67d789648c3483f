//! One native-currency listing, no fees on top: the simplest possible
//! plan, a single sale step.

use {
    crate::{
        domain::plan::{Status, StepId},
        tests::setup::{self, Fixture},
    },
    alloy_primitives::U256,
};

#[tokio::test]
async fn buys_one_token_with_a_single_sale_step() {
    let fixture = Fixture::default().with_order(setup::listing("0x01", 1, 1_000_000));
    let plan = fixture
        .plan(setup::request(vec![setup::token_item(1)]))
        .await
        .unwrap();

    assert_eq!(plan.path.len(), 1);
    let item = &plan.path[0];
    assert_eq!(item.order_id.0, "0x01");
    assert_eq!(item.quantity, 1);
    assert_eq!(item.raw_quote, U256::from(1_000_000));
    // No fees on top: the total is exactly the quote.
    assert_eq!(item.total_raw_price, item.raw_quote);
    assert!(item.fees_on_top.is_empty());

    let ids: Vec<_> = plan.steps.iter().map(|step| step.id).collect();
    assert_eq!(ids, vec![StepId::Sale]);
    let sale = &plan.steps[0].items[0];
    assert_eq!(sale.status, Status::Incomplete);
    assert!(sale.data.is_some());
    assert!(sale.check.is_some());
    assert_eq!(sale.order_ids, vec![item.order_id.clone()]);
}

#[tokio::test]
async fn identical_requests_produce_identical_plans() {
    let fixture = Fixture::default().with_order(setup::listing("0x01", 1, 1_000_000));
    let request = || setup::request(vec![setup::token_item(1)]);

    let first = fixture.plan(request()).await.unwrap();
    let second = fixture.plan(request()).await.unwrap();

    assert_eq!(first.request_id, second.request_id);
    assert_eq!(
        serde_json::to_value(&first.steps).unwrap(),
        serde_json::to_value(&second.steps).unwrap(),
    );
    assert_eq!(
        serde_json::to_value(&first.path).unwrap(),
        serde_json::to_value(&second.path).unwrap(),
    );
}

#[tokio::test]
async fn global_fee_lands_on_every_eligible_item() {
    let fixture = Fixture::default()
        .with_order(setup::listing("0x01", 1, 10_000))
        .with_order(setup::listing("0x02", 2, 10_000))
        .with_order(setup::listing("0x03", 3, 10_000));
    let mut request = setup::request(vec![
        setup::token_item(1),
        setup::token_item(2),
        setup::token_item(3),
    ]);
    request.fees_on_top =
        vec!["0x00000000000000000000000000000000000000fe:300".to_string()];

    let plan = fixture.plan(request).await.unwrap();

    assert_eq!(plan.path.len(), 3);
    let mut collected = U256::ZERO;
    for item in &plan.path {
        assert_eq!(item.fees_on_top.len(), 1);
        assert_eq!(item.fees_on_top[0].raw_amount, U256::from(100));
        assert_eq!(item.total_raw_price, U256::from(10_100));
        collected += item.fees_on_top[0].raw_amount;
    }
    assert_eq!(collected, U256::from(300));
}
