//! The balance check runs before any step is handed out; skipping it is a
//! caller choice except when Blur is in the cart.

use {
    crate::tests::setup::{self, Fixture, TAKER},
    alloy_primitives::U256,
};

#[tokio::test]
async fn native_shortfall_fails_the_request() {
    let fixture = Fixture::default().with_order(setup::listing("0x01", 1, 1_000_000));
    fixture
        .eth
        .native_balances
        .lock()
        .unwrap()
        .insert(TAKER, U256::from(10));

    let result = fixture.plan(setup::request(vec![setup::token_item(1)])).await;

    assert!(matches!(result, Err(crate::Error::BalanceTooLow)));
}

#[tokio::test]
async fn skip_balance_check_is_honored_without_blur() {
    let fixture = Fixture::default().with_order(setup::listing("0x01", 1, 1_000_000));
    fixture
        .eth
        .native_balances
        .lock()
        .unwrap()
        .insert(TAKER, U256::from(10));

    let mut request = setup::request(vec![setup::token_item(1)]);
    request.skip_balance_check = true;

    let plan = fixture.plan(request).await.unwrap();
    assert_eq!(plan.path.len(), 1);
}

#[tokio::test]
async fn gas_summary_prices_the_bundles() {
    let fixture = Fixture::default().with_order(setup::listing("0x01", 1, 1_000));

    let plan = fixture
        .plan(setup::request(vec![setup::token_item(1)]))
        .await
        .unwrap();

    // One listing: 100_000 gas at the oracle's price of 10.
    assert_eq!(plan.fees.gas, U256::from(1_000_000));

    let mut pinned = setup::request(vec![setup::token_item(1)]);
    pinned.max_fee_per_gas = Some(U256::from(25));
    let plan = fixture.plan(pinned).await.unwrap();
    assert_eq!(plan.fees.gas, U256::from(2_500_000));
}
