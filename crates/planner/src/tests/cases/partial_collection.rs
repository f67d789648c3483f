//! Collection floor buys: FIFO expansion into token intents, the shared
//! quantity budget, and partial vs fail-fast shortfall semantics.

use {
    crate::{
        domain::plan::ErrorCode,
        execute::RequestItem,
        tests::setup::{self, Fixture},
    },
    alloy_primitives::U256,
};

fn collection_item(quantity: u64) -> RequestItem {
    RequestItem {
        collection: Some(setup::contract()),
        quantity: Some(quantity),
        ..Default::default()
    }
}

fn floor_fixture(listed: u64) -> Fixture {
    let fixture = (1..=listed).fold(Fixture::default(), |fixture, i| {
        fixture.with_order(setup::listing(&format!("0x{i:02}"), i, 1_000 + i))
    });
    fixture.orderbook.floor.lock().unwrap().insert(
        setup::contract(),
        (1..=listed).map(setup::token).collect(),
    );
    fixture
}

#[tokio::test]
async fn buys_the_cheapest_n_from_the_floor() {
    let fixture = floor_fixture(5);

    let plan = fixture
        .plan(setup::request(vec![collection_item(3)]))
        .await
        .unwrap();

    assert_eq!(plan.path.len(), 3);
    // Floor order: cheapest tokens first, never more than asked.
    assert_eq!(plan.path[0].raw_quote, U256::from(1_001));
    assert_eq!(plan.path[2].raw_quote, U256::from(1_003));
}

#[tokio::test]
async fn shortfall_is_quantity_unavailable_under_partial() {
    let fixture = floor_fixture(2);
    let mut request = setup::request(vec![collection_item(3)]);
    request.partial = true;

    let plan = fixture.plan(request).await.unwrap();

    assert_eq!(plan.path.len(), 2);
    assert!(plan
        .errors
        .iter()
        .any(|error| error.message == ErrorCode::QuantityUnavailable));
}

#[tokio::test]
async fn shortfall_fails_fast_without_partial() {
    let fixture = floor_fixture(2);

    let result = fixture.plan(setup::request(vec![collection_item(3)])).await;

    assert!(matches!(
        result,
        Err(crate::Error::Item {
            code: ErrorCode::QuantityUnavailable,
            ..
        })
    ));
}

#[tokio::test]
async fn self_fill_is_rejected() {
    let mut own = setup::listing("0x01", 1, 1_000);
    own.maker = setup::TAKER;
    let fixture = Fixture::default().with_order(own);

    let result = fixture
        .plan(setup::request(vec![RequestItem {
            order_id: Some(crate::domain::order::OrderId::new("0x01")),
            ..Default::default()
        }]))
        .await;

    assert!(matches!(
        result,
        Err(crate::Error::Item {
            code: ErrorCode::SelfFill,
            ..
        })
    ));
}

#[tokio::test]
async fn inactive_orders_surface_their_state() {
    let mut filled = setup::listing("0x01", 1, 1_000);
    filled.fillability = crate::domain::order::Fillability::Filled;
    let fixture = Fixture::default().with_order(filled);

    let by_id = || {
        setup::request(vec![RequestItem {
            order_id: Some(crate::domain::order::OrderId::new("0x01")),
            ..Default::default()
        }])
    };

    let result = fixture.plan(by_id()).await;
    assert!(matches!(
        result,
        Err(crate::Error::Item {
            code: ErrorCode::OrderFilled,
            ..
        })
    ));

    // `allowInactiveOrderIds` bypasses the fillability gate.
    let mut request = by_id();
    request.allow_inactive_order_ids = true;
    let plan = fixture.plan(request).await.unwrap();
    assert_eq!(plan.path.len(), 1);
}

#[tokio::test]
async fn sanctioned_takers_are_blocked() {
    let fixture = Fixture::default().with_order(setup::listing("0x01", 1, 1_000));
    fixture
        .orderbook
        .sanctioned
        .lock()
        .unwrap()
        .insert(setup::TAKER);

    let result = fixture.plan(setup::request(vec![setup::token_item(1)])).await;

    assert!(matches!(result, Err(crate::Error::Unauthorized(_))));
}
