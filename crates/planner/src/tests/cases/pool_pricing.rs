//! A cart of several units from one AMM pool must walk the pool's
//! published price schedule.

use {
    crate::{
        domain::order::{self, OrderId},
        execute::RequestItem,
        tests::setup::{self, Fixture},
    },
    alloy_primitives::{Address, U256},
    maplit::hashmap,
};

fn pool_order(id: &str, pool: Address, quantity: u64) -> order::Order {
    let mut order = setup::listing(id, 1, 0);
    order.kind = order::Kind::NftxV3(order::PoolData { pool });
    order.maker = pool;
    order.token_id = None;
    order.quantity_remaining = quantity;
    order
}

#[tokio::test]
async fn pool_units_are_priced_along_the_curve() {
    let pool = Address::repeat_byte(0xab);
    let fixture = Fixture::default().with_order(pool_order("0xp1", pool, 4));
    *fixture.orderbook.pool_prices.lock().unwrap() = hashmap! {
        pool => vec![
            U256::from(1000),
            U256::from(1100),
            U256::from(1200),
            U256::from(1300),
        ],
    };

    let plan = fixture
        .plan(setup::request(vec![RequestItem {
            order_id: Some(OrderId::new("0xp1")),
            quantity: Some(3),
            ..Default::default()
        }]))
        .await
        .unwrap();

    // One line per unit, each at its own step of the schedule.
    assert_eq!(plan.path.len(), 3);
    assert_eq!(plan.path[0].raw_quote, U256::from(1000));
    assert_eq!(plan.path[1].raw_quote, U256::from(1100));
    assert_eq!(plan.path[2].raw_quote, U256::from(1200));
}

#[tokio::test]
async fn pool_prices_repeat_past_the_schedule_tail() {
    let pool = Address::repeat_byte(0xac);
    let fixture = Fixture::default().with_order(pool_order("0xp2", pool, 5));
    *fixture.orderbook.pool_prices.lock().unwrap() = hashmap! {
        pool => vec![U256::from(500), U256::from(600)],
    };

    let plan = fixture
        .plan(setup::request(vec![RequestItem {
            order_id: Some(OrderId::new("0xp2")),
            quantity: Some(4),
            ..Default::default()
        }]))
        .await
        .unwrap();

    let quotes: Vec<_> = plan.path.iter().map(|item| item.raw_quote).collect();
    assert_eq!(
        quotes,
        vec![U256::from(500), U256::from(600), U256::from(600), U256::from(600)]
    );
}
