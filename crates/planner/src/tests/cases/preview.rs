//! Preview mode: `onlyPath` + `partial` with no quantities anywhere
//! rewrites quantities to the preview default and reports the true upper
//! bound per item.

use {
    crate::{
        execute::RequestItem,
        tests::setup::{self, Fixture},
    },
    alloy_primitives::U256,
    maplit::hashmap,
};

#[tokio::test]
async fn preview_reports_true_upper_bounds() {
    let mut erc1155 = setup::listing("0x01", 1, 1_000);
    erc1155.token_standard = crate::domain::eth::TokenStandard::Erc1155;
    erc1155.quantity_remaining = 12;
    let fixture = Fixture::default().with_order(erc1155);

    let mut request = setup::request(vec![setup::token_item(1)]);
    request.only_path = true;
    request.partial = true;

    let plan = fixture.plan(request).await.unwrap();

    // No steps in an only-path response.
    assert!(plan.steps.is_empty());
    let bounds = plan.max_quantities.expect("preview populates bounds");
    assert_eq!(bounds.len(), 1);
    assert_eq!(bounds[0].item_index, 0);
    assert_eq!(bounds[0].max_quantity, 12);

    // Quantity defaulted to the preview amount, clamped by availability.
    assert_eq!(plan.path.iter().map(|item| item.quantity).sum::<u64>(), 12);
}

#[tokio::test]
async fn zero_quantity_items_are_rewritten_to_the_preview_default() {
    let mut erc1155 = setup::listing("0x01", 1, 1_000);
    erc1155.token_standard = crate::domain::eth::TokenStandard::Erc1155;
    erc1155.quantity_remaining = 12;
    let fixture = Fixture::default().with_order(erc1155);

    // `quantity: 0` counts as absent, so this is still a preview and the
    // item gets the default of 30, clamped by availability.
    let mut request = setup::request(vec![RequestItem {
        quantity: Some(0),
        ..setup::token_item(1)
    }]);
    request.only_path = true;
    request.partial = true;

    let plan = fixture.plan(request).await.unwrap();

    let bounds = plan.max_quantities.expect("zero quantities keep preview mode");
    assert_eq!(bounds[0].max_quantity, 12);
    assert_eq!(plan.path.iter().map(|item| item.quantity).sum::<u64>(), 12);
}

#[tokio::test]
async fn explicit_quantities_disable_preview() {
    let fixture = Fixture::default().with_order(setup::listing("0x01", 1, 1_000));

    let mut request = setup::request(vec![RequestItem {
        quantity: Some(1),
        ..setup::token_item(1)
    }]);
    request.only_path = true;
    request.partial = true;

    let plan = fixture.plan(request).await.unwrap();

    assert!(plan.max_quantities.is_none());
    assert_eq!(plan.path.len(), 1);
}

#[tokio::test]
async fn preview_bounds_erc721_tokens_at_one() {
    let fixture = Fixture::default()
        .with_order(setup::listing("0x01", 1, 1_000))
        .with_order(setup::listing("0x02", 1, 1_100));
    // Both listings offer the same token from the same maker, who holds
    // exactly one.
    *fixture.orderbook.maker_balances.lock().unwrap() = hashmap! {
        (
            alloy_primitives::Address::repeat_byte(0x11),
            setup::contract(),
            U256::from(1),
        ) => 1,
    };

    let mut request = setup::request(vec![setup::token_item(1)]);
    request.only_path = true;
    request.partial = true;

    let plan = fixture.plan(request).await.unwrap();

    // Two listings of the same ERC721 token still mean one buyable unit.
    let bounds = plan.max_quantities.unwrap();
    assert_eq!(bounds[0].max_quantity, 1);
    assert_eq!(plan.path.len(), 1);
    assert_eq!(plan.path[0].raw_quote, U256::from(1_000));
}
