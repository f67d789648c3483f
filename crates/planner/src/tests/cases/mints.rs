//! Mint and prefer-mint fill types: wallet caps, allowlist skips and the
//! mint-then-trade fallback.

use {
    crate::{
        domain::{eth, intent::FillType, mint::Mint},
        execute::RequestItem,
        tests::setup::{self, Fixture},
    },
    alloy_primitives::U256,
};

fn open_mint(price: u64) -> Mint {
    Mint {
        collection: setup::contract(),
        contract: setup::contract(),
        token_id: None,
        currency: eth::NATIVE_TOKEN,
        price: U256::from(price),
        stage: Some("public".to_string()),
        max_per_wallet: Some(5),
        allowlist: false,
        tx: eth::Transaction {
            from: setup::TAKER,
            to: setup::contract(),
            data: Default::default(),
            value: U256::from(price),
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
        },
    }
}

fn collection_item(fill_type: FillType, quantity: u64) -> RequestItem {
    RequestItem {
        collection: Some(setup::contract()),
        quantity: Some(quantity),
        fill_type: Some(fill_type),
        ..Default::default()
    }
}

#[tokio::test]
async fn mints_aggregate_under_one_path_line() {
    let fixture = Fixture::default();
    fixture.orderbook.mints.lock().unwrap().push(open_mint(1_000));

    let plan = fixture
        .plan(setup::request(vec![collection_item(FillType::Mint, 3)]))
        .await
        .unwrap();

    assert_eq!(plan.path.len(), 1);
    assert_eq!(plan.path[0].quantity, 3);
    assert_eq!(plan.path[0].raw_quote, U256::from(3_000));
}

#[tokio::test]
async fn wallet_cap_limits_the_mint() {
    let fixture = Fixture::default();
    fixture.orderbook.mints.lock().unwrap().push(open_mint(1_000));
    fixture
        .orderbook
        .mint_caps
        .lock()
        .unwrap()
        .insert(setup::contract(), 2);

    // Asking for 4 with a per-wallet cap of 2 fails closed ...
    let strict = fixture
        .plan(setup::request(vec![collection_item(FillType::Mint, 4)]))
        .await;
    assert!(matches!(
        strict,
        Err(crate::Error::Item {
            code: crate::domain::plan::ErrorCode::MintQuotaExceeded,
            ..
        })
    ));

    // ... and fills what it can under `partial`.
    let mut request = setup::request(vec![collection_item(FillType::Mint, 4)]);
    request.partial = true;
    let plan = fixture.plan(request).await.unwrap();
    assert_eq!(plan.path.len(), 1);
    assert_eq!(plan.path[0].quantity, 2);
    assert!(plan
        .errors
        .iter()
        .any(|error| error.message == crate::domain::plan::ErrorCode::MintQuotaExceeded));
}

#[tokio::test]
async fn prefer_mint_falls_back_to_listings() {
    let fixture = Fixture::default().with_order(setup::listing("0x01", 7, 9_000));
    fixture.orderbook.mints.lock().unwrap().push(open_mint(1_000));
    fixture
        .orderbook
        .mint_caps
        .lock()
        .unwrap()
        .insert(setup::contract(), 1);
    fixture
        .orderbook
        .floor
        .lock()
        .unwrap()
        .insert(setup::contract(), vec![setup::token(7)]);

    let plan = fixture
        .plan(setup::request(vec![collection_item(FillType::PreferMint, 2)]))
        .await
        .unwrap();

    // One unit minted (the cap), the residual bought off the floor.
    assert_eq!(plan.path.len(), 2);
    assert_eq!(plan.path[0].quantity, 1);
    assert_eq!(plan.path[0].raw_quote, U256::from(1_000));
    assert_eq!(plan.path[1].order_id.0, "0x01");
}

#[tokio::test]
async fn allowlist_misses_are_skipped_silently() {
    let fixture = Fixture::default();
    let mut gated = open_mint(500);
    gated.allowlist = true;
    fixture.orderbook.mints.lock().unwrap().push(gated);
    fixture.orderbook.mints.lock().unwrap().push(open_mint(1_000));

    let plan = fixture
        .plan(setup::request(vec![collection_item(FillType::Mint, 1)]))
        .await
        .unwrap();

    // The gated (cheaper) stage is skipped without an error; the open
    // stage fills.
    assert_eq!(plan.path.len(), 1);
    assert_eq!(plan.path[0].raw_quote, U256::from(1_000));
    assert!(plan.errors.is_empty());
}

#[tokio::test]
async fn no_open_mints_is_an_error() {
    let fixture = Fixture::default();

    let result = fixture
        .plan(setup::request(vec![collection_item(FillType::Mint, 1)]))
        .await;

    assert!(matches!(
        result,
        Err(crate::Error::Item {
            code: crate::domain::plan::ErrorCode::CollectionNoEligibleMints,
            ..
        })
    ));
}
