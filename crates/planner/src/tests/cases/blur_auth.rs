//! Blur fills are gated behind signed-login: without a cached credential
//! the plan exposes only the challenge, and resumes after the client
//! posts the signature.

use {
    crate::{
        domain::{
            order::{self, Source},
            plan::{Status, StepId},
        },
        infra::signatures::{AuthScope, CachedAuth, SignatureStore},
        tests::setup::{self, Fixture, TAKER},
    },
    std::time::Duration,
};

fn blur_listing(id: &str, token_id: u64, price: u64) -> order::Order {
    let mut order = setup::listing(id, token_id, price);
    order.kind = order::Kind::Blur(order::BlurData { partial: false });
    order.source = Some(Source::new("blur.io"));
    order
}

#[tokio::test]
async fn missing_blur_auth_returns_only_the_challenge() {
    let fixture = Fixture::default().with_order(blur_listing("0xb1", 1, 1_000));
    let plan = fixture
        .plan(setup::request(vec![setup::token_item(1)]))
        .await
        .unwrap();

    // Only the auth step and the poll-again placeholder; no sale data
    // leaks before sign-in.
    let ids: Vec<_> = plan.steps.iter().map(|step| step.id).collect();
    assert_eq!(ids, vec![StepId::Auth, StepId::CurrencyApproval]);
    assert_eq!(plan.steps[0].items[0].status, Status::Incomplete);
    assert!(plan.steps[0].items[0].data.is_some());
    assert!(plan.steps[1].items[0].data.is_none());
    // The path is still present so the client can show the cart.
    assert_eq!(plan.path.len(), 1);
}

#[tokio::test]
async fn cached_blur_auth_unlocks_the_sale() {
    let fixture = Fixture::default().with_order(blur_listing("0xb1", 1, 1_000));
    fixture
        .store
        .save_auth(
            AuthScope::Blur,
            TAKER,
            CachedAuth {
                signature: "0xsigned-login".to_string(),
                ttl: Duration::from_secs(300),
            },
        )
        .await
        .unwrap();

    let plan = fixture
        .plan(setup::request(vec![setup::token_item(1)]))
        .await
        .unwrap();

    let ids: Vec<_> = plan.steps.iter().map(|step| step.id).collect();
    assert_eq!(ids, vec![StepId::Sale]);
    assert!(plan.steps[0].items[0].data.is_some());
}

#[tokio::test]
async fn blur_and_opensea_split_shields_opensea_from_global_fees() {
    let mut opensea = setup::listing("0xos", 2, 10_000);
    opensea.source = Some(Source::new("opensea.io"));
    let mut looksrare = setup::listing("0xlr", 3, 10_000);
    looksrare.kind = order::Kind::LooksRare(order::LooksRareData {
        strategy: Default::default(),
    });

    let fixture = Fixture::default()
        .with_order(blur_listing("0xb1", 1, 10_000))
        .with_order(opensea)
        .with_order(looksrare);
    fixture
        .store
        .save_auth(
            AuthScope::Blur,
            TAKER,
            CachedAuth {
                signature: "0xsigned-login".to_string(),
                ttl: Duration::from_secs(300),
            },
        )
        .await
        .unwrap();

    let mut request = setup::request(vec![
        setup::token_item(1),
        setup::token_item(2),
        setup::token_item(3),
    ]);
    request.fees_on_top =
        vec!["0x00000000000000000000000000000000000000fe:300".to_string()];

    let plan = fixture.plan(request).await.unwrap();

    // Only the LooksRare item is eligible, so it carries the whole fee.
    let by_id = |id: &str| {
        plan.path
            .iter()
            .find(|item| item.order_id.0 == id)
            .unwrap()
    };
    assert!(by_id("0xb1").fees_on_top.is_empty());
    assert!(by_id("0xos").fees_on_top.is_empty());
    assert_eq!(by_id("0xlr").fees_on_top.len(), 1);
    assert_eq!(
        by_id("0xlr").fees_on_top[0].raw_amount,
        alloy_primitives::U256::from(300)
    );
}

#[tokio::test]
async fn exclude_eoa_drops_blur_candidates() {
    let fixture = Fixture::default()
        .with_order(blur_listing("0xb1", 1, 1_000))
        .with_order(setup::listing("0x01", 1, 2_000));
    let mut request = setup::request(vec![setup::token_item(1)]);
    request.exclude_eoa = true;

    let plan = fixture.plan(request).await.unwrap();

    // The cheaper Blur listing is ineligible; the Seaport one fills.
    assert_eq!(plan.path.len(), 1);
    assert_eq!(plan.path[0].order_id.0, "0x01");
}
