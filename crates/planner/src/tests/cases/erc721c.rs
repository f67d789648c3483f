//! ERC721-C collections require a verified-EOA taker: first an off-chain
//! challenge, then an on-chain verification transaction, and only then the
//! sale.

use {
    crate::{
        domain::plan::{Status, StepData, StepId},
        infra::{
            orderbook::Erc721cConfig,
            signatures::{AuthScope, CachedAuth, SignatureStore, ERC721C_AUTH_TTL},
        },
        tests::setup::{self, Fixture, TAKER},
    },
    alloy_primitives::Address,
};

fn validator() -> Address {
    Address::repeat_byte(0xcc)
}

fn erc721c_fixture() -> Fixture {
    let fixture = Fixture::default().with_order(setup::listing("0x01", 1, 1_000));
    fixture.orderbook.erc721c.lock().unwrap().insert(
        setup::contract(),
        Erc721cConfig {
            transfer_validator: validator(),
        },
    );
    fixture
}

#[tokio::test]
async fn unverified_taker_walks_challenge_then_transaction() {
    let fixture = erc721c_fixture();
    let request = || setup::request(vec![setup::token_item(1)]);

    // 1. No signed challenge yet: only the auth gate comes back.
    let plan = fixture.plan(request()).await.unwrap();
    let ids: Vec<_> = plan.steps.iter().map(|step| step.id).collect();
    assert_eq!(ids, vec![StepId::Auth, StepId::CurrencyApproval]);

    // 2. The client signs; the next poll carries the on-chain
    //    verification ahead of the sale.
    fixture
        .store
        .save_auth(
            AuthScope::Erc721c {
                validator: validator(),
            },
            TAKER,
            CachedAuth {
                signature: "cafe".to_string(),
                ttl: ERC721C_AUTH_TTL,
            },
        )
        .await
        .unwrap();
    let plan = fixture.plan(request()).await.unwrap();
    let ids: Vec<_> = plan.steps.iter().map(|step| step.id).collect();
    assert_eq!(ids, vec![StepId::AuthTransaction, StepId::Sale]);
    let verification = &plan.steps[0].items[0];
    assert_eq!(verification.status, Status::Incomplete);
    match &verification.data {
        Some(StepData::Transaction(tx)) => assert_eq!(tx.to, validator()),
        other => panic!("expected a transaction, got {other:?}"),
    }

    // 3. Once verified on chain, nothing stands before the sale.
    fixture
        .eth
        .verified
        .lock()
        .unwrap()
        .insert((validator(), TAKER));
    let plan = fixture.plan(request()).await.unwrap();
    let ids: Vec<_> = plan.steps.iter().map(|step| step.id).collect();
    assert_eq!(ids, vec![StepId::Sale]);
}
