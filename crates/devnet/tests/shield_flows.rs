//! End-to-end shield flows against the devnet
//!
//! Each test builds its own devnet: two local shield contracts, a mirror and
//! the deterministic prover.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::net::TcpListener;

use mantle_core::crypto::{leaf_node_index, NodeHash};
use mantle_core::error::{ContractError, MirrorError, ProverError};
use mantle_core::{
    AssetKind, AssetValue, Commitment, ContractContext, CorrectnessClaim, Engine, FungibleShield, HttpMirrorClient,
    MerkleMirror, SecretKey, ShieldError, TokenId, TransferOutput,
};
use mantle_devnet::{dev_config, server, Devnet, LocalMirror};

const FT_TREE: &str = "FTokenShield";

async fn fungible(devnet: &Devnet, account: &str, funds: u128) -> (FungibleShield, ContractContext) {
    devnet.fungible.credit(account, funds);
    let shield = devnet.fungible_shield(devnet.engine(), account).await.unwrap();
    let ctx = devnet.context(account, AssetKind::Fungible).unwrap();
    (shield, ctx)
}

fn claim_for(commitment: &Commitment, block: u64) -> CorrectnessClaim {
    CorrectnessClaim {
        disclosed: commitment.disclose(),
        commitment: commitment.hash,
        leaf_index: commitment.leaf_index().unwrap(),
        mined_at_block: block,
    }
}

fn lagging(max_poll_attempts: u32) -> Devnet {
    let mut config = dev_config();
    config.mirror.max_poll_attempts = max_poll_attempts;
    Devnet::with_mirror(LocalMirror::new(), config)
}

#[tokio::test]
async fn test_mint_then_check_on_returned_index() {
    let devnet = Devnet::new();
    let (shield, ctx) = fungible(&devnet, "alice", 10_000).await;
    let alice = SecretKey::random();

    assert_eq!(
        AssetValue::Fungible(10_000).to_hex(),
        "0x00000000000000000000000000002710"
    );
    let minted = shield.mint(&ctx, 0x2710, alice.public_key()).await.unwrap();
    assert_eq!(minted.commitment.leaf_index(), Some(0));
    assert_eq!(minted.record.kind.name(), "minted");
    assert_eq!(devnet.fungible.balance_of("alice"), 0);

    let report = shield
        .check_correctness(&ctx, &claim_for(&minted.commitment, minted.block_number))
        .await
        .unwrap();
    assert!(report.hash_matches);
    assert!(report.on_chain_matches);
    assert_eq!(report.ground_truth_matches, None);
}

#[tokio::test]
async fn test_concurrent_mints_get_distinct_indices() {
    let devnet = Devnet::new();
    let (shield, ctx) = fungible(&devnet, "alice", 8).await;
    let owner = SecretKey::random().public_key();

    let outcomes = join_all((0..8).map(|_| shield.mint(&ctx, 1, owner))).await;
    let mut indices: Vec<u64> = outcomes
        .into_iter()
        .map(|outcome| outcome.unwrap().commitment.leaf_index().unwrap())
        .collect();
    indices.sort_unstable();
    assert_eq!(indices, (0..8).collect::<Vec<u64>>());
    assert_eq!(devnet.fungible.leaf_count(), 8);
}

#[tokio::test]
async fn test_unbalanced_transfer_never_reaches_prover() {
    let devnet = Devnet::new();
    let (shield, ctx) = fungible(&devnet, "alice", 12).await;
    let alice = SecretKey::random();
    let bob = SecretKey::random().public_key();

    let a = shield.mint(&ctx, 5, alice.public_key()).await.unwrap().commitment;
    let b = shield.mint(&ctx, 7, alice.public_key()).await.unwrap().commitment;
    let calls = devnet.prover.calls();

    let outputs = [
        TransferOutput { owner: bob, amount: 5 },
        TransferOutput {
            owner: alice.public_key(),
            amount: 8,
        },
    ];
    let err = shield
        .transfer(&ctx, &alice, [a.clone(), b.clone()], outputs)
        .await
        .unwrap_err();
    assert!(matches!(err, ShieldError::ValueMismatch { inputs: 12, outputs: 13 }));

    let err = shield.send(&ctx, &alice, [a, b], bob, 13).await.unwrap_err();
    assert!(matches!(err, ShieldError::ValueMismatch { inputs: 12, outputs: 13 }));
    assert_eq!(devnet.prover.calls(), calls);
}

#[tokio::test]
async fn test_send_then_double_spend_rejected() {
    let devnet = Devnet::new();
    let (shield, ctx) = fungible(&devnet, "alice", 20_000).await;
    let alice = SecretKey::random();
    let bob = SecretKey::random();

    let a = shield.mint(&ctx, 10_000, alice.public_key()).await.unwrap().commitment;
    let b = shield.mint(&ctx, 10_000, alice.public_key()).await.unwrap().commitment;

    let sent = shield
        .send(&ctx, &alice, [a.clone(), b.clone()], bob.public_key(), 4_000)
        .await
        .unwrap();
    assert_eq!(sent.outputs.len(), 2);
    assert_eq!(sent.outputs[0].value, AssetValue::Fungible(4_000));
    assert_eq!(sent.outputs[0].owner_public_key, bob.public_key());
    assert_eq!(sent.outputs[1].value, AssetValue::Fungible(16_000));
    assert_eq!(sent.outputs[1].owner_public_key, alice.public_key());
    assert_eq!(sent.outputs[0].leaf_index(), Some(2));
    assert!(devnet.fungible.is_spent(&a.nullifier(&alice)));
    assert!(devnet.fungible.is_spent(&b.nullifier(&alice)));

    let bob_ctx = devnet.context("bob", AssetKind::Fungible).unwrap();
    let report = shield
        .check_correctness(&bob_ctx, &claim_for(&sent.outputs[0], sent.block_number))
        .await
        .unwrap();
    assert!(report.is_valid());
    assert!(report.into_record(&claim_for(&sent.outputs[0], sent.block_number)).is_some());

    let err = shield.send(&ctx, &alice, [a, b], bob.public_key(), 1).await.unwrap_err();
    assert!(matches!(err, ShieldError::ChainRejected(ContractError::NullifierSpent(_))));
}

#[tokio::test]
async fn test_batch_transfer_pads_to_fixed_outputs() {
    let devnet = Devnet::new();
    let (shield, ctx) = fungible(&devnet, "alice", 100).await;
    let alice = SecretKey::random();
    let input = shield.mint(&ctx, 100, alice.public_key()).await.unwrap().commitment;

    let receivers: Vec<TransferOutput> = [10u128, 20, 70]
        .iter()
        .map(|&amount| TransferOutput {
            owner: SecretKey::random().public_key(),
            amount,
        })
        .collect();
    let sent = shield.batch_transfer(&ctx, &alice, input, &receivers).await.unwrap();

    assert_eq!(sent.outputs.len(), 20);
    for (output, receiver) in sent.outputs.iter().zip(&receivers) {
        assert_eq!(output.value, AssetValue::Fungible(receiver.amount));
        assert_eq!(output.owner_public_key, receiver.owner);
    }
    for padding in &sent.outputs[3..] {
        assert_eq!(padding.value, AssetValue::Fungible(0));
        assert_eq!(padding.owner_public_key, alice.public_key());
    }
    assert_eq!(devnet.fungible.leaf_count(), 21);
}

#[tokio::test]
async fn test_batch_transfer_rejects_too_many_outputs() {
    let devnet = Devnet::new();
    let (shield, ctx) = fungible(&devnet, "alice", 21).await;
    let alice = SecretKey::random();
    let input = shield.mint(&ctx, 21, alice.public_key()).await.unwrap().commitment;
    let calls = devnet.prover.calls();

    let receivers = vec![
        TransferOutput {
            owner: alice.public_key(),
            amount: 1,
        };
        21
    ];
    let err = shield.batch_transfer(&ctx, &alice, input, &receivers).await.unwrap_err();
    assert!(matches!(err, ShieldError::InvalidInput(_)));
    assert_eq!(devnet.prover.calls(), calls);
}

#[tokio::test]
async fn test_burn_pays_public_balance_once() {
    let devnet = Devnet::new();
    let (shield, ctx) = fungible(&devnet, "alice", 50).await;
    let alice = SecretKey::random();
    let input = shield.mint(&ctx, 50, alice.public_key()).await.unwrap().commitment;

    let burned = shield.burn(&ctx, &alice, &input, "carol").await.unwrap();
    assert_eq!(devnet.fungible.balance_of("carol"), 50);
    assert!(devnet.fungible.is_spent(&input.nullifier(&alice)));
    assert_eq!(burned.record.kind.name(), "burned");

    let err = shield.burn(&ctx, &alice, &input, "carol").await.unwrap_err();
    assert!(matches!(err, ShieldError::ChainRejected(ContractError::NullifierSpent(_))));
    assert_eq!(devnet.fungible.balance_of("carol"), 50);
}

#[tokio::test]
async fn test_burn_rejects_empty_payee_and_foreign_key() {
    let devnet = Devnet::new();
    let (shield, ctx) = fungible(&devnet, "alice", 5).await;
    let alice = SecretKey::random();
    let input = shield.mint(&ctx, 5, alice.public_key()).await.unwrap().commitment;

    assert!(matches!(
        shield.burn(&ctx, &alice, &input, " ").await,
        Err(ShieldError::InvalidInput(_))
    ));
    assert!(matches!(
        shield.burn(&ctx, &SecretKey::random(), &input, "mallory").await,
        Err(ShieldError::NotOwner(hash)) if hash == input.hash
    ));
}

#[tokio::test]
async fn test_mint_without_public_funds_is_rejected() {
    let devnet = Devnet::new();
    let (shield, ctx) = fungible(&devnet, "alice", 0).await;
    let err = shield
        .mint(&ctx, 1, SecretKey::random().public_key())
        .await
        .unwrap_err();
    assert!(matches!(err, ShieldError::ChainRejected(ContractError::Reverted(_))));
    assert_eq!(devnet.fungible.leaf_count(), 0);
}

#[tokio::test]
async fn test_prover_failure_fails_only_that_flow() {
    let devnet = Devnet::new();
    let (shield, ctx) = fungible(&devnet, "alice", 2).await;
    let owner = SecretKey::random().public_key();

    devnet.prover.fail_next(1);
    let err = shield.mint(&ctx, 1, owner).await.unwrap_err();
    assert!(matches!(err, ShieldError::Prover(ProverError::Failed { .. })));
    assert_eq!(devnet.fungible.balance_of("alice"), 2);

    assert!(shield.mint(&ctx, 1, owner).await.is_ok());
    assert_eq!(devnet.fungible.balance_of("alice"), 1);
}

#[tokio::test]
async fn test_non_fungible_lifecycle() {
    let devnet = Devnet::new();
    let token = TokenId::from_hex("0x1111111111111111111111111111111111111111111111111111111111111111").unwrap();
    devnet.non_fungible.issue_token("alice", token);

    let shield = devnet.non_fungible_shield(devnet.engine(), "alice").await.unwrap();
    let alice_ctx = devnet.context("alice", AssetKind::NonFungible).unwrap();
    let bob_ctx = devnet.context("bob", AssetKind::NonFungible).unwrap();
    let alice = SecretKey::random();
    let bob = SecretKey::random();

    let minted = shield.mint(&alice_ctx, token, alice.public_key()).await.unwrap();
    assert_eq!(devnet.non_fungible.token_owner(&token), None);

    let sent = shield
        .transfer(&alice_ctx, &alice, minted.commitment.clone(), bob.public_key())
        .await
        .unwrap();
    let received = sent.outputs[0].clone();
    assert_eq!(received.value, AssetValue::NonFungible(token));
    assert_eq!(received.owner_public_key, bob.public_key());

    let report = shield
        .check_correctness(&bob_ctx, &claim_for(&received, sent.block_number))
        .await
        .unwrap();
    assert!(report.is_valid());

    let err = shield.burn(&alice_ctx, &alice, &received, "alice").await.unwrap_err();
    assert!(matches!(err, ShieldError::NotOwner(_)));

    shield.burn(&bob_ctx, &bob, &received, "bob").await.unwrap();
    assert_eq!(devnet.non_fungible.token_owner(&token), Some("bob".to_string()));
}

#[tokio::test]
async fn test_mint_of_unowned_token_is_rejected() {
    let devnet = Devnet::new();
    let token = TokenId::from_hex("0x22").unwrap();
    devnet.non_fungible.issue_token("bob", token);

    let shield = devnet.non_fungible_shield(devnet.engine(), "alice").await.unwrap();
    let ctx = devnet.context("alice", AssetKind::NonFungible).unwrap();
    let err = shield
        .mint(&ctx, token, SecretKey::random().public_key())
        .await
        .unwrap_err();
    assert!(matches!(err, ShieldError::ChainRejected(ContractError::Reverted(_))));
    assert_eq!(devnet.non_fungible.token_owner(&token), Some("bob".to_string()));
}

#[tokio::test]
async fn test_check_waits_for_lagging_mirror() {
    let devnet = lagging(50);
    let (shield, ctx) = fungible(&devnet, "alice", 10).await;
    let minted = shield
        .mint(&ctx, 10, SecretKey::random().public_key())
        .await
        .unwrap();
    assert_eq!(devnet.mirror.latest_leaf(FT_TREE).await.unwrap().block_number, 0);

    let mirror = devnet.mirror.clone();
    let catch_up = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        mirror.sync(FT_TREE).unwrap();
    });

    let report = shield
        .check_correctness(&ctx, &claim_for(&minted.commitment, minted.block_number))
        .await
        .unwrap();
    assert!(report.is_valid());
    catch_up.await.unwrap();
}

#[tokio::test]
async fn test_follower_keeps_mirror_close() {
    let devnet = lagging(50);
    let follower = devnet.mirror.follow(Duration::from_millis(5));
    let (shield, ctx) = fungible(&devnet, "alice", 20).await;
    let alice = SecretKey::random();

    let a = shield.mint(&ctx, 10, alice.public_key()).await.unwrap();
    let b = shield.mint(&ctx, 10, alice.public_key()).await.unwrap();
    let report = shield
        .check_correctness(&ctx, &claim_for(&b.commitment, b.block_number))
        .await
        .unwrap();
    assert!(report.is_valid());

    let sent = shield
        .send(&ctx, &alice, [a.commitment, b.commitment], alice.public_key(), 20)
        .await
        .unwrap();
    assert_eq!(sent.outputs.len(), 2);
    follower.abort();
}

#[tokio::test]
async fn test_spend_waits_for_lagging_mirror() {
    let devnet = lagging(50);
    let (shield, ctx) = fungible(&devnet, "alice", 20).await;
    let alice = SecretKey::random();
    let bob = SecretKey::random();

    let a = shield.mint(&ctx, 10, alice.public_key()).await.unwrap().commitment;
    let b = shield.mint(&ctx, 10, alice.public_key()).await.unwrap().commitment;
    assert_eq!(a.mined_at(), Some(1));
    assert_eq!(b.mined_at(), Some(2));
    assert_eq!(devnet.mirror.latest_leaf(FT_TREE).await.unwrap().leaf_index, None);

    let mirror = devnet.mirror.clone();
    let catch_up = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        mirror.sync_to(FT_TREE, 1).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        mirror.sync(FT_TREE).unwrap();
    });

    let sent = shield
        .send(&ctx, &alice, [a, b], bob.public_key(), 15)
        .await
        .unwrap();
    assert_eq!(sent.outputs[0].value, AssetValue::Fungible(15));
    assert_eq!(sent.outputs[1].value, AssetValue::Fungible(5));
    catch_up.await.unwrap();
}

#[tokio::test]
async fn test_spend_on_stalled_mirror_times_out() {
    let devnet = lagging(3);
    let (shield, ctx) = fungible(&devnet, "alice", 10).await;
    let alice = SecretKey::random();
    let input = shield.mint(&ctx, 10, alice.public_key()).await.unwrap().commitment;
    let calls = devnet.prover.calls();

    let err = shield.burn(&ctx, &alice, &input, "alice").await.unwrap_err();
    assert!(matches!(err, ShieldError::MirrorTimeout { target_block: 1, .. }));
    assert!(err.is_transient());
    assert_eq!(devnet.prover.calls(), calls);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_mirror_block_never_runs_ahead_of_leaves() {
    let devnet = lagging(50);
    let (shield, ctx) = fungible(&devnet, "alice", 300).await;
    let owner = SecretKey::random().public_key();

    let minter = tokio::spawn(async move {
        for _ in 0..300 {
            shield.mint(&ctx, 1, owner).await.unwrap();
        }
    });

    // every mint is one leaf in its own block
    let mut checks = 0u64;
    while !minter.is_finished() {
        devnet.mirror.sync_all();
        let latest = devnet.mirror.latest_leaf(FT_TREE).await.unwrap();
        let leaves = latest.leaf_index.map_or(0, |index| index + 1);
        assert!(
            latest.block_number <= leaves,
            "mirror reports block {} with only {} leaves",
            latest.block_number,
            leaves
        );
        checks += 1;
        tokio::task::yield_now().await;
    }
    minter.await.unwrap();

    devnet.mirror.sync_all();
    let latest = devnet.mirror.latest_leaf(FT_TREE).await.unwrap();
    assert_eq!(latest.block_number, 300);
    assert_eq!(latest.leaf_index, Some(299));
    assert!(checks > 0);
}

#[tokio::test]
async fn test_stalled_mirror_times_out() {
    let devnet = lagging(3);
    let (shield, ctx) = fungible(&devnet, "alice", 10).await;
    let minted = shield
        .mint(&ctx, 10, SecretKey::random().public_key())
        .await
        .unwrap();

    let err = shield
        .check_correctness(&ctx, &claim_for(&minted.commitment, minted.block_number))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ShieldError::MirrorTimeout {
            target_block: 1,
            last_seen: 0,
            attempts: 3
        }
    ));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_forged_leaf_is_detected() {
    let devnet = Devnet::new();
    let (shield, ctx) = fungible(&devnet, "alice", 2).await;
    let alice = SecretKey::random();
    let a = shield.mint(&ctx, 1, alice.public_key()).await.unwrap().commitment;
    let b = shield.mint(&ctx, 1, alice.public_key()).await.unwrap().commitment;

    let forged = NodeHash::random();
    devnet.mirror.forge_leaf(FT_TREE, 0, forged);

    let err = shield
        .send(&ctx, &alice, [a.clone(), b], alice.public_key(), 2)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ShieldError::LeafMismatch { index: 0, expected, found } if expected == a.hash && found == forged
    ));

    let report = shield.check_correctness(&ctx, &claim_for(&a, 1)).await.unwrap();
    assert!(report.hash_matches);
    assert!(!report.on_chain_matches);
    assert!(report.mirror_diverged());
}

#[tokio::test]
async fn test_forged_path_yields_unknown_root() {
    let devnet = Devnet::new();
    let (shield, ctx) = fungible(&devnet, "alice", 1).await;
    let alice = SecretKey::random();
    let input = shield.mint(&ctx, 1, alice.public_key()).await.unwrap().commitment;

    devnet
        .mirror
        .forge_node(FT_TREE, leaf_node_index(0) + 1, NodeHash::random());
    let err = shield.burn(&ctx, &alice, &input, "alice").await.unwrap_err();
    assert!(matches!(err, ShieldError::UnknownRoot(_)));
    assert!(!devnet.fungible.is_spent(&input.nullifier(&alice)));
}

#[tokio::test]
async fn test_cold_mirror_start_is_retried() {
    let devnet = Devnet::new();
    devnet.mirror.fail_next_starts(2);
    assert!(devnet.fungible_shield(devnet.engine(), "alice").await.is_ok());

    devnet.mirror.fail_next_starts(100);
    let err = match devnet.fungible_shield(devnet.engine(), "alice").await {
        Ok(_) => panic!("setup should fail while the mirror stays cold"),
        Err(err) => err,
    };
    assert!(matches!(err, ShieldError::Mirror(MirrorError::Network(_))));
}

#[tokio::test]
async fn test_flows_over_http_mirror() {
    let devnet = Devnet::new();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(server::serve(listener, devnet.mirror.clone()));

    let mut config = devnet.config.clone();
    config.mirror.url = format!("http://{}", addr);
    let client = HttpMirrorClient::new(&config.mirror).unwrap();
    let engine = Engine::new(Arc::new(client.clone()), devnet.prover.clone(), config);

    devnet.fungible.credit("alice", 20);
    let shield = devnet.fungible_shield(engine, "alice").await.unwrap();
    let ctx = devnet.context("alice", AssetKind::Fungible).unwrap();
    let alice = SecretKey::random();
    let bob = SecretKey::random();

    let a = shield.mint(&ctx, 10, alice.public_key()).await.unwrap().commitment;
    let b = shield.mint(&ctx, 10, alice.public_key()).await.unwrap().commitment;
    let sent = shield.send(&ctx, &alice, [a, b], bob.public_key(), 15).await.unwrap();

    let report = shield
        .check_correctness(&ctx, &claim_for(&sent.outputs[0], sent.block_number))
        .await
        .unwrap();
    assert!(report.is_valid());

    let latest = client.latest_leaf(FT_TREE).await.unwrap();
    assert_eq!(latest.leaf_index, Some(3));
    assert!(matches!(
        client.leaf_by_index(FT_TREE, 99).await,
        Err(MirrorError::NotFound { index: 99, .. })
    ));
    assert!(matches!(
        client.latest_leaf("NoSuchTree").await,
        Err(MirrorError::UnknownTree(_))
    ));

    // each start is one request; retrying is the caller's job
    devnet.mirror.fail_next_starts(2);
    assert!(client.start_event_filter(FT_TREE).await.is_err());
    assert!(client.start_event_filter(FT_TREE).await.is_err());
    assert!(client.start_event_filter(FT_TREE).await.is_ok());

    server.abort();
}
