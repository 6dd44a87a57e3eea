//! End-to-end scenarios: two channel nodes exchanging updates over the
//! in-memory bus, backed by the mock chain.

use std::sync::Arc;

use weir::ChannelNode;
use weir_core::{
    canonical_channel_state_bytes, keccak256, AssetId, Balance, Bytes32, Participant,
};
use weir_engine::chain::mock::MockChainReader;
use weir_engine::chain::LatestDeposit;
use weir_engine::messaging::memory::{MemoryBus, MemoryNetwork};
use weir_engine::{EngineConfig, NoopValidation, ProtocolReply, UpdateOutcome};
use weir_store::{ChannelStore, MemoryStore};
use weir_testkit::{hashlock_definition, TestPair, TEST_TIMEOUT};

type Node = ChannelNode<MemoryStore, MemoryBus, Arc<MockChainReader>, NoopValidation>;

struct Harness {
    pair: TestPair,
    alice: Arc<Node>,
    bob: Arc<Node>,
    chain: Arc<MockChainReader>,
}

async fn harness() -> Harness {
    let pair = TestPair::new();
    let chain = Arc::new(MockChainReader::new(pair.network.chain_id));
    chain.register_definition(hashlock_definition());

    let config = EngineConfig::default();
    let network = MemoryNetwork::new();
    let (alice_bus, alice_inbox) = network
        .register(pair.alice.address(), config.message_timeout)
        .await;
    let (bob_bus, bob_inbox) = network
        .register(pair.bob.address(), config.message_timeout)
        .await;

    let alice = Arc::new(ChannelNode::new(
        pair.alice.clone(),
        MemoryStore::new(),
        alice_bus,
        Arc::clone(&chain),
        NoopValidation,
        config.clone(),
    ));
    let bob = Arc::new(ChannelNode::new(
        pair.bob.clone(),
        MemoryStore::new(),
        bob_bus,
        Arc::clone(&chain),
        NoopValidation,
        config,
    ));

    tokio::spawn(Arc::clone(&alice).serve(alice_inbox));
    tokio::spawn(Arc::clone(&bob).serve(bob_inbox));

    Harness {
        pair,
        alice,
        bob,
        chain,
    }
}

async fn assert_replicas_identical(h: &Harness) {
    let address = h.pair.channel_address();
    let ours = h
        .alice
        .store()
        .get_channel_state(&address)
        .await
        .unwrap()
        .expect("alice replica");
    let theirs = h
        .bob
        .store()
        .get_channel_state(&address)
        .await
        .unwrap()
        .expect("bob replica");
    assert_eq!(
        canonical_channel_state_bytes(&ours.core),
        canonical_channel_state_bytes(&theirs.core),
        "replica commitments diverged"
    );
    assert_eq!(ours.latest_update, theirs.latest_update);
}

#[tokio::test]
async fn setup_commits_on_both_replicas() {
    let h = harness().await;

    let state = h
        .alice
        .setup(h.pair.bob.address(), TEST_TIMEOUT, h.pair.network)
        .await
        .unwrap();

    assert_eq!(state.nonce(), 1);
    assert!(state.core.asset_ids.is_empty());
    assert_eq!(state.core.merkle_root, Bytes32::ZERO);

    let latest = state.latest_update.as_ref().unwrap();
    assert!(latest.is_double_signed());
    latest.verify_both_signatures(&state.core).unwrap();

    assert_replicas_identical(&h).await;
}

#[tokio::test]
async fn first_deposit_reconciles_onchain_funds() {
    let h = harness().await;
    let channel = h
        .alice
        .setup(h.pair.bob.address(), TEST_TIMEOUT, h.pair.network)
        .await
        .unwrap();

    h.chain.set_deposit(
        channel.channel_address(),
        AssetId::NATIVE,
        Participant::Alice,
        LatestDeposit {
            nonce: 1,
            amount: 100,
        },
    );

    let result = h
        .alice
        .deposit(channel.channel_address(), AssetId::NATIVE)
        .await
        .unwrap();

    assert_eq!(result.outcome, UpdateOutcome::Applied);
    let state = &result.applied.state;
    assert_eq!(state.nonce(), 2);
    assert_eq!(state.core.asset_ids, vec![AssetId::NATIVE]);
    assert_eq!(state.core.balances[0].amount, [100, 0]);
    assert_eq!(state.core.processed_deposits_alice, vec![100]);
    assert_eq!(state.core.processed_deposits_bob, vec![0]);

    assert_replicas_identical(&h).await;
}

#[tokio::test]
async fn concurrent_proposals_converge_via_sync() {
    let h = harness().await;

    // Both replicas are committed through nonce 2.
    let deposited = h.pair.committed_deposit(100);
    h.alice
        .store()
        .save_channel_state(&deposited.state, None)
        .await
        .unwrap();
    h.bob
        .store()
        .save_channel_state(&deposited.state, None)
        .await
        .unwrap();

    // Bob's deposit won the race to nonce 3; only his replica knows.
    let (_, bobs_applied) = h.pair.commit_update(
        Some(&deposited.state),
        &deposited.active,
        Participant::Bob,
        AssetId::NATIVE,
        weir_core::UpdateDetails::Deposit {
            total_deposits_alice: 100,
            total_deposits_bob: 50,
        },
        None,
    );
    h.bob
        .store()
        .save_channel_state(&bobs_applied.state, None)
        .await
        .unwrap();

    let channel_address = h.pair.channel_address();
    h.chain.set_deposit(
        channel_address,
        AssetId::NATIVE,
        Participant::Alice,
        LatestDeposit {
            nonce: 1,
            amount: 100,
        },
    );
    h.chain.set_deposit(
        channel_address,
        AssetId::NATIVE,
        Participant::Bob,
        LatestDeposit {
            nonce: 1,
            amount: 50,
        },
    );

    // Alice proposes a create at what she believes is nonce 3.
    let create = || {
        h.alice.create_transfer(
            channel_address,
            AssetId::NATIVE,
            Balance {
                to: [h.pair.alice.address(), h.pair.bob.address()],
                amount: [40, 0],
            },
            hashlock_definition(),
            3_600,
            keccak256(&[0xaa; 32]).0.to_vec(),
            None,
        )
    };

    let synced = create().await.unwrap();
    assert_eq!(synced.outcome, UpdateOutcome::Synced);
    assert_eq!(synced.applied.state.nonce(), 3);
    assert_eq!(
        canonical_channel_state_bytes(&synced.applied.state.core),
        canonical_channel_state_bytes(&bobs_applied.state.core),
    );
    assert_replicas_identical(&h).await;

    // The caller re-proposes against the synced state and lands nonce 4.
    let applied = create().await.unwrap();
    assert_eq!(applied.outcome, UpdateOutcome::Applied);
    assert_eq!(applied.applied.state.nonce(), 4);
    assert_eq!(applied.applied.active.len(), 1);
    assert_replicas_identical(&h).await;
}

#[tokio::test]
async fn resolve_clears_transfer_and_credits_payout() {
    let h = harness().await;
    let channel = h
        .alice
        .setup(h.pair.bob.address(), TEST_TIMEOUT, h.pair.network)
        .await
        .unwrap();
    let channel_address = channel.channel_address();

    h.chain.set_deposit(
        channel_address,
        AssetId::NATIVE,
        Participant::Alice,
        LatestDeposit {
            nonce: 1,
            amount: 100,
        },
    );
    h.alice
        .deposit(channel_address, AssetId::NATIVE)
        .await
        .unwrap();

    let preimage = [0xaa; 32];
    let created = h
        .alice
        .create_transfer(
            channel_address,
            AssetId::NATIVE,
            Balance {
                to: [h.pair.alice.address(), h.pair.bob.address()],
                amount: [40, 0],
            },
            hashlock_definition(),
            3_600,
            keccak256(&preimage).0.to_vec(),
            None,
        )
        .await
        .unwrap();
    let transfer_id = created.applied.transfer.as_ref().unwrap().transfer_id();

    // The responder claims with the correct pre-image.
    let resolved = h
        .bob
        .resolve_transfer(channel_address, transfer_id, preimage.to_vec())
        .await
        .unwrap();

    assert_eq!(resolved.outcome, UpdateOutcome::Applied);
    let state = &resolved.applied.state;
    assert_eq!(state.nonce(), 4);
    assert_eq!(state.core.merkle_root, Bytes32::ZERO);
    assert_eq!(state.core.balances[0].amount, [60, 40]);
    assert!(resolved.applied.active.is_empty());

    // The transfer record survives with its resolver attached.
    let stored = h
        .bob
        .store()
        .get_transfer(&transfer_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.transfer_resolver, Some(preimage.to_vec()));
    assert!(h
        .bob
        .store()
        .get_active_transfers(&channel_address)
        .await
        .unwrap()
        .is_empty());

    assert_replicas_identical(&h).await;
}

#[tokio::test]
async fn duplicate_delivery_is_idempotent() {
    let h = harness().await;
    let channel = h
        .alice
        .setup(h.pair.bob.address(), TEST_TIMEOUT, h.pair.network)
        .await
        .unwrap();

    h.chain.set_deposit(
        channel.channel_address(),
        AssetId::NATIVE,
        Participant::Alice,
        LatestDeposit {
            nonce: 1,
            amount: 100,
        },
    );
    let result = h
        .alice
        .deposit(channel.channel_address(), AssetId::NATIVE)
        .await
        .unwrap();

    let before = h
        .bob
        .store()
        .get_channel_state(&channel.channel_address())
        .await
        .unwrap()
        .unwrap();

    // The transport redelivers the already-committed update.
    let reply = h
        .bob
        .handle_protocol_message(result.update.clone(), None)
        .await;
    match reply {
        ProtocolReply::Accepted { update } => assert_eq!(update, result.update),
        other => panic!("expected Accepted, got {other:?}"),
    }

    let after = h
        .bob
        .store()
        .get_channel_state(&channel.channel_address())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        canonical_channel_state_bytes(&before.core),
        canonical_channel_state_bytes(&after.core),
        "idempotent redelivery must not change state"
    );
    assert_eq!(before.latest_update, after.latest_update);
}
