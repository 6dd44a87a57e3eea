//! Proptest generators for property-based testing.

use proptest::prelude::*;
use uuid::Uuid;

use weir_core::{
    Address, AssetId, Balance, Bytes32, ChannelUpdate, CoreChannelState, CoreTransferState,
    NetworkContext, Signature, TransferId, UpdateDetails, UpdateId,
};

/// Generate a random address.
pub fn address() -> impl Strategy<Value = Address> {
    any::<[u8; 20]>().prop_map(Address::from_bytes)
}

/// Generate a random 32-byte value.
pub fn bytes32() -> impl Strategy<Value = Bytes32> {
    any::<[u8; 32]>().prop_map(Bytes32::from_bytes)
}

/// Generate a random transfer id.
pub fn transfer_id() -> impl Strategy<Value = TransferId> {
    any::<[u8; 32]>().prop_map(TransferId::from_bytes)
}

/// Generate a random asset id.
pub fn asset_id() -> impl Strategy<Value = AssetId> {
    address().prop_map(AssetId::from_address)
}

/// Generate an amount across the full 128-bit range.
pub fn amount() -> impl Strategy<Value = u128> {
    any::<u128>()
}

/// Generate a random signature (structurally, not cryptographically,
/// valid).
pub fn signature() -> impl Strategy<Value = Signature> {
    (any::<[u8; 32]>(), any::<[u8; 32]>(), 0u8..=1).prop_map(|(r, s, v)| {
        let mut bytes = [0u8; 65];
        bytes[..32].copy_from_slice(&r);
        bytes[32..64].copy_from_slice(&s);
        bytes[64] = 27 + v;
        Signature(bytes)
    })
}

/// Generate a balance pair.
pub fn balance() -> impl Strategy<Value = Balance> {
    (address(), address(), amount(), amount())
        .prop_map(|(a, b, x, y)| Balance {
            to: [a, b],
            amount: [x, y],
        })
}

/// Generate a network context.
pub fn network_context() -> impl Strategy<Value = NetworkContext> {
    (any::<u64>(), address()).prop_map(|(chain_id, channel_factory)| NetworkContext {
        chain_id,
        channel_factory,
    })
}

/// Generate a structurally consistent channel state: the per-asset vectors
/// all share one length.
pub fn core_channel_state() -> impl Strategy<Value = CoreChannelState> {
    (
        address(),
        address(),
        address(),
        prop::collection::vec((asset_id(), balance(), amount(), amount(), any::<u64>()), 0..4),
        any::<u64>(),
        1u64..=u64::MAX,
        bytes32(),
    )
        .prop_map(
            |(channel_address, alice, bob, assets, timeout, nonce, merkle_root)| {
                let mut state = CoreChannelState {
                    channel_address,
                    alice,
                    bob,
                    asset_ids: Vec::new(),
                    balances: Vec::new(),
                    processed_deposits_alice: Vec::new(),
                    processed_deposits_bob: Vec::new(),
                    defund_nonces: Vec::new(),
                    timeout,
                    nonce,
                    merkle_root,
                };
                for (asset, bal, dep_a, dep_b, defund) in assets {
                    state.asset_ids.push(asset);
                    state.balances.push(bal);
                    state.processed_deposits_alice.push(dep_a);
                    state.processed_deposits_bob.push(dep_b);
                    state.defund_nonces.push(defund);
                }
                state
            },
        )
}

/// Generate a transfer state.
pub fn core_transfer_state() -> impl Strategy<Value = CoreTransferState> {
    (
        transfer_id(),
        address(),
        any::<u64>(),
        address(),
        (address(), address()),
        asset_id(),
        balance(),
        any::<u64>(),
        bytes32(),
    )
        .prop_map(
            |(
                transfer_id,
                channel_address,
                channel_nonce,
                transfer_definition,
                (initiator, responder),
                asset_id,
                balance,
                transfer_timeout,
                initial_state_hash,
            )| CoreTransferState {
                transfer_id,
                channel_address,
                channel_nonce,
                transfer_definition,
                initiator,
                responder,
                asset_id,
                balance,
                transfer_timeout,
                initial_state_hash,
            },
        )
}

/// Generate update details of any type.
pub fn update_details() -> impl Strategy<Value = UpdateDetails> {
    prop_oneof![
        (any::<u64>(), network_context()).prop_map(|(timeout, network_context)| {
            UpdateDetails::Setup {
                timeout,
                network_context,
            }
        }),
        (amount(), amount()).prop_map(|(a, b)| UpdateDetails::Deposit {
            total_deposits_alice: a,
            total_deposits_bob: b,
        }),
        (
            transfer_id(),
            balance(),
            address(),
            any::<u64>(),
            prop::collection::vec(any::<u8>(), 0..64),
            prop::option::of("[a-z0-9-]{0,24}"),
        )
            .prop_map(
                |(transfer_id, balance, transfer_definition, transfer_timeout, initial_state, meta)| {
                    UpdateDetails::Create {
                        transfer_id,
                        balance,
                        transfer_definition,
                        transfer_timeout,
                        initial_state,
                        meta,
                    }
                }
            ),
        (transfer_id(), prop::collection::vec(any::<u8>(), 0..64)).prop_map(
            |(transfer_id, transfer_resolver)| UpdateDetails::Resolve {
                transfer_id,
                transfer_resolver,
            }
        ),
    ]
}

/// Generate a structurally complete update. Signatures are random bytes;
/// use the fixtures for cryptographically valid updates.
pub fn channel_update() -> impl Strategy<Value = ChannelUpdate> {
    (
        (any::<[u8; 16]>(), signature()),
        address(),
        (address(), address()),
        1u64..=u64::MAX,
        asset_id(),
        balance(),
        update_details(),
        prop::option::of(signature()),
        prop::option::of(signature()),
    )
        .prop_map(
            |(
                (uuid_bytes, id_signature),
                channel_address,
                (from_identifier, to_identifier),
                nonce,
                asset_id,
                balance,
                details,
                alice_signature,
                bob_signature,
            )| ChannelUpdate {
                id: UpdateId {
                    id: Uuid::from_bytes(uuid_bytes),
                    signature: id_signature,
                },
                channel_address,
                from_identifier,
                to_identifier,
                nonce,
                asset_id,
                balance,
                details,
                alice_signature,
                bob_signature,
            },
        )
}
