//! Test fixtures and helpers.
//!
//! Common setup code for unit and integration tests: a deterministic
//! two-party channel, and builders that drive the pure applier to fabricate
//! committed states at arbitrary nonces.

use weir_core::{
    apply_update, derive_channel_address, derive_transfer_id, keccak256, Address, AppliedUpdate,
    AssetId, Balance, ChannelSigner, ChannelUpdate, CoreTransferState, FullChannelState,
    FullTransferState, NetworkContext, Participant, TransferSet, UpdateDetails, UpdateId,
    RESOLVER_ENCODING, STATE_ENCODING,
};

/// The dispute window used by fixture channels, in seconds.
pub const TEST_TIMEOUT: u64 = 86_400;

/// The transfer definition address fixture transfers pretend to use.
pub fn hashlock_definition() -> Address {
    Address::from_bytes([0xde; 20])
}

/// An ordered pair of signers sharing one channel.
pub struct TestPair {
    pub alice: ChannelSigner,
    pub bob: ChannelSigner,
    pub network: NetworkContext,
}

impl TestPair {
    /// Deterministic signers; Alice from seed 0x41, Bob from seed 0x42.
    pub fn new() -> Self {
        Self::with_seeds([0x41; 32], [0x42; 32])
    }

    pub fn with_seeds(alice_seed: [u8; 32], bob_seed: [u8; 32]) -> Self {
        Self {
            alice: ChannelSigner::from_seed(&alice_seed).expect("valid seed"),
            bob: ChannelSigner::from_seed(&bob_seed).expect("valid seed"),
            network: NetworkContext {
                chain_id: 1337,
                channel_factory: Address::from_bytes([0xfa; 20]),
            },
        }
    }

    pub fn signer(&self, participant: Participant) -> &ChannelSigner {
        match participant {
            Participant::Alice => &self.alice,
            Participant::Bob => &self.bob,
        }
    }

    pub fn channel_address(&self) -> Address {
        derive_channel_address(&self.alice.address(), &self.bob.address(), &self.network)
    }

    /// An initiator-signed setup candidate from Alice.
    pub fn setup_update(&self) -> ChannelUpdate {
        let (update, _) = self.make_update(
            None,
            &TransferSet::new(),
            Participant::Alice,
            AssetId::NATIVE,
            UpdateDetails::Setup {
                timeout: TEST_TIMEOUT,
                network_context: self.network,
            },
            None,
        );
        update
    }

    /// Build, apply and initiator-sign an update against the given replica.
    ///
    /// `resolved` must carry the payout when `details` is a resolve.
    pub fn make_update(
        &self,
        channel: Option<&FullChannelState>,
        active: &TransferSet,
        initiator: Participant,
        asset_id: AssetId,
        details: UpdateDetails,
        resolved: Option<&Balance>,
    ) -> (ChannelUpdate, AppliedUpdate) {
        let signer = self.signer(initiator);
        let counterparty = self.signer(initiator.other());
        let nonce = channel.map(|c| c.nonce() + 1).unwrap_or(1);

        let mut update = ChannelUpdate {
            id: UpdateId::sign(signer),
            channel_address: self.channel_address(),
            from_identifier: signer.address(),
            to_identifier: counterparty.address(),
            nonce,
            asset_id,
            balance: Balance::empty([signer.address(), counterparty.address()]),
            details,
            alice_signature: None,
            bob_signature: None,
        };

        let mut applied =
            apply_update(channel, active, &update, resolved).expect("fixture update applies");
        if let Some(idx) = applied.state.core.asset_index(&asset_id) {
            update.balance = applied.state.core.balances[idx].clone();
        }
        update.sign_commitment(signer, initiator, &applied.state.core);
        applied.state.latest_update = Some(update.clone());
        (update, applied)
    }

    /// Like [`Self::make_update`] but double-signed, as a committed update
    /// would be.
    pub fn commit_update(
        &self,
        channel: Option<&FullChannelState>,
        active: &TransferSet,
        initiator: Participant,
        asset_id: AssetId,
        details: UpdateDetails,
        resolved: Option<&Balance>,
    ) -> (ChannelUpdate, AppliedUpdate) {
        let (mut update, mut applied) =
            self.make_update(channel, active, initiator, asset_id, details, resolved);
        update.sign_commitment(
            self.signer(initiator.other()),
            initiator.other(),
            &applied.state.core,
        );
        applied.state.latest_update = Some(update.clone());
        (update, applied)
    }

    /// A channel at nonce 1: committed setup.
    pub fn committed_setup(&self) -> AppliedUpdate {
        let (_, applied) = self.commit_update(
            None,
            &TransferSet::new(),
            Participant::Alice,
            AssetId::NATIVE,
            UpdateDetails::Setup {
                timeout: TEST_TIMEOUT,
                network_context: self.network,
            },
            None,
        );
        applied
    }

    /// A channel at nonce 2: committed setup plus an Alice deposit of
    /// `amount` of the native asset.
    pub fn committed_deposit(&self, amount: u128) -> AppliedUpdate {
        let setup = self.committed_setup();
        let (_, applied) = self.commit_update(
            Some(&setup.state),
            &setup.active,
            Participant::Alice,
            AssetId::NATIVE,
            UpdateDetails::Deposit {
                total_deposits_alice: amount,
                total_deposits_bob: 0,
            },
            None,
        );
        applied
    }

    /// The create details locking `amount` behind `keccak256(preimage)`,
    /// valid against `channel` at its next nonce.
    pub fn hashlock_create_details(
        &self,
        channel: &FullChannelState,
        initiator: Participant,
        amount: u128,
        preimage: &[u8; 32],
    ) -> UpdateDetails {
        let initial_state = keccak256(preimage).0.to_vec();
        let nonce = channel.nonce() + 1;
        UpdateDetails::Create {
            transfer_id: derive_transfer_id(
                &channel.channel_address(),
                nonce,
                &hashlock_definition(),
                &keccak256(&initial_state),
            ),
            balance: Balance {
                to: [
                    self.signer(initiator).address(),
                    self.signer(initiator.other()).address(),
                ],
                amount: [amount, 0],
            },
            transfer_definition: hashlock_definition(),
            transfer_timeout: 3_600,
            initial_state,
            meta: None,
        }
    }

    /// A standalone hashlock transfer, for exercising chain readers
    /// without a channel.
    pub fn hashlock_transfer(
        &self,
        channel_nonce: u64,
        amount: u128,
        preimage: &[u8; 32],
    ) -> FullTransferState {
        let initial_state = keccak256(preimage).0.to_vec();
        let initial_state_hash = keccak256(&initial_state);
        FullTransferState {
            core: CoreTransferState {
                transfer_id: derive_transfer_id(
                    &self.channel_address(),
                    channel_nonce,
                    &hashlock_definition(),
                    &initial_state_hash,
                ),
                channel_address: self.channel_address(),
                channel_nonce,
                transfer_definition: hashlock_definition(),
                initiator: self.alice.address(),
                responder: self.bob.address(),
                asset_id: AssetId::NATIVE,
                balance: Balance {
                    to: [self.alice.address(), self.bob.address()],
                    amount: [amount, 0],
                },
                transfer_timeout: 3_600,
                initial_state_hash,
            },
            transfer_state: initial_state,
            transfer_resolver: None,
            state_encoding: STATE_ENCODING.into(),
            resolver_encoding: RESOLVER_ENCODING.into(),
            chain_id: self.network.chain_id,
            in_dispute: false,
        }
    }
}

impl Default for TestPair {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weir_core::Bytes32;

    #[test]
    fn test_committed_setup_is_double_signed() {
        let pair = TestPair::new();
        let setup = pair.committed_setup();

        let latest = setup.state.latest_update.as_ref().unwrap();
        assert!(latest.is_double_signed());
        latest.verify_both_signatures(&setup.state.core).unwrap();
        assert_eq!(setup.state.core.merkle_root, Bytes32::ZERO);
    }

    #[test]
    fn test_committed_deposit_reaches_nonce_two() {
        let pair = TestPair::new();
        let deposited = pair.committed_deposit(100);
        assert_eq!(deposited.state.nonce(), 2);
        assert_eq!(deposited.state.core.balances[0].amount, [100, 0]);
    }

    #[test]
    fn test_hashlock_create_applies() {
        let pair = TestPair::new();
        let deposited = pair.committed_deposit(100);
        let details = pair.hashlock_create_details(
            &deposited.state,
            Participant::Alice,
            40,
            &[0xaa; 32],
        );
        let (_, applied) = pair.commit_update(
            Some(&deposited.state),
            &deposited.active,
            Participant::Alice,
            AssetId::NATIVE,
            details,
            None,
        );
        assert_eq!(applied.active.len(), 1);
        assert_eq!(applied.state.core.balances[0].amount, [60, 0]);
    }
}
