//! Channel updates: the unit of protocol progress.
//!
//! An update is proposed by one participant, countersigned by the other, and
//! commits a new channel state at exactly `prev.nonce + 1`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::canonical::hash_channel_commitment;
use crate::crypto::{keccak256, verify_signature, ChannelSigner, Signature};
use crate::error::CoreError;
use crate::state::{Balance, CoreChannelState, NetworkContext};
use crate::types::{Address, AssetId, Bytes32, Participant, TransferId};

/// The nonce committed by a setup update.
pub const SETUP_NONCE: u64 = 1;

/// The nonce the next update must commit.
pub fn next_nonce(current: u64) -> u64 {
    current + 1
}

/// The four kinds of channel update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum UpdateType {
    Setup = 1,
    Deposit = 2,
    Create = 3,
    Resolve = 4,
}

impl UpdateType {
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Setup),
            2 => Some(Self::Deposit),
            3 => Some(Self::Create),
            4 => Some(Self::Resolve),
            _ => None,
        }
    }
}

/// Idempotency id of an update: a uuid signed by the initiator.
///
/// The signature prevents the counterparty from forging an alternative
/// update under the same uuid; equality of `id` against the update committed
/// at a nonce slot means the operation already executed and must not run
/// twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateId {
    pub id: Uuid,
    pub signature: Signature,
}

impl UpdateId {
    /// The digest the initiator signs: keccak256 of the raw uuid bytes.
    pub fn digest(id: &Uuid) -> Bytes32 {
        keccak256(id.as_bytes())
    }

    /// Create a fresh signed id.
    pub fn sign(signer: &ChannelSigner) -> Self {
        let id = Uuid::new_v4();
        let signature = signer.sign(&Self::digest(&id));
        Self { id, signature }
    }

    /// Verify the id signature recovers to `initiator`.
    pub fn verify(&self, initiator: &Address) -> Result<(), CoreError> {
        verify_signature(&Self::digest(&self.id), &self.signature, initiator)
    }
}

/// Type-tagged update payload. All validator logic dispatches on the tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateDetails {
    Setup {
        /// Dispute window in seconds.
        timeout: u64,
        network_context: NetworkContext,
    },
    Deposit {
        /// Onchain-latest deposit total for the Alice side of this asset.
        total_deposits_alice: u128,
        /// Onchain-latest deposit total for the Bob side of this asset.
        total_deposits_bob: u128,
    },
    Create {
        transfer_id: TransferId,
        /// Value locked into the transfer; index 0 is the initiator side.
        balance: Balance,
        transfer_definition: Address,
        transfer_timeout: u64,
        /// Canonical bytes of the transfer's initial state.
        initial_state: Vec<u8>,
        meta: Option<String>,
    },
    Resolve {
        transfer_id: TransferId,
        /// Resolver payload interpreted by the transfer definition.
        transfer_resolver: Vec<u8>,
    },
}

impl UpdateDetails {
    pub fn update_type(&self) -> UpdateType {
        match self {
            UpdateDetails::Setup { .. } => UpdateType::Setup,
            UpdateDetails::Deposit { .. } => UpdateType::Deposit,
            UpdateDetails::Create { .. } => UpdateType::Create,
            UpdateDetails::Resolve { .. } => UpdateType::Resolve,
        }
    }
}

/// A numbered, signed state transition.
///
/// `balance` is the post-update channel balance for `asset_id`; the applier
/// recomputes it from `details` and the responder checks the two agree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelUpdate {
    pub id: UpdateId,
    pub channel_address: Address,
    pub from_identifier: Address,
    pub to_identifier: Address,
    /// The channel nonce after applying this update.
    pub nonce: u64,
    pub asset_id: AssetId,
    pub balance: Balance,
    pub details: UpdateDetails,
    pub alice_signature: Option<Signature>,
    pub bob_signature: Option<Signature>,
}

impl ChannelUpdate {
    pub fn update_type(&self) -> UpdateType {
        self.details.update_type()
    }

    /// The stored signature for a participant, if present.
    pub fn signature_for(&self, participant: Participant) -> Option<&Signature> {
        match participant {
            Participant::Alice => self.alice_signature.as_ref(),
            Participant::Bob => self.bob_signature.as_ref(),
        }
    }

    /// Attach a participant's signature.
    pub fn set_signature(&mut self, participant: Participant, signature: Signature) {
        match participant {
            Participant::Alice => self.alice_signature = Some(signature),
            Participant::Bob => self.bob_signature = Some(signature),
        }
    }

    /// Whether both participants have signed.
    pub fn is_double_signed(&self) -> bool {
        self.alice_signature.is_some() && self.bob_signature.is_some()
    }

    /// Sign the commitment of the post-update state as `participant`.
    pub fn sign_commitment(
        &mut self,
        signer: &ChannelSigner,
        participant: Participant,
        next_state: &CoreChannelState,
    ) {
        let digest = hash_channel_commitment(next_state);
        self.set_signature(participant, signer.sign(&digest));
    }

    /// Verify one participant's signature against the post-update commitment.
    pub fn verify_commitment_signature(
        &self,
        participant: Participant,
        next_state: &CoreChannelState,
    ) -> Result<(), CoreError> {
        let signature = self
            .signature_for(participant)
            .ok_or(CoreError::InvalidSignature)?;
        let digest = hash_channel_commitment(next_state);
        let expected = match participant {
            Participant::Alice => next_state.alice,
            Participant::Bob => next_state.bob,
        };
        verify_signature(&digest, signature, &expected)
    }

    /// Verify both signatures against the post-update commitment.
    pub fn verify_both_signatures(
        &self,
        next_state: &CoreChannelState,
    ) -> Result<(), CoreError> {
        self.verify_commitment_signature(Participant::Alice, next_state)?;
        self.verify_commitment_signature(Participant::Bob, next_state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_type_roundtrip() {
        for t in [
            UpdateType::Setup,
            UpdateType::Deposit,
            UpdateType::Create,
            UpdateType::Resolve,
        ] {
            assert_eq!(UpdateType::from_u8(t.to_u8()), Some(t));
        }
        assert_eq!(UpdateType::from_u8(0), None);
        assert_eq!(UpdateType::from_u8(5), None);
    }

    #[test]
    fn test_update_id_sign_verify() {
        let signer = ChannelSigner::from_seed(&[0x21; 32]).unwrap();
        let id = UpdateId::sign(&signer);
        id.verify(&signer.address()).unwrap();

        let other = ChannelSigner::from_seed(&[0x22; 32]).unwrap();
        assert!(id.verify(&other.address()).is_err());
    }

    #[test]
    fn test_update_id_forged_uuid_rejected() {
        let signer = ChannelSigner::from_seed(&[0x21; 32]).unwrap();
        let mut id = UpdateId::sign(&signer);
        id.id = Uuid::new_v4();
        assert!(id.verify(&signer.address()).is_err());
    }

    #[test]
    fn test_details_tag() {
        let details = UpdateDetails::Deposit {
            total_deposits_alice: 1,
            total_deposits_bob: 2,
        };
        assert_eq!(details.update_type(), UpdateType::Deposit);
    }

    #[test]
    fn test_next_nonce() {
        assert_eq!(next_nonce(SETUP_NONCE), 2);
        assert_eq!(next_nonce(41), 42);
    }
}
