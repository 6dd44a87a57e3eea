//! Channel and transfer state.
//!
//! `CoreChannelState` and `CoreTransferState` are the onchain-relevant
//! commitments; the `Full*` variants add the offchain bookkeeping a replica
//! needs (latest update, network context, dispute latch).

use serde::{Deserialize, Serialize};

use crate::crypto::keccak256;
use crate::types::{Address, AssetId, Bytes32, Participant, TransferId};
use crate::update::ChannelUpdate;

/// Encoding tag for transfer initial states carried in create updates.
pub const STATE_ENCODING: &str = "weir-canonical-v0";

/// Encoding tag for transfer resolvers carried in resolve updates.
pub const RESOLVER_ENCODING: &str = "weir-canonical-v0";

/// A pair of payout targets and amounts.
///
/// For channel balances index 0 is the Alice side; for transfer balances
/// index 0 is the initiator side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub to: [Address; 2],
    pub amount: [u128; 2],
}

impl Balance {
    /// An empty balance between the given recipients.
    pub fn empty(to: [Address; 2]) -> Self {
        Self { to, amount: [0, 0] }
    }

    /// Total value held across both sides, or `None` on overflow.
    pub fn total(&self) -> Option<u128> {
        self.amount[0].checked_add(self.amount[1])
    }
}

/// Chain-level context a channel is anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkContext {
    pub chain_id: u64,
    pub channel_factory: Address,
}

/// Derive the deterministic channel address for an ordered participant pair.
pub fn derive_channel_address(
    alice: &Address,
    bob: &Address,
    network: &NetworkContext,
) -> Address {
    let mut data = Vec::with_capacity(20 + 20 + 8 + 20 + 16);
    data.extend_from_slice(b"weir-channel-v0:");
    data.extend_from_slice(alice.as_bytes());
    data.extend_from_slice(bob.as_bytes());
    data.extend_from_slice(&network.chain_id.to_be_bytes());
    data.extend_from_slice(network.channel_factory.as_bytes());

    let digest = keccak256(&data);
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&digest.as_bytes()[12..]);
    Address(addr)
}

/// The onchain-relevant channel commitment.
///
/// `asset_ids`, `balances`, `processed_deposits_*` and `defund_nonces` are
/// parallel vectors indexed by asset position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreChannelState {
    pub channel_address: Address,
    pub alice: Address,
    pub bob: Address,
    pub asset_ids: Vec<AssetId>,
    pub balances: Vec<Balance>,
    pub processed_deposits_alice: Vec<u128>,
    pub processed_deposits_bob: Vec<u128>,
    pub defund_nonces: Vec<u64>,
    /// Dispute window in seconds.
    pub timeout: u64,
    /// Strictly monotonic update counter; setup commits nonce 1.
    pub nonce: u64,
    /// Root of the active transfer set.
    pub merkle_root: Bytes32,
}

impl CoreChannelState {
    /// Which participant the given address is, if any.
    pub fn participant(&self, address: &Address) -> Option<Participant> {
        if address == &self.alice {
            Some(Participant::Alice)
        } else if address == &self.bob {
            Some(Participant::Bob)
        } else {
            None
        }
    }

    /// The address of a participant.
    pub fn address_of(&self, participant: Participant) -> Address {
        match participant {
            Participant::Alice => self.alice,
            Participant::Bob => self.bob,
        }
    }

    /// Position of an asset in the parallel vectors, if tracked.
    pub fn asset_index(&self, asset_id: &AssetId) -> Option<usize> {
        self.asset_ids.iter().position(|a| a == asset_id)
    }
}

/// A replica's complete view of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullChannelState {
    pub core: CoreChannelState,
    /// The most recent update applied to this replica. Answers stale-update
    /// replies during sync.
    pub latest_update: Option<ChannelUpdate>,
    pub network_context: NetworkContext,
    /// Latched when the adjudicator observes a dispute; never cleared by the
    /// engine.
    pub in_dispute: bool,
}

impl FullChannelState {
    pub fn channel_address(&self) -> Address {
        self.core.channel_address
    }

    pub fn nonce(&self) -> u64 {
        self.core.nonce
    }
}

/// Derive the deterministic transfer id for a create update.
pub fn derive_transfer_id(
    channel_address: &Address,
    channel_nonce: u64,
    transfer_definition: &Address,
    initial_state_hash: &Bytes32,
) -> TransferId {
    let mut data = Vec::with_capacity(16 + 20 + 8 + 20 + 32);
    data.extend_from_slice(b"weir-transfer-v0:");
    data.extend_from_slice(channel_address.as_bytes());
    data.extend_from_slice(&channel_nonce.to_be_bytes());
    data.extend_from_slice(transfer_definition.as_bytes());
    data.extend_from_slice(initial_state_hash.as_bytes());
    TransferId(keccak256(&data).0)
}

/// The onchain-relevant commitment of one conditional transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreTransferState {
    pub transfer_id: TransferId,
    pub channel_address: Address,
    /// The channel nonce of the create update that installed this transfer.
    pub channel_nonce: u64,
    pub transfer_definition: Address,
    pub initiator: Address,
    pub responder: Address,
    pub asset_id: AssetId,
    /// Locked value; index 0 is the initiator side.
    pub balance: Balance,
    pub transfer_timeout: u64,
    pub initial_state_hash: Bytes32,
}

/// A transfer with its offchain state attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullTransferState {
    pub core: CoreTransferState,
    /// Canonical bytes of the transfer's initial state, interpreted by the
    /// transfer definition.
    pub transfer_state: Vec<u8>,
    /// The resolver that closed this transfer, once resolved.
    pub transfer_resolver: Option<Vec<u8>>,
    pub state_encoding: String,
    pub resolver_encoding: String,
    pub chain_id: u64,
    pub in_dispute: bool,
}

impl FullTransferState {
    pub fn transfer_id(&self) -> TransferId {
        self.core.transfer_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network() -> NetworkContext {
        NetworkContext {
            chain_id: 1337,
            channel_factory: Address::from_bytes([0xfa; 20]),
        }
    }

    #[test]
    fn test_channel_address_deterministic() {
        let alice = Address::from_bytes([0x0a; 20]);
        let bob = Address::from_bytes([0x0b; 20]);

        let a1 = derive_channel_address(&alice, &bob, &network());
        let a2 = derive_channel_address(&alice, &bob, &network());
        assert_eq!(a1, a2);
    }

    #[test]
    fn test_channel_address_depends_on_ordering() {
        let alice = Address::from_bytes([0x0a; 20]);
        let bob = Address::from_bytes([0x0b; 20]);

        let ab = derive_channel_address(&alice, &bob, &network());
        let ba = derive_channel_address(&bob, &alice, &network());
        assert_ne!(ab, ba);
    }

    #[test]
    fn test_channel_address_depends_on_chain() {
        let alice = Address::from_bytes([0x0a; 20]);
        let bob = Address::from_bytes([0x0b; 20]);
        let mut other = network();
        other.chain_id = 1;

        assert_ne!(
            derive_channel_address(&alice, &bob, &network()),
            derive_channel_address(&alice, &bob, &other),
        );
    }

    #[test]
    fn test_transfer_id_deterministic() {
        let channel = Address::from_bytes([0xcc; 20]);
        let def = Address::from_bytes([0xdd; 20]);
        let hash = Bytes32::from_bytes([0x11; 32]);

        assert_eq!(
            derive_transfer_id(&channel, 4, &def, &hash),
            derive_transfer_id(&channel, 4, &def, &hash),
        );
        assert_ne!(
            derive_transfer_id(&channel, 4, &def, &hash),
            derive_transfer_id(&channel, 5, &def, &hash),
        );
    }

    #[test]
    fn test_balance_total_overflow() {
        let b = Balance {
            to: [Address::ZERO, Address::ZERO],
            amount: [u128::MAX, 1],
        };
        assert!(b.total().is_none());
    }
}
