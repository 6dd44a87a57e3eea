//! The active transfer set and its Merkle commitment.
//!
//! The set holds every installed-but-unresolved transfer, keyed by transfer
//! id. Its root binds the transfers' initial states into the channel
//! commitment: leaves are `hash_transfer_state` digests in ascending
//! transfer-id order, levels pair left-to-right with the last node
//! duplicated when a level is odd. The empty set commits to the zero root.

use std::collections::BTreeMap;

use crate::canonical::hash_transfer_state;
use crate::crypto::keccak256;
use crate::error::CoreError;
use crate::state::FullTransferState;
use crate::types::{Bytes32, TransferId};

/// The set of active transfers of one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferSet {
    transfers: BTreeMap<TransferId, FullTransferState>,
}

impl TransferSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from stored transfers.
    pub fn from_transfers(transfers: impl IntoIterator<Item = FullTransferState>) -> Self {
        Self {
            transfers: transfers
                .into_iter()
                .map(|t| (t.transfer_id(), t))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    pub fn contains(&self, id: &TransferId) -> bool {
        self.transfers.contains_key(id)
    }

    pub fn get(&self, id: &TransferId) -> Option<&FullTransferState> {
        self.transfers.get(id)
    }

    /// Iterate transfers in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &FullTransferState> {
        self.transfers.values()
    }

    /// Insert a transfer and return the new root. Duplicate ids are an
    /// error.
    pub fn insert(&mut self, transfer: FullTransferState) -> Result<Bytes32, CoreError> {
        let id = transfer.transfer_id();
        if self.transfers.contains_key(&id) {
            return Err(CoreError::DuplicateTransfer(id));
        }
        self.transfers.insert(id, transfer);
        Ok(self.root())
    }

    /// Remove a transfer and return it with the new root.
    pub fn remove(
        &mut self,
        id: &TransferId,
    ) -> Result<(FullTransferState, Bytes32), CoreError> {
        let transfer = self
            .transfers
            .remove(id)
            .ok_or(CoreError::TransferNotFound(*id))?;
        Ok((transfer, self.root()))
    }

    /// The Merkle root over the current set.
    pub fn root(&self) -> Bytes32 {
        let leaves = self.leaves();
        if leaves.is_empty() {
            return Bytes32::ZERO;
        }
        let mut level = leaves;
        while level.len() > 1 {
            level = next_level(&level);
        }
        level[0]
    }

    /// Inclusion proof for a transfer.
    pub fn proof(&self, id: &TransferId) -> Result<MerkleProof, CoreError> {
        let index = self
            .transfers
            .keys()
            .position(|k| k == id)
            .ok_or(CoreError::TransferNotFound(*id))?;

        let mut siblings = Vec::new();
        let mut level = self.leaves();
        let mut idx = index;
        while level.len() > 1 {
            let sibling_idx = idx ^ 1;
            // Odd levels duplicate their last node; the sibling of a
            // trailing node is itself.
            let sibling = *level.get(sibling_idx).unwrap_or(&level[idx]);
            siblings.push(sibling);
            level = next_level(&level);
            idx /= 2;
        }

        Ok(MerkleProof {
            leaf: hash_transfer_state(&self.transfers[id].core),
            index,
            siblings,
            root: self.root(),
        })
    }

    fn leaves(&self) -> Vec<Bytes32> {
        self.transfers
            .values()
            .map(|t| hash_transfer_state(&t.core))
            .collect()
    }
}

fn next_level(level: &[Bytes32]) -> Vec<Bytes32> {
    let mut padded = level.to_vec();
    if padded.len() % 2 == 1 {
        padded.push(*padded.last().expect("level is non-empty"));
    }
    padded
        .chunks(2)
        .map(|pair| hash_pair(&pair[0], &pair[1]))
        .collect()
}

fn hash_pair(left: &Bytes32, right: &Bytes32) -> Bytes32 {
    let mut data = [0u8; 64];
    data[..32].copy_from_slice(left.as_bytes());
    data[32..].copy_from_slice(right.as_bytes());
    keccak256(&data)
}

/// Inclusion proof: the sibling path from a leaf to the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    pub leaf: Bytes32,
    pub index: usize,
    pub siblings: Vec<Bytes32>,
    pub root: Bytes32,
}

impl MerkleProof {
    /// Recompute the root from the leaf and sibling path.
    pub fn verify(&self) -> bool {
        let mut hash = self.leaf;
        let mut idx = self.index;
        for sibling in &self.siblings {
            hash = if idx % 2 == 0 {
                hash_pair(&hash, sibling)
            } else {
                hash_pair(sibling, &hash)
            };
            idx /= 2;
        }
        hash == self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Balance, CoreTransferState};
    use crate::types::{Address, AssetId};

    fn transfer(seed: u8) -> FullTransferState {
        FullTransferState {
            core: CoreTransferState {
                transfer_id: TransferId::from_bytes([seed; 32]),
                channel_address: Address::from_bytes([0xcc; 20]),
                channel_nonce: seed as u64,
                transfer_definition: Address::from_bytes([0xde; 20]),
                initiator: Address::from_bytes([0x0a; 20]),
                responder: Address::from_bytes([0x0b; 20]),
                asset_id: AssetId::NATIVE,
                balance: Balance {
                    to: [Address::from_bytes([0x0a; 20]), Address::from_bytes([0x0b; 20])],
                    amount: [seed as u128, 0],
                },
                transfer_timeout: 3_600,
                initial_state_hash: Bytes32::from_bytes([seed; 32]),
            },
            transfer_state: vec![seed; 32],
            transfer_resolver: None,
            state_encoding: "hashlock-v0".into(),
            resolver_encoding: "preimage-v0".into(),
            chain_id: 1337,
            in_dispute: false,
        }
    }

    #[test]
    fn test_empty_root_is_zero() {
        assert_eq!(TransferSet::new().root(), Bytes32::ZERO);
    }

    #[test]
    fn test_root_changes_on_insert_and_remove() {
        let mut set = TransferSet::new();
        let r1 = set.insert(transfer(1)).unwrap();
        assert_ne!(r1, Bytes32::ZERO);

        let r2 = set.insert(transfer(2)).unwrap();
        assert_ne!(r1, r2);

        let (_, r3) = set.remove(&TransferId::from_bytes([2; 32])).unwrap();
        assert_eq!(r1, r3);

        let (_, r4) = set.remove(&TransferId::from_bytes([1; 32])).unwrap();
        assert_eq!(r4, Bytes32::ZERO);
    }

    #[test]
    fn test_root_independent_of_insertion_order() {
        let mut a = TransferSet::new();
        a.insert(transfer(1)).unwrap();
        a.insert(transfer(2)).unwrap();
        a.insert(transfer(3)).unwrap();

        let mut b = TransferSet::new();
        b.insert(transfer(3)).unwrap();
        b.insert(transfer(1)).unwrap();
        b.insert(transfer(2)).unwrap();

        assert_eq!(a.root(), b.root());
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let mut set = TransferSet::new();
        set.insert(transfer(1)).unwrap();
        let err = set.insert(transfer(1)).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateTransfer(_)));
    }

    #[test]
    fn test_remove_missing_rejected() {
        let mut set = TransferSet::new();
        let err = set.remove(&TransferId::from_bytes([9; 32])).unwrap_err();
        assert!(matches!(err, CoreError::TransferNotFound(_)));
    }

    #[test]
    fn test_proof_verifies_for_every_member() {
        for n in 1u8..=7 {
            let mut set = TransferSet::new();
            for seed in 1..=n {
                set.insert(transfer(seed)).unwrap();
            }
            for seed in 1..=n {
                let proof = set.proof(&TransferId::from_bytes([seed; 32])).unwrap();
                assert!(proof.verify(), "proof failed for {seed} of {n}");
                assert_eq!(proof.root, set.root());
            }
        }
    }

    #[test]
    fn test_proof_rejects_wrong_root() {
        let mut set = TransferSet::new();
        set.insert(transfer(1)).unwrap();
        set.insert(transfer(2)).unwrap();

        let mut proof = set.proof(&TransferId::from_bytes([1; 32])).unwrap();
        proof.root = Bytes32::from_bytes([0xff; 32]);
        assert!(!proof.verify());
    }
}
