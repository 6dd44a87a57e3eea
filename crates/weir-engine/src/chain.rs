//! Chain reader abstraction.
//!
//! The engine never writes onchain; it only reads deposit totals during
//! deposit reconciliation and evaluates transfer-definition semantics
//! during resolve application. Queries are idempotent.

use async_trait::async_trait;
use thiserror::Error;

use weir_core::{Address, AssetId, Balance, FullTransferState, Participant};

/// The latest onchain deposit record for one participant and asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatestDeposit {
    /// Monotonic deposit counter.
    pub nonce: u64,
    /// Total amount deposited so far.
    pub amount: u128,
}

/// Errors from chain queries.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("chain {0} is not supported")]
    UnsupportedChain(u64),

    #[error("transfer definition {0} is not deployed")]
    UnknownTransferDefinition(Address),

    #[error("invalid resolver: {0}")]
    InvalidResolver(String),

    #[error("rpc error: {0}")]
    Rpc(String),
}

/// Result type for chain operations.
pub type Result<T> = std::result::Result<T, ChainError>;

/// Read-only view of the chain.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Deployed bytecode at an address; empty if none.
    async fn get_code(&self, address: Address, chain_id: u64) -> Result<Vec<u8>>;

    /// The latest deposit total of `participant` into `channel_address`
    /// for `asset_id`.
    async fn get_latest_deposit(
        &self,
        channel_address: Address,
        asset_id: AssetId,
        chain_id: u64,
        participant: Participant,
    ) -> Result<LatestDeposit>;

    /// Evaluate the transfer definition against `resolver`, producing the
    /// final payout. Index 0 of the result is the initiator side.
    async fn resolve_transfer(
        &self,
        transfer: &FullTransferState,
        resolver: &[u8],
        chain_id: u64,
    ) -> Result<Balance>;
}

// Replicas of both participants may share one chain view in tests and
// single-process deployments.
#[async_trait]
impl<T: ChainReader + ?Sized> ChainReader for std::sync::Arc<T> {
    async fn get_code(&self, address: Address, chain_id: u64) -> Result<Vec<u8>> {
        (**self).get_code(address, chain_id).await
    }

    async fn get_latest_deposit(
        &self,
        channel_address: Address,
        asset_id: AssetId,
        chain_id: u64,
        participant: Participant,
    ) -> Result<LatestDeposit> {
        (**self)
            .get_latest_deposit(channel_address, asset_id, chain_id, participant)
            .await
    }

    async fn resolve_transfer(
        &self,
        transfer: &FullTransferState,
        resolver: &[u8],
        chain_id: u64,
    ) -> Result<Balance> {
        (**self).resolve_transfer(transfer, resolver, chain_id).await
    }
}

/// A mock chain for tests, speaking the hashlock transfer definition.
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::RwLock;
    use weir_core::keccak256;

    /// In-memory chain state with hashlock resolve semantics.
    ///
    /// The transfer's initial state is the 32-byte lock hash. A 32-byte
    /// resolver is a pre-image claim: the full locked value moves to the
    /// responder iff `keccak256(pre-image)` equals the lock. An empty
    /// resolver cancels the transfer and refunds the initiator.
    pub struct MockChainReader {
        chain_id: u64,
        inner: RwLock<Inner>,
    }

    #[derive(Default)]
    struct Inner {
        code: HashMap<Address, Vec<u8>>,
        deposits: HashMap<(Address, AssetId, Participant), LatestDeposit>,
    }

    impl MockChainReader {
        pub fn new(chain_id: u64) -> Self {
            Self {
                chain_id,
                inner: RwLock::new(Inner::default()),
            }
        }

        /// Pretend `definition` is deployed.
        pub fn register_definition(&self, definition: Address) {
            self.inner
                .write()
                .expect("mock lock poisoned")
                .code
                .insert(definition, vec![0x60, 0x80]);
        }

        /// Record an onchain deposit observation.
        pub fn set_deposit(
            &self,
            channel_address: Address,
            asset_id: AssetId,
            participant: Participant,
            deposit: LatestDeposit,
        ) {
            self.inner
                .write()
                .expect("mock lock poisoned")
                .deposits
                .insert((channel_address, asset_id, participant), deposit);
        }

        fn check_chain(&self, chain_id: u64) -> Result<()> {
            if chain_id != self.chain_id {
                return Err(ChainError::UnsupportedChain(chain_id));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ChainReader for MockChainReader {
        async fn get_code(&self, address: Address, chain_id: u64) -> Result<Vec<u8>> {
            self.check_chain(chain_id)?;
            let inner = self.inner.read().expect("mock lock poisoned");
            Ok(inner.code.get(&address).cloned().unwrap_or_default())
        }

        async fn get_latest_deposit(
            &self,
            channel_address: Address,
            asset_id: AssetId,
            chain_id: u64,
            participant: Participant,
        ) -> Result<LatestDeposit> {
            self.check_chain(chain_id)?;
            let inner = self.inner.read().expect("mock lock poisoned");
            Ok(inner
                .deposits
                .get(&(channel_address, asset_id, participant))
                .copied()
                .unwrap_or(LatestDeposit { nonce: 0, amount: 0 }))
        }

        async fn resolve_transfer(
            &self,
            transfer: &FullTransferState,
            resolver: &[u8],
            chain_id: u64,
        ) -> Result<Balance> {
            self.check_chain(chain_id)?;
            {
                let inner = self.inner.read().expect("mock lock poisoned");
                if !inner
                    .code
                    .contains_key(&transfer.core.transfer_definition)
                {
                    return Err(ChainError::UnknownTransferDefinition(
                        transfer.core.transfer_definition,
                    ));
                }
            }

            let lock: [u8; 32] = transfer
                .transfer_state
                .as_slice()
                .try_into()
                .map_err(|_| ChainError::InvalidResolver("lock hash must be 32 bytes".into()))?;

            let total = transfer
                .core
                .balance
                .total()
                .ok_or_else(|| ChainError::Rpc("locked balance overflow".into()))?;
            let to = transfer.core.balance.to;

            if resolver.is_empty() {
                // Cancellation: refund the initiator.
                return Ok(Balance {
                    to,
                    amount: [total, 0],
                });
            }
            if resolver.len() != 32 {
                return Err(ChainError::InvalidResolver(
                    "pre-image must be 32 bytes".into(),
                ));
            }
            if keccak256(resolver).0 != lock {
                return Err(ChainError::InvalidResolver(
                    "pre-image does not match lock".into(),
                ));
            }
            Ok(Balance {
                to,
                amount: [0, total],
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockChainReader;
    use super::*;
    use weir_core::keccak256;
    use weir_testkit::fixtures::TestPair;

    #[tokio::test]
    async fn test_mock_deposit_defaults_to_zero() {
        let chain = MockChainReader::new(1337);
        let deposit = chain
            .get_latest_deposit(
                Address::from_bytes([0xcc; 20]),
                AssetId::NATIVE,
                1337,
                Participant::Alice,
            )
            .await
            .unwrap();
        assert_eq!(deposit, LatestDeposit { nonce: 0, amount: 0 });
    }

    #[tokio::test]
    async fn test_mock_rejects_wrong_chain() {
        let chain = MockChainReader::new(1337);
        let err = chain
            .get_code(Address::ZERO, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::UnsupportedChain(1)));
    }

    #[tokio::test]
    async fn test_hashlock_claim_pays_responder() {
        let pair = TestPair::new();
        let preimage = [0xaa; 32];
        let transfer = pair.hashlock_transfer(3, 40, &preimage);

        let chain = MockChainReader::new(pair.network.chain_id);
        chain.register_definition(transfer.core.transfer_definition);

        let payout = chain
            .resolve_transfer(&transfer, &preimage, pair.network.chain_id)
            .await
            .unwrap();
        assert_eq!(payout.amount, [0, 40]);
    }

    #[tokio::test]
    async fn test_hashlock_wrong_preimage_rejected() {
        let pair = TestPair::new();
        let transfer = pair.hashlock_transfer(3, 40, &[0xaa; 32]);

        let chain = MockChainReader::new(pair.network.chain_id);
        chain.register_definition(transfer.core.transfer_definition);

        let err = chain
            .resolve_transfer(&transfer, &[0xbb; 32], pair.network.chain_id)
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::InvalidResolver(_)));
    }

    #[tokio::test]
    async fn test_hashlock_empty_resolver_refunds_initiator() {
        let pair = TestPair::new();
        let transfer = pair.hashlock_transfer(3, 40, &[0xaa; 32]);

        let chain = MockChainReader::new(pair.network.chain_id);
        chain.register_definition(transfer.core.transfer_definition);

        let payout = chain
            .resolve_transfer(&transfer, &[], pair.network.chain_id)
            .await
            .unwrap();
        assert_eq!(payout.amount, [40, 0]);
    }

    #[tokio::test]
    async fn test_unregistered_definition_rejected() {
        let pair = TestPair::new();
        let transfer = pair.hashlock_transfer(3, 40, &[0xaa; 32]);

        let chain = MockChainReader::new(pair.network.chain_id);
        let err = chain
            .resolve_transfer(&transfer, &keccak256(&[0xaa; 32]).0, pair.network.chain_id)
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::UnknownTransferDefinition(_)));
    }
}
