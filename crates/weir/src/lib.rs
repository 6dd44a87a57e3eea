//! # Weir
//!
//! Offchain state-machine core of a two-party payment channel network.
//!
//! Two counterparties maintain a shared, replicated channel state offchain
//! and settle onto a blockchain only on disputes or withdrawals. A channel
//! holds balances across multiple assets and hosts conditional transfers
//! whose payout depends on a resolver. Progress happens through signed,
//! numbered updates of four kinds: setup, deposit, create, resolve.
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//! use weir::ChannelNode;
//! use weir_core::{Address, AssetId, ChannelSigner, NetworkContext};
//! use weir_engine::chain::mock::MockChainReader;
//! use weir_engine::messaging::memory::MemoryNetwork;
//! use weir_engine::{EngineConfig, NoopValidation};
//! use weir_store::MemoryStore;
//!
//! # async fn example() -> Result<(), weir_engine::ProtocolError> {
//! let signer = ChannelSigner::generate();
//! let network = MemoryNetwork::new();
//! let (bus, _inbox) = network
//!     .register(signer.address(), Duration::from_secs(30))
//!     .await;
//!
//! let node = ChannelNode::new(
//!     signer,
//!     MemoryStore::new(),
//!     bus,
//!     MockChainReader::new(1337),
//!     NoopValidation,
//!     EngineConfig::default(),
//! );
//!
//! let channel = node
//!     .setup(
//!         Address::from_bytes([0x0b; 20]),
//!         86_400,
//!         NetworkContext {
//!             chain_id: 1337,
//!             channel_factory: Address::from_bytes([0xfa; 20]),
//!         },
//!     )
//!     .await?;
//! let _ = node.deposit(channel.channel_address(), AssetId::NATIVE).await?;
//! # Ok(())
//! # }
//! ```

mod node;

pub use node::ChannelNode;

pub use weir_core::{
    Address, AssetId, Balance, ChannelSigner, ChannelUpdate, FullChannelState, FullTransferState,
    NetworkContext, TransferId,
};
pub use weir_engine::{
    EngineConfig, NoopValidation, OutboundResult, ProtocolError, ProtocolReply, UpdateOutcome,
    UpdateParams,
};
pub use weir_store::{ChannelStore, MemoryStore, TransferChange};
