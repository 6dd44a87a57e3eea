//! Store trait: the abstract interface for channel persistence.
//!
//! The engine is storage-agnostic; a replica only requires that channel
//! state and the accompanying transfer change commit atomically, and that
//! writes for one channel address are serialized.

use async_trait::async_trait;

use weir_core::{Address, FullChannelState, FullTransferState, TransferId};

use crate::error::Result;

/// The transfer mutation accompanying a saved channel state.
#[derive(Debug, Clone)]
pub enum TransferChange {
    /// A create update installed this transfer.
    Created(FullTransferState),
    /// A resolve update closed this transfer; it carries the final state
    /// with the resolver attached.
    Resolved(FullTransferState),
}

/// Async interface for channel persistence.
///
/// # Design Notes
///
/// - **Atomicity**: `save_channel_state` commits the channel and any
///   inserted/removed transfer as one write; a reader never observes the
///   channel at nonce N with the transfer set of nonce N-1.
/// - **Serialized writes**: implementations provide serializable writes per
///   channel address.
/// - **Resolved history**: resolved transfers stay readable by id; only the
///   active set shrinks.
#[async_trait]
pub trait ChannelStore: Send + Sync {
    /// Load a channel replica, if one exists.
    async fn get_channel_state(&self, channel_address: &Address)
        -> Result<Option<FullChannelState>>;

    /// All installed-but-unresolved transfers of a channel.
    async fn get_active_transfers(
        &self,
        channel_address: &Address,
    ) -> Result<Vec<FullTransferState>>;

    /// Look up a transfer by id, active or resolved.
    async fn get_transfer(&self, transfer_id: &TransferId) -> Result<Option<FullTransferState>>;

    /// Commit a channel state together with its transfer change.
    async fn save_channel_state(
        &self,
        state: &FullChannelState,
        change: Option<&TransferChange>,
    ) -> Result<()>;
}
