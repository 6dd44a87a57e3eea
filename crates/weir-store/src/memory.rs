//! In-memory implementation of the store trait.
//!
//! This is primarily for tests and single-process deployments. It has the
//! same atomicity semantics as a durable backend but keeps everything in
//! memory behind one RwLock, which also serializes writes per channel.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;

use weir_core::{Address, FullChannelState, FullTransferState, TransferId};

use crate::error::{Result, StoreError};
use crate::traits::{ChannelStore, TransferChange};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Channel replicas by address.
    channels: HashMap<Address, FullChannelState>,

    /// Every transfer ever seen, active or resolved.
    transfers: HashMap<TransferId, FullTransferState>,

    /// Active transfer ids per channel, in id order.
    active: HashMap<Address, BTreeSet<TransferId>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelStore for MemoryStore {
    async fn get_channel_state(
        &self,
        channel_address: &Address,
    ) -> Result<Option<FullChannelState>> {
        let inner = self.inner.read().expect("store lock poisoned");
        Ok(inner.channels.get(channel_address).cloned())
    }

    async fn get_active_transfers(
        &self,
        channel_address: &Address,
    ) -> Result<Vec<FullTransferState>> {
        let inner = self.inner.read().expect("store lock poisoned");
        let ids = match inner.active.get(channel_address) {
            Some(ids) => ids,
            None => return Ok(Vec::new()),
        };
        Ok(ids
            .iter()
            .filter_map(|id| inner.transfers.get(id).cloned())
            .collect())
    }

    async fn get_transfer(&self, transfer_id: &TransferId) -> Result<Option<FullTransferState>> {
        let inner = self.inner.read().expect("store lock poisoned");
        Ok(inner.transfers.get(transfer_id).cloned())
    }

    async fn save_channel_state(
        &self,
        state: &FullChannelState,
        change: Option<&TransferChange>,
    ) -> Result<()> {
        let mut inner = self.inner.write().expect("store lock poisoned");
        let channel_address = state.channel_address();

        match change {
            Some(TransferChange::Created(transfer)) => {
                let id = transfer.transfer_id();
                let active = inner.active.entry(channel_address).or_default();
                if !active.insert(id) {
                    return Err(StoreError::TransferAlreadyActive(id));
                }
                inner.transfers.insert(id, transfer.clone());
            }
            Some(TransferChange::Resolved(transfer)) => {
                let id = transfer.transfer_id();
                let active = inner.active.entry(channel_address).or_default();
                if !active.remove(&id) {
                    return Err(StoreError::TransferNotActive(id));
                }
                inner.transfers.insert(id, transfer.clone());
            }
            None => {}
        }

        inner.channels.insert(channel_address, state.clone());
        Ok(())
    }
}
