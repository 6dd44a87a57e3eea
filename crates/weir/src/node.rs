//! The channel node: a replica tying signer, store, messaging and chain
//! reader together.
//!
//! A node serializes work per channel: at most one update at a time may be
//! in flight from this side of a channel. Every operation loads the replica
//! under the channel lock, runs the engine, and persists only on success,
//! so cancellation at any await leaves the replica at its last committed
//! nonce.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use weir_core::{
    Address, AppliedUpdate, AssetId, Balance, ChannelSigner, ChannelUpdate, FullChannelState,
    NetworkContext, TransferId, TransferSet, UpdateType,
};
use weir_engine::messaging::memory::Inbox;
use weir_engine::{
    inbound, outbound, ChainReader, EngineConfig, ExternalValidation, InboundOutcome, MessageBus,
    NoopValidation, OutboundResult, ProtocolError, ProtocolReply, UpdateParams,
};
use weir_store::{ChannelStore, TransferChange};

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// One replica of the channel network.
pub struct ChannelNode<S, M, C, V = NoopValidation> {
    signer: ChannelSigner,
    store: Arc<S>,
    bus: M,
    chain: C,
    external: V,
    config: EngineConfig,
    locks: Mutex<HashMap<Address, Arc<Mutex<()>>>>,
}

impl<S, M, C, V> ChannelNode<S, M, C, V>
where
    S: ChannelStore,
    M: MessageBus,
    C: ChainReader,
    V: ExternalValidation,
{
    pub fn new(
        signer: ChannelSigner,
        store: S,
        bus: M,
        chain: C,
        external: V,
        config: EngineConfig,
    ) -> Self {
        Self {
            signer,
            store: Arc::new(store),
            bus,
            chain,
            external,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// This replica's participant address.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// The storage backend.
    pub fn store(&self) -> &S {
        &self.store
    }

    // ─────────────────────────────────────────────────────────────────────
    // Outbound operations
    // ─────────────────────────────────────────────────────────────────────

    /// Set up a channel with `counterparty`. This replica becomes Alice.
    pub async fn setup(
        &self,
        counterparty: Address,
        timeout: u64,
        network_context: NetworkContext,
    ) -> Result<FullChannelState> {
        let result = self
            .propose(UpdateParams::Setup {
                counterparty,
                timeout,
                network_context,
            })
            .await?;
        Ok(result.applied.state)
    }

    /// Reconcile onchain deposits of `asset_id` into the channel balance.
    pub async fn deposit(
        &self,
        channel_address: Address,
        asset_id: AssetId,
    ) -> Result<OutboundResult> {
        self.propose(UpdateParams::Deposit {
            channel_address,
            asset_id,
        })
        .await
    }

    /// Install a conditional transfer.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_transfer(
        &self,
        channel_address: Address,
        asset_id: AssetId,
        balance: Balance,
        transfer_definition: Address,
        transfer_timeout: u64,
        initial_state: Vec<u8>,
        meta: Option<String>,
    ) -> Result<OutboundResult> {
        self.propose(UpdateParams::Create {
            channel_address,
            asset_id,
            balance,
            transfer_definition,
            transfer_timeout,
            initial_state,
            meta,
        })
        .await
    }

    /// Close a conditional transfer with its resolver.
    pub async fn resolve_transfer(
        &self,
        channel_address: Address,
        transfer_id: TransferId,
        transfer_resolver: Vec<u8>,
    ) -> Result<OutboundResult> {
        self.propose(UpdateParams::Resolve {
            channel_address,
            transfer_id,
            transfer_resolver,
        })
        .await
    }

    /// Run one outbound update under the channel lock and persist the
    /// outcome.
    ///
    /// A `Synced` outcome persists the counterparty's update and returns
    /// without retransmitting; re-invoke with the same params to re-propose
    /// against the new state.
    pub async fn propose(&self, params: UpdateParams) -> Result<OutboundResult> {
        let channel_address = params.channel_address(&self.signer.address());
        let lock = self.channel_lock(channel_address).await;
        let _guard = lock.lock().await;

        let channel = self.store.get_channel_state(&channel_address).await?;
        let active = TransferSet::from_transfers(
            self.store.get_active_transfers(&channel_address).await?,
        );

        let result = outbound(
            &self.signer,
            &params,
            channel.as_ref(),
            &active,
            &self.bus,
            &self.chain,
            &self.external,
            &self.config,
        )
        .await?;

        let change = transfer_change(&result.update, &result.applied);
        self.store
            .save_channel_state(&result.applied.state, change.as_ref())
            .await?;
        Ok(result)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Inbound operations
    // ─────────────────────────────────────────────────────────────────────

    /// Handle a protocol message from the counterparty.
    ///
    /// Never fails: every error becomes a rejection reply for the wire.
    pub async fn handle_protocol_message(
        &self,
        update: ChannelUpdate,
        previous_update: Option<ChannelUpdate>,
    ) -> ProtocolReply {
        let channel_address = update.channel_address;
        let lock = self.channel_lock(channel_address).await;
        let _guard = lock.lock().await;

        let loaded = async {
            let channel = self.store.get_channel_state(&channel_address).await?;
            let active = TransferSet::from_transfers(
                self.store.get_active_transfers(&channel_address).await?,
            );
            Ok::<_, ProtocolError>((channel, active))
        }
        .await;
        let (channel, active) = match loaded {
            Ok(loaded) => loaded,
            Err(e) => return rejection_reply(e),
        };

        let outcome = match inbound(
            &self.signer,
            update,
            previous_update,
            channel.as_ref(),
            &active,
            &self.chain,
            &self.external,
            &self.config,
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(e) => return rejection_reply(e),
        };

        if let InboundOutcome::Applied { steps } = &outcome {
            for step in steps {
                let change = transfer_change(&step.update, &step.applied);
                if let Err(e) = self
                    .store
                    .save_channel_state(&step.applied.state, change.as_ref())
                    .await
                {
                    tracing::warn!(
                        channel = %channel_address,
                        nonce = step.update.nonce,
                        error = %e,
                        "failed to persist inbound step"
                    );
                    return rejection_reply(ProtocolError::StoreFailure(e));
                }
            }
        }

        ProtocolReply::Accepted {
            update: outcome.reply().clone(),
        }
    }

    /// Serve protocol messages from an in-memory inbox until it closes.
    pub async fn serve(self: Arc<Self>, mut inbox: Inbox) {
        while let Some(delivery) = inbox.recv().await {
            let reply = self
                .handle_protocol_message(delivery.update, delivery.previous_update)
                .await;
            // A dropped reply channel means the sender timed out; it will
            // observe CounterpartyFailure and may retry.
            let _ = delivery.reply.send(reply);
        }
    }

    async fn channel_lock(&self, channel_address: Address) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(channel_address)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// The store-level transfer mutation implied by a committed update.
fn transfer_change(update: &ChannelUpdate, applied: &AppliedUpdate) -> Option<TransferChange> {
    match update.update_type() {
        UpdateType::Create => applied.transfer.clone().map(TransferChange::Created),
        UpdateType::Resolve => applied.transfer.clone().map(TransferChange::Resolved),
        UpdateType::Setup | UpdateType::Deposit => None,
    }
}

/// Convert an inbound failure into its wire reply.
fn rejection_reply(error: ProtocolError) -> ProtocolReply {
    let message = error.to_string();
    let kind = error.kind();
    let latest_update = match error {
        ProtocolError::StaleUpdate { latest_update } => latest_update.map(|b| *b),
        _ => None,
    };
    ProtocolReply::Rejected {
        kind,
        message,
        latest_update,
    }
}
