//! Messaging abstraction for the update protocol.
//!
//! The transport delivers a proposed update (plus the previous committed
//! update, for one-step catch-up) to the counterparty's inbound procedure
//! and returns its reply verbatim. Implementations may use NATS, WebSockets
//! or any request/response transport.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use weir_core::{Address, ChannelUpdate};

use crate::error::ProtocolErrorKind;

/// The counterparty's reply to a protocol message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProtocolReply {
    /// The update was validated, applied and countersigned.
    Accepted { update: ChannelUpdate },
    /// The update was rejected; `latest_update` accompanies stale-update
    /// rejections so the sender can sync.
    Rejected {
        kind: ProtocolErrorKind,
        message: String,
        latest_update: Option<ChannelUpdate>,
    },
}

/// Transport-level errors. All of them map to `CounterpartyFailure` and are
/// retriable by the caller.
#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("timed out waiting for counterparty reply")]
    Timeout,

    #[error("peer unavailable: {0}")]
    PeerUnavailable(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Result type for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;

/// Full-duplex, request/response messaging to one counterparty.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Deliver `(update, previous_update)` to the counterparty's inbound
    /// procedure and return its reply (or its error) verbatim.
    async fn send_protocol_message(
        &self,
        to: Address,
        update: ChannelUpdate,
        previous_update: Option<ChannelUpdate>,
    ) -> Result<ProtocolReply>;
}

/// A simple in-memory bus for testing.
///
/// Requests carry a oneshot reply channel, so each delivery is correlated
/// with exactly one response.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::{mpsc, oneshot, RwLock};

    /// A protocol message in flight, with its reply channel.
    #[derive(Debug)]
    pub struct Delivery {
        pub from: Address,
        pub update: ChannelUpdate,
        pub previous_update: Option<ChannelUpdate>,
        pub reply: oneshot::Sender<ProtocolReply>,
    }

    /// Receiving half handed to a registered participant.
    pub type Inbox = mpsc::Receiver<Delivery>;

    /// Shared state for the in-memory network.
    pub struct MemoryNetwork {
        endpoints: RwLock<HashMap<Address, mpsc::Sender<Delivery>>>,
    }

    impl MemoryNetwork {
        /// Create a new memory network.
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                endpoints: RwLock::new(HashMap::new()),
            })
        }

        /// Register a participant, returning its bus and inbox.
        pub async fn register(
            self: &Arc<Self>,
            address: Address,
            timeout: Duration,
        ) -> (MemoryBus, Inbox) {
            let (tx, rx) = mpsc::channel(64);
            self.endpoints.write().await.insert(address, tx);
            (
                MemoryBus {
                    address,
                    network: Arc::clone(self),
                    timeout,
                },
                rx,
            )
        }
    }

    /// In-memory bus implementation.
    pub struct MemoryBus {
        address: Address,
        network: Arc<MemoryNetwork>,
        timeout: Duration,
    }

    #[async_trait]
    impl MessageBus for MemoryBus {
        async fn send_protocol_message(
            &self,
            to: Address,
            update: ChannelUpdate,
            previous_update: Option<ChannelUpdate>,
        ) -> Result<ProtocolReply> {
            let sender = {
                let endpoints = self.network.endpoints.read().await;
                endpoints
                    .get(&to)
                    .cloned()
                    .ok_or_else(|| MessagingError::PeerUnavailable(to.to_string()))?
            };

            let (reply_tx, reply_rx) = oneshot::channel();
            sender
                .send(Delivery {
                    from: self.address,
                    update,
                    previous_update,
                    reply: reply_tx,
                })
                .await
                .map_err(|_| MessagingError::PeerUnavailable(to.to_string()))?;

            match tokio::time::timeout(self.timeout, reply_rx).await {
                Ok(Ok(reply)) => Ok(reply),
                Ok(Err(_)) => Err(MessagingError::Transport(
                    "counterparty dropped the reply channel".into(),
                )),
                Err(_) => Err(MessagingError::Timeout),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryNetwork;
    use super::*;
    use std::time::Duration;
    use weir_testkit::fixtures::TestPair;

    #[tokio::test]
    async fn test_memory_bus_roundtrip() {
        let pair = TestPair::new();
        let network = MemoryNetwork::new();
        let (alice_bus, _alice_inbox) = network
            .register(pair.alice.address(), Duration::from_secs(1))
            .await;
        let (_bob_bus, mut bob_inbox) = network
            .register(pair.bob.address(), Duration::from_secs(1))
            .await;

        let update = pair.setup_update();
        let responder = tokio::spawn(async move {
            let delivery = bob_inbox.recv().await.unwrap();
            delivery
                .reply
                .send(ProtocolReply::Accepted {
                    update: delivery.update,
                })
                .unwrap();
        });

        let reply = alice_bus
            .send_protocol_message(pair.bob.address(), update.clone(), None)
            .await
            .unwrap();
        responder.await.unwrap();

        match reply {
            ProtocolReply::Accepted { update: echoed } => assert_eq!(echoed.id.id, update.id.id),
            other => panic!("expected Accepted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_memory_bus_timeout() {
        let pair = TestPair::new();
        let network = MemoryNetwork::new();
        let (alice_bus, _alice_inbox) = network
            .register(pair.alice.address(), Duration::from_millis(20))
            .await;
        // Bob is registered but never serves his inbox.
        let (_bob_bus, _bob_inbox) = network
            .register(pair.bob.address(), Duration::from_millis(20))
            .await;

        let err = alice_bus
            .send_protocol_message(pair.bob.address(), pair.setup_update(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::Timeout));
    }

    #[tokio::test]
    async fn test_memory_bus_unknown_peer() {
        let pair = TestPair::new();
        let network = MemoryNetwork::new();
        let (alice_bus, _inbox) = network
            .register(pair.alice.address(), Duration::from_millis(20))
            .await;

        let err = alice_bus
            .send_protocol_message(pair.bob.address(), pair.setup_update(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::PeerUnavailable(_)));
    }
}
