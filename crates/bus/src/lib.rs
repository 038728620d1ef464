//! # Umbra Bus
//!
//! Intra-process messaging that breaks the cyclic wiring between the
//! mempool, the acceptor and the peer plane: components reference the bus,
//! never each other.
//!
//! - [`EventBus`] - topic pub-sub. Publishing is fire-and-forget; slow
//!   subscribers lag and observe a [`Lagged`](tokio::sync::broadcast::error::RecvError::Lagged)
//!   gap rather than blocking the publisher.
//! - [`RpcBus`] - request/response. Exactly one handler may register per
//!   topic; callers get a typed reply or a timeout.

#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{trace, warn};

use umbra_wire::{Payload, RpcCall, RpcReply, Topic};

/// Result type alias for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors produced by the bus layer.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// No handler registered for a topic
    #[error("no handler registered for topic {0}")]
    NotRegistered(Topic),

    /// A handler is already registered for a topic
    #[error("handler already registered for topic {0}")]
    AlreadyRegistered(Topic),

    /// The handler did not reply within the deadline
    #[error("rpc call on topic {0} timed out")]
    Timeout(Topic),

    /// The handler dropped its channel
    #[error("rpc channel for topic {0} closed")]
    ChannelClosed(Topic),

    /// The handler replied with an error
    #[error("{0}")]
    Handler(String),
}

/// Default broadcast capacity per topic.
const DEFAULT_CAPACITY: usize = 1024;

/// Topic pub-sub over tokio broadcast channels.
///
/// A topic's channel is created lazily on first subscribe or publish.
pub struct EventBus {
    channels: RwLock<HashMap<Topic, broadcast::Sender<Payload>>>,
    capacity: usize,
}

impl EventBus {
    /// A bus with the default per-topic capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// A bus with a custom per-topic capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    fn sender(&self, topic: Topic) -> broadcast::Sender<Payload> {
        if let Some(sender) = self.channels.read().get(&topic) {
            return sender.clone();
        }
        let mut channels = self.channels.write();
        channels
            .entry(topic)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Subscribe to a topic.
    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<Payload> {
        self.sender(topic).subscribe()
    }

    /// Publish a payload on a topic. Returns the number of receivers it
    /// reached; zero receivers is not an error.
    pub fn publish(&self, topic: Topic, payload: Payload) -> usize {
        match self.sender(topic).send(payload) {
            Ok(n) => {
                trace!(topic = %topic, receivers = n, "published");
                n
            }
            Err(_) => {
                // All receivers dropped; the next subscriber recreates them.
                trace!(topic = %topic, "published with no receivers");
                0
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// An in-flight RPC request handed to the registered handler.
pub struct RpcRequest {
    /// The call payload
    pub call: RpcCall,
    /// Where the handler sends its reply
    pub response: oneshot::Sender<std::result::Result<RpcReply, String>>,
}

impl RpcRequest {
    /// Reply successfully.
    pub fn respond(self, reply: RpcReply) {
        if self.response.send(Ok(reply)).is_err() {
            warn!("rpc caller went away before the reply");
        }
    }

    /// Reply with a handler error.
    pub fn fail(self, error: impl Into<String>) {
        let _ = self.response.send(Err(error.into()));
    }
}

/// Request/response over registered per-topic channels.
pub struct RpcBus {
    registry: Mutex<HashMap<Topic, mpsc::Sender<RpcRequest>>>,
}

/// Capacity of each handler's request queue.
const RPC_QUEUE: usize = 64;

impl RpcBus {
    /// An empty bus.
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(HashMap::new()),
        }
    }

    /// Register as the handler for a topic.
    ///
    /// Fails if a handler already holds the topic.
    pub fn register(&self, topic: Topic) -> Result<mpsc::Receiver<RpcRequest>> {
        let mut registry = self.registry.lock();
        if registry.contains_key(&topic) {
            return Err(BusError::AlreadyRegistered(topic));
        }
        let (tx, rx) = mpsc::channel(RPC_QUEUE);
        registry.insert(topic, tx);
        Ok(rx)
    }

    /// Issue a call and wait for the reply or the deadline.
    pub async fn call(&self, call: RpcCall, timeout: Duration) -> Result<RpcReply> {
        let topic = call.topic();
        let sender = self
            .registry
            .lock()
            .get(&topic)
            .cloned()
            .ok_or(BusError::NotRegistered(topic))?;

        let (tx, rx) = oneshot::channel();
        sender
            .send(RpcRequest { call, response: tx })
            .await
            .map_err(|_| BusError::ChannelClosed(topic))?;

        match tokio::time::timeout(timeout, rx).await {
            Err(_) => Err(BusError::Timeout(topic)),
            Ok(Err(_)) => Err(BusError::ChannelClosed(topic)),
            Ok(Ok(Err(e))) => Err(BusError::Handler(e)),
            Ok(Ok(Ok(reply))) => Ok(reply),
        }
    }
}

impl Default for RpcBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_types::Hash;

    #[tokio::test]
    async fn publish_reaches_all_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe(Topic::AcceptedBlock);
        let mut rx2 = bus.subscribe(Topic::AcceptedBlock);

        let reached = bus.publish(Topic::AcceptedBlock, Payload::Ping);
        assert_eq!(reached, 2);
        assert_eq!(rx1.recv().await.unwrap(), Payload::Ping);
        assert_eq!(rx2.recv().await.unwrap(), Payload::Ping);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(Topic::Log, Payload::Ping), 0);
    }

    #[tokio::test]
    async fn rpc_round_trip() {
        let bus = RpcBus::new();
        let mut rx = bus.register(Topic::GetMempoolTxs).unwrap();

        tokio::spawn(async move {
            let request = rx.recv().await.unwrap();
            request.respond(RpcReply::Txs(Vec::new()));
        });

        let reply = bus
            .call(
                RpcCall::GetMempoolTxs { filter: None },
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert!(matches!(reply, RpcReply::Txs(txs) if txs.is_empty()));
    }

    #[tokio::test]
    async fn duplicate_registration_rejected() {
        let bus = RpcBus::new();
        let _rx = bus.register(Topic::SendMempoolTx).unwrap();
        assert!(matches!(
            bus.register(Topic::SendMempoolTx),
            Err(BusError::AlreadyRegistered(_))
        ));
    }

    #[tokio::test]
    async fn unregistered_topic_fails_fast() {
        let bus = RpcBus::new();
        let err = bus
            .call(
                RpcCall::GetCandidate(Hash::NIL),
                Duration::from_millis(10),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::NotRegistered(_)));
    }

    #[tokio::test]
    async fn handler_error_propagates() {
        let bus = RpcBus::new();
        let mut rx = bus.register(Topic::SendMempoolTx).unwrap();
        tokio::spawn(async move {
            let request = rx.recv().await.unwrap();
            request.fail("already exists");
        });

        let err = bus
            .call(
                RpcCall::GetMempoolTxs { filter: None },
                Duration::from_secs(1),
            )
            .await;
        // Wrong topic: the call above goes to GetMempoolTxs which is not
        // registered.
        assert!(matches!(err, Err(BusError::NotRegistered(_))));

        let err = bus
            .call(
                RpcCall::SendMempoolTx(umbra_types::ContractCall::Transfer(
                    umbra_types::transaction::Transfer {
                        fee: 1,
                        nullifiers: vec![],
                        outputs: vec![],
                        proof: vec![],
                    },
                )),
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Handler(_)));
    }
}
