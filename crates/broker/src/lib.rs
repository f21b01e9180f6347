//! Publish/subscribe fan-out between chat service processes.
//!
//! A persisted message is published to a per-room topic; every process
//! runs one subscriber over all room topics and pushes each received
//! payload to its locally connected sessions. The broker is injected as a
//! capability so deployments pick the implementation:
//!
//! - [`NatsBroker`] - NATS core pub/sub, for multi-instance deployments
//! - [`MemoryBroker`] - in-process fan-out, for tests and single-node runs
//!
//! Delivery through the broker is best-effort by design: the message is
//! already durable before anything is published.

pub mod error;
pub mod memory;
pub mod nats;
pub mod topic;

pub use error::{BrokerError, Result};
pub use memory::MemoryBroker;
pub use nats::NatsBroker;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

/// A single event received from the broker.
#[derive(Debug, Clone)]
pub struct BrokerEvent {
    /// The topic the event was published on.
    pub topic: String,
    /// Serialized message payload.
    pub payload: Bytes,
}

/// Stream of events for one subscription.
pub struct Subscription {
    rx: mpsc::Receiver<BrokerEvent>,
}

impl Subscription {
    pub(crate) fn new(rx: mpsc::Receiver<BrokerEvent>) -> Self {
        Self { rx }
    }

    /// Next event, or `None` once the subscription has ended.
    pub async fn next(&mut self) -> Option<BrokerEvent> {
        self.rx.recv().await
    }
}

/// Process-external publish/subscribe channel.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish a payload to a topic. Best-effort: callers on the send path
    /// log failures instead of propagating them to the original sender.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()>;

    /// Subscribe to every topic matching `pattern` (`*` matches one
    /// segment, `>` matches the trailing rest).
    async fn subscribe(&self, pattern: &str) -> Result<Subscription>;
}
