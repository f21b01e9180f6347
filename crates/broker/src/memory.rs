//! In-process broker for tests and single-node deployments.
//!
//! Fans a published payload out to every matching subscription over
//! bounded channels. A subscriber that stops draining its channel loses
//! messages rather than blocking publishers, mirroring the best-effort
//! semantics of the external broker.

use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{BrokerError, Result};
use crate::topic;
use crate::{Broker, BrokerEvent, Subscription};

const DEFAULT_BUFFER: usize = 256;

/// In-memory publish/subscribe channel.
pub struct MemoryBroker {
    subscribers: Mutex<Vec<(String, mpsc::Sender<BrokerEvent>)>>,
    buffer: usize,
}

impl MemoryBroker {
    /// Create a broker with the default per-subscription buffer.
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_BUFFER)
    }

    /// Create a broker with an explicit per-subscription buffer size.
    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            buffer,
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|(_, tx)| !tx.is_closed());
        subscribers.len()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, topic_name: &str, payload: Bytes) -> Result<()> {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|(_, tx)| !tx.is_closed());

        for (pattern, tx) in subscribers.iter() {
            if topic::matches_subject(pattern, topic_name) {
                let event = BrokerEvent {
                    topic: topic_name.to_string(),
                    payload: payload.clone(),
                };
                if tx.try_send(event).is_err() {
                    tracing::debug!(topic = topic_name, "dropping event for lagging subscriber");
                }
            }
        }
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<Subscription> {
        if let Some(reason) = topic::validate_pattern(pattern) {
            return Err(BrokerError::InvalidPattern(reason));
        }

        let (tx, rx) = mpsc::channel(self.buffer);
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((pattern.to_string(), tx));
        Ok(Subscription::new(rx))
    }
}
