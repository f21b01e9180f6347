//! NATS-backed broker.
//!
//! Uses NATS core pub/sub: fire-and-forget publish, push subscriptions.
//! There is deliberately no persistence at this layer - the message store
//! is the source of truth and readers reconcile order from history, so a
//! broker outage only degrades live delivery.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::info;

use crate::error::Result;
use crate::{Broker, BrokerEvent, Subscription};

const SUBSCRIPTION_BUFFER: usize = 1024;

/// Wrapper around the NATS client.
#[derive(Clone)]
pub struct NatsBroker {
    client: async_nats::Client,
}

impl NatsBroker {
    /// Connect to a NATS server.
    pub async fn connect(url: &str) -> Result<Self> {
        info!("connecting to NATS at {}", url);
        let client = async_nats::connect(url).await?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Broker for NatsBroker {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        self.client.publish(topic.to_string(), payload).await?;
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<Subscription> {
        info!("subscribing to subject pattern: {}", pattern);
        let mut subscriber = self.client.subscribe(pattern.to_string()).await?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        tokio::spawn(async move {
            while let Some(msg) = subscriber.next().await {
                let event = BrokerEvent {
                    topic: msg.subject.to_string(),
                    payload: msg.payload,
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        Ok(Subscription::new(rx))
    }
}
