//! Broker → local session fan-out.
//!
//! One listener runs per process. It is the only path that pushes newly
//! sent messages to sessions: the process that persisted a message
//! receives it through the same broker round-trip as every other process,
//! so local and remote delivery share one code path.

use std::sync::Arc;

use broker::{topic, Broker, BrokerEvent};
use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::protocol::MessagePayload;
use crate::registry::SessionRegistry;

/// Routes persisted chat messages from the broker to local subscribers.
pub struct FanoutListener {
    registry: Arc<SessionRegistry>,
    broker: Arc<dyn Broker>,
}

impl FanoutListener {
    /// Create a listener over a registry and a broker.
    pub fn new(registry: Arc<SessionRegistry>, broker: Arc<dyn Broker>) -> Self {
        Self { registry, broker }
    }

    /// Run the listener until shutdown is signalled or the broker
    /// subscription ends.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        let mut subscription = self.broker.subscribe(topic::ALL_ROOMS_PATTERN).await?;
        info!(pattern = topic::ALL_ROOMS_PATTERN, "fan-out listener running");

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => {
                    info!("fan-out listener received shutdown signal");
                    break;
                }

                event = subscription.next() => {
                    match event {
                        Some(event) => {
                            if let Err(e) = self.handle_event(&event) {
                                warn!(error = %e, topic = %event.topic, "failed to handle fan-out event");
                                counter!("chat_fanout_handle_errors_total").increment(1);
                            }
                        }
                        None => {
                            warn!("broker subscription ended unexpectedly");
                            break;
                        }
                    }
                }
            }
        }

        info!("fan-out listener stopped");
        Ok(())
    }

    fn handle_event(&self, event: &BrokerEvent) -> Result<()> {
        let payload: MessagePayload = serde_json::from_slice(&event.payload)?;
        let room_id = topic::room_from_topic(&event.topic).unwrap_or(payload.chat_room_id);

        let delivered = self.registry.deliver(room_id, &payload);
        counter!("chat_messages_delivered_total").increment(delivered as u64);
        debug!(
            room_id,
            message_id = payload.message_id,
            delivered,
            "fanned message out to local subscribers"
        );
        Ok(())
    }
}
