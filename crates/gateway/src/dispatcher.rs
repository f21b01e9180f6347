//! The message write path: validate, persist, then fan out.
//!
//! Ordering invariant: a message is published to the broker only after the
//! store insert returned, and a failed insert publishes nothing. Publish
//! failures are logged and swallowed - the message is already durable and
//! visible via history, so a broker outage only costs live delivery.

use std::sync::Arc;

use broker::{topic, Broker};
use bytes::Bytes;
use chat_store::{ChatRoom, Database, StoreError};
use metrics::counter;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{GatewayError, Result};
use crate::protocol::MessagePayload;

/// Maximum message content length, in characters.
pub const MAX_CONTENT_CHARS: usize = 1000;

/// Page request for history fetches.
#[derive(Debug, Clone, Copy)]
pub struct HistoryPage {
    pub page: u32,
    pub limit: u32,
}

impl HistoryPage {
    const DEFAULT_LIMIT: u32 = 50;
    const MAX_LIMIT: u32 = 200;

    /// Build a page from optional query values, clamping the limit.
    pub fn from_query(page: Option<u32>, limit: Option<u32>) -> Self {
        let limit = limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT);
        Self {
            page: page.unwrap_or(0),
            limit,
        }
    }

    fn offset(&self) -> u32 {
        self.page.saturating_mul(self.limit)
    }
}

impl Default for HistoryPage {
    fn default() -> Self {
        Self::from_query(None, None)
    }
}

/// A room together with the caller's unread message count, as returned by
/// the room-list endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub room: ChatRoom,
    pub unread_count: i64,
}

/// Sole write path for chat content.
///
/// Every operation takes the caller identity from the authenticated
/// session or bearer credential - never from request payload fields.
pub struct MessageDispatcher {
    store: Arc<Database>,
    broker: Arc<dyn Broker>,
}

impl MessageDispatcher {
    /// Create a dispatcher over a store and a fan-out broker.
    pub fn new(store: Arc<Database>, broker: Arc<dyn Broker>) -> Self {
        Self { store, broker }
    }

    /// Open (or re-open) the chat room for a listing. At most one room
    /// exists per (buyer, seller, product) pairing; re-initiating a chat
    /// returns the existing room unchanged.
    pub fn open_room(&self, product_id: i64, buyer_id: i64, seller_id: i64) -> Result<ChatRoom> {
        if buyer_id == seller_id {
            return Err(GatewayError::InvalidRequest(
                "buyer and seller must be distinct users",
            ));
        }
        let room = self.store.find_or_create_room(product_id, buyer_id, seller_id)?;
        Ok(room)
    }

    /// Persist a message and fan it out to the room's subscribers.
    ///
    /// Returns the persisted payload; the HTTP send path responds with it,
    /// the WebSocket path relies on the broker round-trip instead.
    pub async fn send_message(
        &self,
        room_id: i64,
        sender_id: i64,
        content: &str,
    ) -> Result<MessagePayload> {
        let room = self.room(room_id)?;
        if !room.has_participant(sender_id) {
            return Err(GatewayError::NotParticipant {
                user_id: sender_id,
                room_id,
            });
        }
        validate_content(content)?;

        // Durability boundary: after this insert the message survives any
        // fan-out failure.
        let message = self.store.insert_message(room_id, sender_id, content)?;
        counter!("chat_messages_persisted_total").increment(1);
        debug!(room_id, message_id = message.id, "message persisted");

        let payload = MessagePayload::from(message);
        self.publish(&payload).await;
        Ok(payload)
    }

    /// One page of a room's messages, oldest first. Side effect: the
    /// counterparty's unread messages are marked read for `reader_id`
    /// before the page is fetched, so the response reflects the state
    /// after the flip.
    pub fn history(
        &self,
        room_id: i64,
        reader_id: i64,
        page: HistoryPage,
    ) -> Result<Vec<MessagePayload>> {
        let room = self.room(room_id)?;
        if !room.has_participant(reader_id) {
            return Err(GatewayError::NotParticipant {
                user_id: reader_id,
                room_id,
            });
        }

        let flipped = self.store.mark_room_read(room_id, reader_id)?;
        if flipped > 0 {
            debug!(room_id, reader_id, flipped, "marked counterparty messages read");
        }

        let messages = self.store.history(room_id, page.limit, page.offset())?;
        Ok(messages.into_iter().map(MessagePayload::from).collect())
    }

    /// Flip one message's read flag. Idempotent.
    pub fn mark_read(&self, message_id: i64, reader_id: i64) -> Result<()> {
        let message = match self.store.get_message(message_id) {
            Ok(m) => m,
            Err(StoreError::NotFound) => return Err(GatewayError::MessageNotFound(message_id)),
            Err(e) => return Err(e.into()),
        };

        let room = self.room(message.room_id)?;
        if !room.has_participant(reader_id) {
            return Err(GatewayError::NotParticipant {
                user_id: reader_id,
                room_id: message.room_id,
            });
        }

        self.store.mark_read(message_id)?;
        Ok(())
    }

    /// Mark every message in the room not sent by `reader_id` as read.
    /// Idempotent; returns the number of newly flipped messages.
    pub fn mark_all_read(&self, room_id: i64, reader_id: i64) -> Result<usize> {
        let room = self.room(room_id)?;
        if !room.has_participant(reader_id) {
            return Err(GatewayError::NotParticipant {
                user_id: reader_id,
                room_id,
            });
        }
        Ok(self.store.mark_room_read(room_id, reader_id)?)
    }

    /// Record the reservation link on a room once a trade is formalized.
    pub fn link_reservation(&self, room_id: i64, caller_id: i64, reservation_id: i64) -> Result<()> {
        let room = self.room(room_id)?;
        if !room.has_participant(caller_id) {
            return Err(GatewayError::NotParticipant {
                user_id: caller_id,
                room_id,
            });
        }
        match self.store.link_reservation(room_id, reservation_id) {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound) => Err(GatewayError::RoomNotFound(room_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// The caller's rooms with unread counts, most recent first.
    pub fn rooms_for_user(&self, user_id: i64) -> Result<Vec<RoomSummary>> {
        let rooms = self.store.rooms_for_user(user_id)?;
        let mut summaries = Vec::with_capacity(rooms.len());
        for room in rooms {
            let unread_count = self.store.unread_count(room.id, user_id)?;
            summaries.push(RoomSummary { room, unread_count });
        }
        Ok(summaries)
    }

    fn room(&self, room_id: i64) -> Result<ChatRoom> {
        match self.store.get_room(room_id) {
            Ok(room) => Ok(room),
            Err(StoreError::NotFound) => Err(GatewayError::RoomNotFound(room_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort broker publish of an already-persisted message.
    async fn publish(&self, payload: &MessagePayload) {
        let bytes = match serde_json::to_vec(payload) {
            Ok(b) => Bytes::from(b),
            Err(e) => {
                warn!(error = %e, message_id = payload.message_id, "failed to serialize fan-out payload");
                counter!("chat_fanout_failures_total").increment(1);
                return;
            }
        };

        let subject = topic::room_topic(payload.chat_room_id);
        match self.broker.publish(&subject, bytes).await {
            Ok(()) => {
                counter!("chat_fanout_published_total").increment(1);
            }
            Err(e) => {
                // The message is persisted; history fetch still sees it.
                warn!(
                    error = %e,
                    room_id = payload.chat_room_id,
                    message_id = payload.message_id,
                    "fan-out publish failed, live delivery skipped"
                );
                counter!("chat_fanout_failures_total").increment(1);
            }
        }
    }
}

fn validate_content(content: &str) -> Result<()> {
    if content.trim().is_empty() {
        return Err(GatewayError::InvalidContent("content must not be empty"));
    }
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(GatewayError::InvalidContent("content exceeds maximum length"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use broker::{BrokerError, MemoryBroker, Subscription};
    use std::time::Duration;
    use tokio::time::timeout;

    /// Broker stub whose publish always fails, simulating an outage.
    struct DownBroker;

    #[async_trait]
    impl Broker for DownBroker {
        async fn publish(&self, _topic: &str, _payload: Bytes) -> broker::Result<()> {
            Err(BrokerError::Closed)
        }

        async fn subscribe(&self, _pattern: &str) -> broker::Result<Subscription> {
            Err(BrokerError::Closed)
        }
    }

    fn dispatcher_with(broker_impl: Arc<dyn Broker>) -> (MessageDispatcher, Arc<Database>) {
        let store = Arc::new(Database::open_in_memory().unwrap());
        (MessageDispatcher::new(store.clone(), broker_impl), store)
    }

    #[tokio::test]
    async fn send_persists_and_fans_out() {
        let broker_impl = Arc::new(MemoryBroker::new());
        let mut sub = broker_impl.subscribe(topic::ALL_ROOMS_PATTERN).await.unwrap();
        let (dispatcher, _store) = dispatcher_with(broker_impl);

        let room = dispatcher.open_room(7, 1, 2).unwrap();
        let payload = dispatcher.send_message(room.id, 1, "안녕하세요").await.unwrap();

        assert_eq!(payload.chat_room_id, room.id);
        assert_eq!(payload.sender_id, 1);
        assert_eq!(payload.content, "안녕하세요");
        assert!(!payload.is_read);

        let event = timeout(Duration::from_secs(1), sub.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.topic, topic::room_topic(room.id));
        let published: MessagePayload = serde_json::from_slice(&event.payload).unwrap();
        assert_eq!(published, payload);
    }

    #[tokio::test]
    async fn send_succeeds_and_is_durable_with_broker_down() {
        let (dispatcher, _store) = dispatcher_with(Arc::new(DownBroker));

        let room = dispatcher.open_room(7, 1, 2).unwrap();
        let payload = dispatcher.send_message(room.id, 1, "still here").await.unwrap();

        // The send reported success and history sees the message.
        let history = dispatcher.history(room.id, 2, HistoryPage::default()).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].message_id, payload.message_id);
        assert_eq!(history[0].content, "still here");
    }

    #[tokio::test]
    async fn send_to_missing_room_persists_nothing() {
        let broker_impl = Arc::new(MemoryBroker::new());
        let mut sub = broker_impl.subscribe(topic::ALL_ROOMS_PATTERN).await.unwrap();
        let (dispatcher, _store) = dispatcher_with(broker_impl);

        let err = dispatcher.send_message(99, 1, "hello").await.unwrap_err();
        assert!(matches!(err, GatewayError::RoomNotFound(99)));

        // Nothing was published either.
        assert!(timeout(Duration::from_millis(50), sub.next()).await.is_err());
    }

    #[tokio::test]
    async fn content_validation_rejects_before_persisting() {
        let (dispatcher, store) = dispatcher_with(Arc::new(MemoryBroker::new()));
        let room = dispatcher.open_room(7, 1, 2).unwrap();

        let err = dispatcher.send_message(room.id, 1, "   ").await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidContent(_)));

        let long = "a".repeat(MAX_CONTENT_CHARS + 1);
        let err = dispatcher.send_message(room.id, 1, &long).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidContent(_)));

        assert!(store.history(room.id, 50, 0).unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_participant_cannot_send_or_read() {
        let (dispatcher, _store) = dispatcher_with(Arc::new(MemoryBroker::new()));
        let room = dispatcher.open_room(7, 1, 2).unwrap();

        let err = dispatcher.send_message(room.id, 3, "hi").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotParticipant { user_id: 3, .. }));

        let err = dispatcher.history(room.id, 3, HistoryPage::default()).unwrap_err();
        assert!(matches!(err, GatewayError::NotParticipant { user_id: 3, .. }));
    }

    #[tokio::test]
    async fn sequential_sends_keep_order_in_history() {
        let (dispatcher, _store) = dispatcher_with(Arc::new(MemoryBroker::new()));
        let room = dispatcher.open_room(7, 1, 2).unwrap();

        let mut sent_ids = Vec::new();
        for i in 0..8 {
            let payload = dispatcher
                .send_message(room.id, if i % 2 == 0 { 1 } else { 2 }, &format!("m{i}"))
                .await
                .unwrap();
            sent_ids.push(payload.message_id);
        }

        let history = dispatcher.history(room.id, 1, HistoryPage::default()).unwrap();
        let ids: Vec<i64> = history.iter().map(|m| m.message_id).collect();
        assert_eq!(ids, sent_ids);
        for pair in history.windows(2) {
            assert!(pair[0].sent_at <= pair[1].sent_at);
        }
    }

    #[tokio::test]
    async fn history_marks_counterparty_messages_read() {
        let (dispatcher, store) = dispatcher_with(Arc::new(MemoryBroker::new()));
        let room = dispatcher.open_room(7, 1, 2).unwrap();
        let sent = dispatcher.send_message(room.id, 1, "안녕하세요").await.unwrap();

        // The seller fetches history: the buyer's message flips to read.
        let history = dispatcher.history(room.id, 2, HistoryPage::default()).unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].is_read);
        assert!(store.get_message(sent.message_id).unwrap().is_read);

        // The sender's own fetch never flips their messages.
        let room2 = dispatcher.open_room(8, 3, 4).unwrap();
        let own = dispatcher.send_message(room2.id, 3, "mine").await.unwrap();
        dispatcher.history(room2.id, 3, HistoryPage::default()).unwrap();
        assert!(!store.get_message(own.message_id).unwrap().is_read);
    }

    #[tokio::test]
    async fn mark_all_read_is_idempotent() {
        let (dispatcher, _store) = dispatcher_with(Arc::new(MemoryBroker::new()));
        let room = dispatcher.open_room(7, 1, 2).unwrap();
        dispatcher.send_message(room.id, 1, "one").await.unwrap();
        dispatcher.send_message(room.id, 1, "two").await.unwrap();

        assert_eq!(dispatcher.mark_all_read(room.id, 2).unwrap(), 2);
        assert_eq!(dispatcher.mark_all_read(room.id, 2).unwrap(), 0);
    }

    #[tokio::test]
    async fn mark_read_single_message_checks_membership() {
        let (dispatcher, store) = dispatcher_with(Arc::new(MemoryBroker::new()));
        let room = dispatcher.open_room(7, 1, 2).unwrap();
        let sent = dispatcher.send_message(room.id, 1, "hi").await.unwrap();

        dispatcher.mark_read(sent.message_id, 2).unwrap();
        assert!(store.get_message(sent.message_id).unwrap().is_read);

        // Idempotent.
        dispatcher.mark_read(sent.message_id, 2).unwrap();

        assert!(matches!(
            dispatcher.mark_read(sent.message_id, 9),
            Err(GatewayError::NotParticipant { .. })
        ));
        assert!(matches!(
            dispatcher.mark_read(12345, 2),
            Err(GatewayError::MessageNotFound(12345))
        ));
    }

    #[tokio::test]
    async fn open_room_reuses_pairing_and_rejects_self_chat() {
        let (dispatcher, _store) = dispatcher_with(Arc::new(MemoryBroker::new()));

        let first = dispatcher.open_room(7, 1, 2).unwrap();
        let again = dispatcher.open_room(7, 1, 2).unwrap();
        assert_eq!(first.id, again.id);

        assert!(matches!(
            dispatcher.open_room(7, 1, 1),
            Err(GatewayError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn room_summaries_carry_unread_counts() {
        let (dispatcher, _store) = dispatcher_with(Arc::new(MemoryBroker::new()));
        let room = dispatcher.open_room(7, 1, 2).unwrap();
        dispatcher.send_message(room.id, 1, "one").await.unwrap();
        dispatcher.send_message(room.id, 1, "two").await.unwrap();

        let summaries = dispatcher.rooms_for_user(2).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].room.id, room.id);
        assert_eq!(summaries[0].unread_count, 2);
    }

    #[tokio::test]
    async fn reservation_link_requires_membership() {
        let (dispatcher, store) = dispatcher_with(Arc::new(MemoryBroker::new()));
        let room = dispatcher.open_room(7, 1, 2).unwrap();

        dispatcher.link_reservation(room.id, 2, 42).unwrap();
        assert_eq!(store.get_room(room.id).unwrap().reservation_id, Some(42));

        assert!(matches!(
            dispatcher.link_reservation(room.id, 9, 43),
            Err(GatewayError::NotParticipant { .. })
        ));
    }
}
