//! Persistent chat entities.
//!
//! Associations are carried as plain numeric ids (product, user,
//! reservation) rather than embedded references; callers resolve them
//! against their own stores.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A chat room pairing two users around one product listing.
///
/// Immutable after creation except for the optional reservation link.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoom {
    /// Room id, assigned by the store.
    pub id: i64,
    /// The listing this conversation is about.
    pub product_id: i64,
    /// The user who initiated the chat.
    pub buyer_id: i64,
    /// The listing owner.
    pub seller_id: i64,
    /// Set once a trade is formalized; `None` until then.
    pub reservation_id: Option<i64>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl ChatRoom {
    /// Whether `user_id` is one of the room's two participants.
    pub fn has_participant(&self, user_id: i64) -> bool {
        user_id == self.buyer_id || user_id == self.seller_id
    }

    /// The participant that is not `user_id`.
    pub fn counterparty(&self, user_id: i64) -> Option<i64> {
        if user_id == self.buyer_id {
            Some(self.seller_id)
        } else if user_id == self.seller_id {
            Some(self.buyer_id)
        } else {
            None
        }
    }
}

/// A single persisted chat message.
///
/// Content, room, and sender are immutable; only `is_read` ever flips,
/// and only from `false` to `true`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Message id, assigned by the store in persistence order.
    pub id: i64,
    /// Owning room.
    pub room_id: i64,
    /// The authenticated identity that sent the message.
    pub sender_id: i64,
    /// Message text.
    pub content: String,
    /// Persistence timestamp.
    pub sent_at: DateTime<Utc>,
    /// Read flag, initially `false`.
    pub is_read: bool,
}
