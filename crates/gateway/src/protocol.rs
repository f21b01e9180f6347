//! WebSocket protocol message types.
//!
//! Defines the JSON frame format for client-server communication, plus the
//! per-message push payload shared by the live feed and the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Client → Server Frames
// ============================================================================

/// Frame sent from client to server.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Bind an identity to the connection. Required as the first frame when
    /// the upgrade request carried no `Authorization` header.
    Auth {
        /// Bearer token, without the `Bearer ` prefix.
        token: String,
    },
    /// Subscribe to a chat room's outbound feed.
    Subscribe { room_id: i64 },
    /// Unsubscribe from a chat room's outbound feed.
    Unsubscribe { room_id: i64 },
    /// Send a message to a room. The sender is always the session's
    /// authenticated identity, never a field of this frame.
    Send { room_id: i64, content: String },
    /// Ping message for keepalive.
    Ping,
}

// ============================================================================
// Server → Client Frames
// ============================================================================

/// Frame sent from server to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Identity bound to the connection.
    Authenticated { user_id: i64 },
    /// Confirmation of subscription.
    Subscribed { room_id: i64 },
    /// Confirmation of unsubscription.
    Unsubscribed { room_id: i64 },
    /// A chat message pushed on a subscribed room's feed.
    Message(MessagePayload),
    /// Pong response to ping.
    Pong,
    /// Error frame.
    Error {
        /// Human-readable message.
        message: String,
        /// Machine-readable code.
        code: String,
    },
}

/// The per-message payload. The same shape travels over the fan-out
/// broker, the live WebSocket feed, and HTTP responses.
///
/// `is_read` reflects the state at persistence time - always `false` for a
/// freshly sent message. The later read-flip is not re-pushed on the live
/// feed; clients that need exact read-state re-fetch history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub message_id: i64,
    pub chat_room_id: i64,
    pub sender_id: i64,
    pub content: String,
    pub sent_at: DateTime<Utc>,
    pub is_read: bool,
}

impl From<chat_store::ChatMessage> for MessagePayload {
    fn from(message: chat_store::ChatMessage) -> Self {
        Self {
            message_id: message.id,
            chat_room_id: message.room_id,
            sender_id: message.sender_id,
            content: message.content,
            sent_at: message.sent_at,
            is_read: message.is_read,
        }
    }
}
