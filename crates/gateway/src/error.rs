//! Gateway error types.

use thiserror::Error;

use crate::auth::AuthError;

/// Gateway error type.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Connection or request could not be authenticated.
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthError),

    /// Operation referenced a chat room that does not exist.
    #[error("chat room {0} not found")]
    RoomNotFound(i64),

    /// Operation referenced a message that does not exist.
    #[error("message {0} not found")]
    MessageNotFound(i64),

    /// Caller is not one of the room's two participants.
    #[error("user {user_id} is not a participant of room {room_id}")]
    NotParticipant { user_id: i64, room_id: i64 },

    /// Message content failed validation.
    #[error("invalid content: {0}")]
    InvalidContent(&'static str),

    /// Malformed request outside of content validation.
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),

    /// Storage layer error.
    #[error("persistence error: {0}")]
    Persistence(#[from] chat_store::StoreError),

    /// Fan-out broker error.
    #[error("fan-out error: {0}")]
    Fanout(#[from] broker::BrokerError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Session outbound channel closed or full.
    #[error("channel send error")]
    ChannelSend,

    /// Session not found in the registry.
    #[error("session not found: {0}")]
    SessionNotFound(uuid::Uuid),
}

impl GatewayError {
    /// Machine-readable code, used in WS error frames and HTTP bodies.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Authentication(_) => "AUTH_REQUIRED",
            GatewayError::RoomNotFound(_) => "ROOM_NOT_FOUND",
            GatewayError::MessageNotFound(_) => "MESSAGE_NOT_FOUND",
            GatewayError::NotParticipant { .. } => "FORBIDDEN",
            GatewayError::InvalidContent(_) => "INVALID_CONTENT",
            GatewayError::InvalidRequest(_) => "INVALID_REQUEST",
            GatewayError::Persistence(_) => "PERSISTENCE_FAILED",
            GatewayError::Fanout(_) => "FANOUT_FAILED",
            GatewayError::Json(_) => "BAD_PAYLOAD",
            GatewayError::ChannelSend | GatewayError::SessionNotFound(_) => "INTERNAL",
        }
    }
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
