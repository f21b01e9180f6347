//! Connection session state and the per-process subscription registry.
//!
//! Uses DashMap so registration, deregistration, and room delivery can run
//! concurrently from different connection handlers without a global lock.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};

use axum::extract::ws::Message;
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::AuthError;
use crate::error::{GatewayError, Result};
use crate::protocol::{MessagePayload, ServerFrame};

/// Unique session identifier, transient per connection.
pub type SessionId = Uuid;

/// Buffer size for session outbound channels. Sends to a full buffer are
/// dropped so one slow client never blocks room delivery.
pub const SESSION_CHANNEL_BUFFER: usize = 256;

/// State for a single connected session.
pub struct SessionState {
    /// Unique session identifier.
    pub id: SessionId,
    /// Channel to the session's WebSocket write task.
    pub tx: mpsc::Sender<Message>,
    /// Authenticated identity, bound at most once per connection.
    identity: OnceLock<i64>,
    /// Rooms this session subscribed to.
    pub rooms: DashSet<i64>,
    /// Timestamp when the session connected.
    pub connected_at: i64,
    /// Timestamp of last ping received.
    last_ping: AtomicI64,
}

impl SessionState {
    /// Create an unauthenticated session around an outbound channel.
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            id: Uuid::new_v4(),
            tx,
            identity: OnceLock::new(),
            rooms: DashSet::new(),
            connected_at: now,
            last_ping: AtomicI64::new(now),
        }
    }

    /// Bind an identity to the session. Returns `false` if one is already
    /// bound - identities cannot be re-bound.
    pub fn bind_identity(&self, user_id: i64) -> bool {
        self.identity.set(user_id).is_ok()
    }

    /// The authenticated user, if the session completed authentication.
    pub fn user_id(&self) -> Option<i64> {
        self.identity.get().copied()
    }

    /// Whether the session completed authentication.
    pub fn is_authenticated(&self) -> bool {
        self.identity.get().is_some()
    }

    /// Send a frame to this session. Non-blocking: drops the frame if the
    /// buffer is full.
    pub fn send(&self, frame: &ServerFrame) -> Result<()> {
        let json = serde_json::to_string(frame)?;
        self.tx
            .try_send(Message::Text(json.into()))
            .map_err(|_| GatewayError::ChannelSend)
    }

    /// Update the last ping timestamp.
    pub fn update_ping(&self) {
        self.last_ping
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Get the last ping timestamp.
    pub fn last_ping_time(&self) -> i64 {
        self.last_ping.load(Ordering::Relaxed)
    }
}

/// Per-process registry of connected sessions and their room subscriptions.
///
/// Maintains:
/// - session id → session state
/// - room id → subscribed session ids (the delivery index)
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<SessionState>>,
    rooms: DashMap<i64, DashSet<SessionId>>,
}

impl SessionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            rooms: DashMap::new(),
        }
    }

    /// Register a new session.
    pub fn register(&self, session: Arc<SessionState>) -> SessionId {
        let id = session.id;
        self.sessions.insert(id, session);
        info!(session_id = %id, "session registered");
        id
    }

    /// Unregister a session and remove it from every room index.
    pub fn unregister(&self, session_id: &SessionId) {
        if let Some((_, session)) = self.sessions.remove(session_id) {
            for room_id in session.rooms.iter() {
                if let Some(subscribers) = self.rooms.get(&room_id) {
                    subscribers.remove(session_id);
                }
            }
            info!(session_id = %session_id, "session unregistered");
        }
    }

    /// Get a session by id.
    pub fn get(&self, session_id: &SessionId) -> Option<Arc<SessionState>> {
        self.sessions.get(session_id).map(|s| s.clone())
    }

    /// Subscribe a session to a room's outbound feed.
    ///
    /// Refused for unauthenticated sessions; nothing is added to any index
    /// in that case.
    pub fn subscribe(&self, session_id: &SessionId, room_id: i64) -> Result<()> {
        // Clone the session handle out so no guard on `sessions` is held
        // while the room index is updated.
        let session = self
            .sessions
            .get(session_id)
            .map(|s| s.clone())
            .ok_or(GatewayError::SessionNotFound(*session_id))?;
        if !session.is_authenticated() {
            return Err(GatewayError::Authentication(AuthError::Unauthenticated));
        }

        session.rooms.insert(room_id);
        self.rooms.entry(room_id).or_default().insert(*session_id);

        debug!(session_id = %session_id, room_id, "subscribed");
        Ok(())
    }

    /// Remove a session's subscription to a room.
    pub fn unsubscribe(&self, session_id: &SessionId, room_id: i64) -> Result<()> {
        let session = self
            .sessions
            .get(session_id)
            .map(|s| s.clone())
            .ok_or(GatewayError::SessionNotFound(*session_id))?;

        session.rooms.remove(&room_id);
        if let Some(subscribers) = self.rooms.get(&room_id) {
            subscribers.remove(session_id);
        }

        debug!(session_id = %session_id, room_id, "unsubscribed");
        Ok(())
    }

    /// Push a message payload to every local subscriber of a room.
    ///
    /// Best-effort per session: the frame is serialized once and dropped
    /// for any subscriber whose buffer is full. Returns the number of
    /// sessions the frame was handed to.
    pub fn deliver(&self, room_id: i64, payload: &MessagePayload) -> usize {
        // Snapshot the subscriber set so the room index guard is released
        // before sessions are touched.
        let subscribers: Vec<SessionId> = match self.rooms.get(&room_id) {
            Some(subscribers) => subscribers.iter().map(|id| *id).collect(),
            None => return 0,
        };

        let frame = ServerFrame::Message(payload.clone());
        let json = match serde_json::to_string(&frame) {
            Ok(j) => j,
            Err(e) => {
                warn!(error = %e, room_id, "failed to serialize delivery frame");
                return 0;
            }
        };

        let mut delivered = 0;
        for session_id in subscribers {
            let Some(session) = self.get(&session_id) else {
                continue;
            };
            match session.tx.try_send(Message::Text(json.clone().into())) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    debug!(session_id = %session_id, error = %e, "dropping frame for slow session");
                }
            }
        }
        delivered
    }

    /// Number of connected sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of rooms with at least one subscription entry.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Number of sessions subscribed to a room.
    pub fn subscriber_count(&self, room_id: i64) -> usize {
        self.rooms.get(&room_id).map(|s| s.len()).unwrap_or(0)
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
