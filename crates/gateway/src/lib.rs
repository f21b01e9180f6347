//! Real-time chat gateway for a secondhand-marketplace backend.
//!
//! This service:
//! - Accepts WebSocket connections and authenticates them against the
//!   platform credential validator
//! - Manages session subscriptions to per-room message feeds
//! - Persists every sent message before anything is published
//! - Fans persisted messages out through a broker so subscribers on any
//!   process instance receive them
//!
//! ## Architecture
//!
//! ```text
//! client ──ws──▶ ws_server ──▶ MessageDispatcher ──▶ chat_store (durable)
//!                                      │
//!                                      ▼
//!                             broker: chat.room.{id}
//!                                      │
//!                                      ▼ (every process)
//!                              FanoutListener
//!                                      │
//!                                      ▼
//!                          SessionRegistry ──▶ local WebSocket sessions
//! ```
//!
//! The process that persists a message receives it back through the same
//! broker round-trip as every other process - one delivery code path.

pub mod api;
pub mod auth;
pub mod dispatcher;
pub mod error;
pub mod fanout;
pub mod protocol;
pub mod registry;
pub mod ws_server;

pub use api::{create_router, AppState};
pub use auth::{CredentialValidator, HttpCredentialValidator, StaticCredentialValidator};
pub use dispatcher::{HistoryPage, MessageDispatcher};
pub use error::{GatewayError, Result};
pub use fanout::FanoutListener;
pub use protocol::{ClientFrame, MessagePayload, ServerFrame};
pub use registry::{SessionRegistry, SessionState};
