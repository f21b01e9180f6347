//! Durable storage for chat rooms and messages.
//!
//! This crate owns the two persistent tables of the chat core:
//! - `chat_rooms` - one row per (buyer, seller, product) pairing
//! - `messages` - append-only chat content, cascade-deleted with its room
//!
//! The [`Database`] wrapper serializes all access through a single SQLite
//! connection, which is also what enforces per-room insertion order: message
//! ids are assigned by `AUTOINCREMENT` and therefore increase monotonically
//! with persistence order.

pub mod database;
pub mod error;
pub mod messages;
pub mod models;
pub mod rooms;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::{ChatMessage, ChatRoom};
