//! Database connection management and schema setup.
//!
//! The [`Database`] struct owns a single [`rusqlite::Connection`] behind a
//! mutex; every store operation runs on that connection, which is what
//! serializes concurrent writes to the same room. The schema is created on
//! open, so a `Database` is always usable once constructed.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;

use crate::error::Result;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS chat_rooms (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    product_id     INTEGER NOT NULL,
    buyer_id       INTEGER NOT NULL,
    seller_id      INTEGER NOT NULL,
    reservation_id INTEGER,
    created_at     TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_chat_rooms_pairing
    ON chat_rooms (buyer_id, seller_id, product_id);

CREATE TABLE IF NOT EXISTS messages (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    room_id   INTEGER NOT NULL REFERENCES chat_rooms (id) ON DELETE CASCADE,
    sender_id INTEGER NOT NULL,
    content   TEXT NOT NULL,
    sent_at   TEXT NOT NULL,
    is_read   INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_messages_room ON messages (room_id, id);
";

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database file at `path`.
    pub fn open_at(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "opening chat database");
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    /// Open an in-memory database. Used by tests and by deployments that
    /// do not need chat history to survive a restart.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Lock the underlying connection.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_at_creates_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.db");

        let db = Database::open_at(&path).expect("should open");
        let room = db.insert_room(1, 10, 20).unwrap();
        assert_eq!(room.product_id, 1);

        // Re-opening the same file sees the existing data.
        drop(db);
        let db = Database::open_at(&path).unwrap();
        assert!(db.get_room(room.id).is_ok());
    }

    #[test]
    fn deleting_a_room_cascades_to_messages() {
        let db = Database::open_in_memory().unwrap();
        let room = db.insert_room(1, 10, 20).unwrap();
        db.insert_message(room.id, 10, "first").unwrap();
        db.insert_message(room.id, 20, "second").unwrap();

        assert!(db.delete_room(room.id).unwrap());
        assert!(db.history(room.id, 50, 0).unwrap().is_empty());
    }
}
