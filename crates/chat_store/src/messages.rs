//! Message persistence.
//!
//! Inserts are the chat core's durability boundary: once
//! [`Database::insert_message`] returns, the message survives any
//! downstream fan-out failure. History is keyed on the `AUTOINCREMENT`
//! id, which follows persistence order within a room.

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::ChatMessage;

impl Database {
    /// Persist a new message. The caller is responsible for having
    /// validated the room and content; a dangling `room_id` is rejected
    /// by the foreign key constraint.
    pub fn insert_message(&self, room_id: i64, sender_id: i64, content: &str) -> Result<ChatMessage> {
        let conn = self.conn();
        let sent_at = Utc::now();
        conn.execute(
            "INSERT INTO messages (room_id, sender_id, content, sent_at, is_read)
             VALUES (?1, ?2, ?3, ?4, 0)",
            params![room_id, sender_id, content, sent_at.to_rfc3339()],
        )?;

        Ok(ChatMessage {
            id: conn.last_insert_rowid(),
            room_id,
            sender_id,
            content: content.to_string(),
            sent_at,
            is_read: false,
        })
    }

    /// Fetch a message by id.
    pub fn get_message(&self, id: i64) -> Result<ChatMessage> {
        self.conn()
            .query_row(
                "SELECT id, room_id, sender_id, content, sent_at, is_read
                 FROM messages WHERE id = ?1",
                params![id],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// One page of a room's messages in persistence order (oldest first).
    pub fn history(&self, room_id: i64, limit: u32, offset: u32) -> Result<Vec<ChatMessage>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, room_id, sender_id, content, sent_at, is_read
             FROM messages
             WHERE room_id = ?1
             ORDER BY id ASC
             LIMIT ?2 OFFSET ?3",
        )?;

        let rows = stmt.query_map(params![room_id, limit, offset], row_to_message)?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Flip one message's read flag. Returns `false` if the message does
    /// not exist; re-marking an already-read message is a no-op that still
    /// returns `true`.
    pub fn mark_read(&self, message_id: i64) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE messages SET is_read = 1 WHERE id = ?1",
            params![message_id],
        )?;
        Ok(affected > 0)
    }

    /// Mark every message in the room not sent by `reader_id` as read.
    /// Returns the number of newly flipped rows, so a repeated call
    /// returns zero.
    pub fn mark_room_read(&self, room_id: i64, reader_id: i64) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE messages SET is_read = 1
             WHERE room_id = ?1 AND sender_id != ?2 AND is_read = 0",
            params![room_id, reader_id],
        )?;
        Ok(affected)
    }

    /// Number of unread messages addressed to `reader_id` in the room.
    pub fn unread_count(&self, room_id: i64, reader_id: i64) -> Result<i64> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM messages
             WHERE room_id = ?1 AND sender_id != ?2 AND is_read = 0",
            params![room_id, reader_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    let ts_str: String = row.get(4)?;
    let sent_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(ChatMessage {
        id: row.get(0)?,
        room_id: row.get(1)?,
        sender_id: row.get(2)?,
        content: row.get(3)?,
        sent_at,
        is_read: row.get::<_, i64>(5)? != 0,
    })
}
