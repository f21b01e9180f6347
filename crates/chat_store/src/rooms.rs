//! Chat room persistence.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::ChatRoom;

const ROOM_COLUMNS: &str = "id, product_id, buyer_id, seller_id, reservation_id, created_at";

impl Database {
    /// Insert a new room. Fails on a duplicate (buyer, seller, product)
    /// pairing; use [`Database::find_or_create_room`] for the idempotent
    /// variant.
    pub fn insert_room(&self, product_id: i64, buyer_id: i64, seller_id: i64) -> Result<ChatRoom> {
        let conn = self.conn();
        insert_room_on(&conn, product_id, buyer_id, seller_id)
    }

    /// Look up the room for a (buyer, seller, product) pairing.
    pub fn find_room(
        &self,
        buyer_id: i64,
        seller_id: i64,
        product_id: i64,
    ) -> Result<Option<ChatRoom>> {
        let conn = self.conn();
        find_room_on(&conn, buyer_id, seller_id, product_id)
    }

    /// Return the existing room for the pairing, or create one.
    ///
    /// The lookup and insert run under the same connection lock, so two
    /// concurrent calls for the same pairing yield the same room.
    pub fn find_or_create_room(
        &self,
        product_id: i64,
        buyer_id: i64,
        seller_id: i64,
    ) -> Result<ChatRoom> {
        let conn = self.conn();
        if let Some(room) = find_room_on(&conn, buyer_id, seller_id, product_id)? {
            return Ok(room);
        }
        insert_room_on(&conn, product_id, buyer_id, seller_id)
    }

    /// Fetch a room by id.
    pub fn get_room(&self, id: i64) -> Result<ChatRoom> {
        self.conn()
            .query_row(
                &format!("SELECT {ROOM_COLUMNS} FROM chat_rooms WHERE id = ?1"),
                params![id],
                row_to_room,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// All rooms a user participates in, most recent first.
    pub fn rooms_for_user(&self, user_id: i64) -> Result<Vec<ChatRoom>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ROOM_COLUMNS} FROM chat_rooms
             WHERE buyer_id = ?1 OR seller_id = ?1
             ORDER BY id DESC"
        ))?;

        let rows = stmt.query_map(params![user_id], row_to_room)?;
        let mut rooms = Vec::new();
        for row in rows {
            rooms.push(row?);
        }
        Ok(rooms)
    }

    /// Record the reservation link on a room. The only mutation a room
    /// admits after creation.
    pub fn link_reservation(&self, room_id: i64, reservation_id: i64) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE chat_rooms SET reservation_id = ?2 WHERE id = ?1",
            params![room_id, reservation_id],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Delete a room and, via the foreign key cascade, all its messages.
    pub fn delete_room(&self, id: i64) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM chat_rooms WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }
}

fn insert_room_on(
    conn: &Connection,
    product_id: i64,
    buyer_id: i64,
    seller_id: i64,
) -> Result<ChatRoom> {
    let created_at = Utc::now();
    conn.execute(
        "INSERT INTO chat_rooms (product_id, buyer_id, seller_id, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![product_id, buyer_id, seller_id, created_at.to_rfc3339()],
    )?;

    Ok(ChatRoom {
        id: conn.last_insert_rowid(),
        product_id,
        buyer_id,
        seller_id,
        reservation_id: None,
        created_at,
    })
}

fn find_room_on(
    conn: &Connection,
    buyer_id: i64,
    seller_id: i64,
    product_id: i64,
) -> Result<Option<ChatRoom>> {
    conn.query_row(
        &format!(
            "SELECT {ROOM_COLUMNS} FROM chat_rooms
             WHERE buyer_id = ?1 AND seller_id = ?2 AND product_id = ?3"
        ),
        params![buyer_id, seller_id, product_id],
        row_to_room,
    )
    .optional()
    .map_err(StoreError::Sqlite)
}

fn row_to_room(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatRoom> {
    let ts_str: String = row.get(5)?;
    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(ChatRoom {
        id: row.get(0)?,
        product_id: row.get(1)?,
        buyer_id: row.get(2)?,
        seller_id: row.get(3)?,
        reservation_id: row.get(4)?,
        created_at,
    })
}
