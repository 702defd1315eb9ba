use crate::models::{MessageRow, NewMessageRow};
use crate::Database;
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension, Row};

const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, message_text, media_url, media_type, \
                               media_thumbnail, sent_at, read_at";

impl Database {
    // -- Users --

    pub fn get_user_name(&self, id: i64) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let name = conn
                .query_row("SELECT name FROM users WHERE id = ?1", [id], |row| row.get(0))
                .optional()?;
            Ok(name)
        })
    }

    // -- Messages --

    /// Insert a message and return its assigned id.
    pub fn insert_message(&self, msg: &NewMessageRow<'_>) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (sender_id, receiver_id, message_text, media_url, media_type, media_thumbnail, sent_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    msg.sender_id,
                    msg.receiver_id,
                    msg.text,
                    msg.media_url,
                    msg.media_type,
                    msg.media_thumbnail,
                    msg.sent_at
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_message(&self, id: i64) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS);
            let row = conn.query_row(&sql, [id], message_from_row).optional()?;
            Ok(row)
        })
    }

    /// Both directions of the conversation between two users, oldest first.
    pub fn get_conversation(&self, user_a: i64, user_b: i64) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_conversation(conn, user_a, user_b))
    }

    /// Stamp `read_at` on a message unless it is already set.
    /// Returns false only when the message does not exist.
    pub fn mark_message_read(&self, id: i64, read_at: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE messages SET read_at = ?2 WHERE id = ?1 AND read_at IS NULL",
                rusqlite::params![id, read_at],
            )?;
            if updated > 0 {
                return Ok(true);
            }

            // Already read, or missing
            let exists = conn
                .query_row("SELECT 1 FROM messages WHERE id = ?1", [id], |_| Ok(()))
                .optional()?
                .is_some();
            Ok(exists)
        })
    }
}

fn query_conversation(conn: &Connection, user_a: i64, user_b: i64) -> Result<Vec<MessageRow>> {
    let sql = format!(
        "SELECT {}
         FROM messages
         WHERE (sender_id = ?1 AND receiver_id = ?2)
            OR (sender_id = ?2 AND receiver_id = ?1)
         ORDER BY sent_at ASC, id ASC",
        MESSAGE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;

    let rows = stmt
        .query_map(rusqlite::params![user_a, user_b], message_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        text: row.get(3)?,
        media_url: row.get(4)?,
        media_type: row.get(5)?,
        media_thumbnail: row.get(6)?,
        sent_at: row.get(7)?,
        read_at: row.get(8)?,
    })
}
