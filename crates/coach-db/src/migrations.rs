use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT NOT NULL,
            role        TEXT NOT NULL CHECK (role IN ('coach', 'client')),
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- No foreign keys on the participants: a message may target a user
        -- this relay has never seen.
        CREATE TABLE IF NOT EXISTS messages (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            sender_id       INTEGER NOT NULL,
            receiver_id     INTEGER NOT NULL,
            message_text    TEXT NOT NULL DEFAULT '',
            media_url       TEXT,
            media_type      TEXT CHECK (media_type IN ('image', 'video')),
            media_thumbnail TEXT,
            sent_at         TEXT NOT NULL,
            read_at         TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_messages_sender
            ON messages(sender_id, receiver_id, sent_at);

        CREATE INDEX IF NOT EXISTS idx_messages_receiver
            ON messages(receiver_id, sender_id, sent_at);

        -- Seed the demo client and coach
        INSERT OR IGNORE INTO users (id, name, role)
            VALUES (1, 'Luca Rossi', 'client');
        INSERT OR IGNORE INTO users (id, name, role)
            VALUES (2, 'Mario Coach', 'coach');
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
