use rusqlite::{Connection, Result};

/// Initialise the history schema. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS messages (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id   TEXT NOT NULL,
            room_id      TEXT NOT NULL,
            sender       TEXT NOT NULL,
            sender_kind  TEXT NOT NULL,
            timestamp_ms INTEGER NOT NULL,
            payload      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_room
            ON messages(room_id, timestamp_ms);",
    )
}
