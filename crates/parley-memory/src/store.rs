use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::debug;

use parley_core::{HistoryError, HistorySink, Message};

use crate::db::init_db;

/// SQLite-backed room history.
///
/// Wraps a single connection in a `Mutex`; writes happen once per broadcast
/// message, so contention is negligible. The full message is stored as a
/// JSON payload next to a few query columns.
pub struct SqliteHistory {
    db: Mutex<Connection>,
}

impl SqliteHistory {
    /// Open (or create) the history database at `path`.
    pub fn open(path: &Path) -> Result<Self, HistoryError> {
        let conn =
            Connection::open(path).map_err(|e| HistoryError::Storage(e.to_string()))?;
        init_db(&conn).map_err(|e| HistoryError::Storage(e.to_string()))?;
        debug!(path = %path.display(), "history database opened");
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// In-memory database, for tests.
    pub fn open_in_memory() -> Result<Self, HistoryError> {
        let conn =
            Connection::open_in_memory().map_err(|e| HistoryError::Storage(e.to_string()))?;
        init_db(&conn).map_err(|e| HistoryError::Storage(e.to_string()))?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }
}

impl HistorySink for SqliteHistory {
    fn record(&self, message: &Message) -> Result<(), HistoryError> {
        let payload = serde_json::to_string(message)?;
        let kind = match message.sender_kind {
            parley_core::SenderKind::User => "user",
            parley_core::SenderKind::Agent => "agent",
            parley_core::SenderKind::System => "system",
        };
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO messages
             (message_id, room_id, sender, sender_kind, timestamp_ms, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                message.id.as_str(),
                message.room_id,
                message.sender,
                kind,
                message.timestamp_ms,
                payload,
            ],
        )
        .map_err(|e| HistoryError::Storage(e.to_string()))?;
        Ok(())
    }

    fn recent(&self, room_id: &str, limit: usize) -> Result<Vec<Message>, HistoryError> {
        let db = self.db.lock().unwrap();
        let mut stmt = db
            .prepare(
                "SELECT payload FROM messages
                 WHERE room_id = ?1
                 ORDER BY timestamp_ms DESC, id DESC
                 LIMIT ?2",
            )
            .map_err(|e| HistoryError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map(rusqlite::params![room_id, limit as i64], |row| {
                row.get::<_, String>(0)
            })
            .map_err(|e| HistoryError::Storage(e.to_string()))?;

        let mut messages: Vec<Message> = rows
            .filter_map(|r| r.ok())
            .filter_map(|payload| serde_json::from_str(&payload).ok())
            .collect();
        // Oldest first for replay.
        messages.reverse();
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_replay_round_trip() {
        let history = SqliteHistory::open_in_memory().unwrap();
        for i in 0..5 {
            let m = Message::user("dana", &format!("m{}", i), "default");
            history.record(&m).unwrap();
        }
        history
            .record(&Message::user("dana", "elsewhere", "other-room"))
            .unwrap();

        let recent = history.recent("default", 3).unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].content, "m2");
        assert_eq!(recent[2].content, "m4");
    }

    #[test]
    fn recent_is_scoped_by_room() {
        let history = SqliteHistory::open_in_memory().unwrap();
        history
            .record(&Message::user("dana", "here", "a"))
            .unwrap();
        assert!(history.recent("b", 10).unwrap().is_empty());
    }

    #[test]
    fn payload_preserves_optional_fields() {
        let history = SqliteHistory::open_in_memory().unwrap();
        let mut m = Message::agent("Alice Bot", "pinging @bob", "default");
        m.agent_id = Some("alice".into());
        m.interaction_strategy = Some("challenge".into());
        history.record(&m).unwrap();

        let replayed = &history.recent("default", 1).unwrap()[0];
        assert_eq!(replayed.agent_id.as_deref(), Some("alice"));
        assert_eq!(replayed.interaction_strategy.as_deref(), Some("challenge"));
        assert_eq!(replayed.mentions_normalized, vec!["bob"]);
    }
}
