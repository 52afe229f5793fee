use thiserror::Error;

use crate::message::Message;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("History storage error: {0}")]
    Storage(String),

    #[error("History serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Optional persistence seam for room history.
///
/// When the orchestrator is built with a sink, every broadcast message is
/// recorded through it; failures are logged and ignored so persistence never
/// stalls the chat. Without a sink the hub runs memory-only.
pub trait HistorySink: Send + Sync {
    fn record(&self, message: &Message) -> Result<(), HistoryError>;

    /// The last `limit` messages for a room, oldest first.
    fn recent(&self, room_id: &str, limit: usize) -> Result<Vec<Message>, HistoryError>;
}
