pub mod config;
pub mod error;
pub mod events;
pub mod history;
pub mod mentions;
pub mod message;

pub use error::{CoreError, Result};
pub use events::HubEvent;
pub use history::{HistoryError, HistorySink};
pub use message::{ContextMessage, Message, MessageId, SenderKind};
