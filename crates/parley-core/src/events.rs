use serde::Serialize;

use crate::message::Message;

/// Events emitted by the hub to whatever transport is attached (the WS
/// gateway in the default deployment). Fan-out happens over a
/// `tokio::sync::broadcast` channel owned by the orchestrator.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum HubEvent {
    /// A message left the broker loop and is now part of the room transcript.
    /// Internal context entries are never broadcast.
    MessageBroadcast { message: Message, room_id: String },

    AgentGeneratingStart {
        agent_id: String,
        room_id: String,
    },
    AgentGeneratingStop {
        agent_id: String,
        room_id: String,
    },

    /// An agent produced a reply (the message itself follows as a separate
    /// `MessageBroadcast` once the broker delivers it).
    AgentResponse {
        agent_id: String,
        room_id: String,
        response_time_ms: u64,
    },

    /// A generation attempt failed. No message is produced and there is no
    /// automatic retry.
    AgentError {
        agent_id: String,
        room_id: String,
        error: String,
        response_time_ms: u64,
    },

    AgentsSleeping { reason: String },
    AgentsAwakened,

    TopicChanged {
        new_topic: String,
        changed_by: String,
        room_id: String,
    },

    /// Non-fatal broker fault: queue overflow or a failed delivery to the
    /// ready subscriber.
    BrokerError { detail: String },
}
