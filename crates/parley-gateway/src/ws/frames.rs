use serde::Deserialize;

/// Inbound WS frames from chat clients. Tagged JSON, e.g.
/// `{"type":"message","sender":"dana","content":"hi"}`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientFrame {
    Message {
        sender: String,
        content: String,
        #[serde(default = "default_room")]
        room_id: String,
        #[serde(default)]
        suppress_agent_responses: bool,
    },
    TopicChange {
        topic: String,
        by: String,
        #[serde(default = "default_room")]
        room_id: String,
    },
    SetRoomAgents {
        room_id: String,
        agent_ids: Vec<String>,
    },
    ClearRoomAgents {
        room_id: String,
    },
    Wake,
    Sleep,
}

fn default_room() -> String {
    "default".to_string()
}
