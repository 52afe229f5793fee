use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};

use parley_core::{HubEvent, Message};

use crate::app::AppState;
use crate::ws::frames::ClientFrame;

/// How much room history a fresh client gets on connect.
const REPLAY_LIMIT: usize = 50;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, app))
}

async fn handle_socket(socket: WebSocket, app: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let mut events = app.orchestrator.subscribe();
    debug!("ws client connected");

    // Outbound half: replay recent history, then forward live hub events.
    let replay = app.clone();
    let forward = tokio::spawn(async move {
        if let Some(history) = replay.orchestrator.history() {
            match history.recent("default", REPLAY_LIMIT) {
                Ok(messages) => {
                    for m in messages {
                        let event = HubEvent::MessageBroadcast {
                            room_id: m.room_id.clone(),
                            message: m,
                        };
                        if !send_event(&mut sink, &event).await {
                            return;
                        }
                    }
                }
                Err(e) => warn!(error = %e, "history replay failed"),
            }
        }

        loop {
            match events.recv().await {
                Ok(event) => {
                    if !send_event(&mut sink, &event).await {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "ws client lagged behind event stream");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Inbound half: parse frames and hand them to the orchestrator.
    while let Some(Ok(ws_msg)) = stream.next().await {
        match ws_msg {
            WsMessage::Text(text) => handle_frame(text.as_str(), &app),
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    forward.abort();
    debug!("ws client disconnected");
}

async fn send_event(
    sink: &mut futures_util::stream::SplitSink<WebSocket, WsMessage>,
    event: &HubEvent,
) -> bool {
    let text = match serde_json::to_string(event) {
        Ok(t) => t,
        Err(e) => {
            warn!(error = %e, "failed to serialize hub event");
            return true;
        }
    };
    sink.send(WsMessage::Text(text.into())).await.is_ok()
}

fn handle_frame(text: &str, app: &Arc<AppState>) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, "malformed client frame");
            return;
        }
    };

    match frame {
        ClientFrame::Message {
            sender,
            content,
            room_id,
            suppress_agent_responses,
        } => {
            let mut message = Message::user(&sender, &content, &room_id);
            message.suppress_agent_responses = suppress_agent_responses;
            app.orchestrator.add_message(message);
        }
        ClientFrame::TopicChange { topic, by, room_id } => {
            app.orchestrator.change_topic(&topic, &by, &room_id);
        }
        ClientFrame::SetRoomAgents { room_id, agent_ids } => {
            app.orchestrator.set_room_allowed_agents(&room_id, agent_ids);
        }
        ClientFrame::ClearRoomAgents { room_id } => {
            app.orchestrator.clear_room_allowed_agents(&room_id);
        }
        ClientFrame::Wake => app.orchestrator.wake(),
        ClientFrame::Sleep => app.orchestrator.sleep(),
    }
}
